//! Navigation menu control
//!
//! Downstream actions depend on an expanded submenu; this controller makes
//! sure it is open before they run, with a small bounded retry.

use chromiumoxide::Page;
use tracing::debug;

use crate::browser::{BrowserError, HumanActions};
use crate::events::EventLog;
use crate::EngineConfig;

const MENU_BLOCK: &str = "#mnu_tblock1";
const MENU_TITLE: &str = "#mnu_title1";

pub struct MenuController {
    config: EngineConfig,
    events: EventLog,
}

impl MenuController {
    pub fn new(config: EngineConfig, events: EventLog) -> Self {
        Self { config, events }
    }

    /// Ensure the submenu is expanded, retrying up to the configured bound.
    /// The retry delay range doubles on each failed attempt.
    pub async fn ensure_open(&self, page: &Page) -> bool {
        let retry_delay = self.config.retry_delay_secs;
        for attempt in 1..=self.config.max_menu_attempts {
            HumanActions::delay(0.5, 1.0).await;
            match self.try_open(page).await {
                Ok(true) => return true,
                Ok(false) => {
                    self.events
                        .log(format!("Attempt {} to open menu failed", attempt));
                }
                Err(e) => {
                    self.events.log(format!("Menu check error: {}", e));
                }
            }
            if attempt < self.config.max_menu_attempts {
                HumanActions::delay(retry_delay, retry_delay * 2.0).await;
            }
        }
        false
    }

    /// One attempt: inspect the menu block's inline visibility style and
    /// click the title control if the block is hidden.
    async fn try_open(&self, page: &Page) -> Result<bool, BrowserError> {
        let block =
            HumanActions::wait_for_selector(page, MENU_BLOCK, self.config.element_timeout()).await?;
        let style = block.attribute("style").await?.unwrap_or_default();

        if style.contains("display: none") {
            self.events.log("Opening menu...");
            let title =
                HumanActions::wait_for_selector(page, MENU_TITLE, self.config.element_timeout())
                    .await?;
            if !HumanActions::click(&title).await {
                return Ok(false);
            }
            HumanActions::delay(0.8, 1.5).await;

            let block = page.find_element(MENU_BLOCK).await?;
            let style = block.attribute("style").await?.unwrap_or_default();
            if style.contains("display: none") {
                debug!("Menu still hidden after click");
                return Ok(false);
            }
        }

        Ok(true)
    }
}
