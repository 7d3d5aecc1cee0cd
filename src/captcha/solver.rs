//! Image-selection captcha solver
//!
//! Classifies the challenge by its instruction text, selects the tiles whose
//! fingerprint segments appear in the category's dataset file, submits, and
//! confirms the challenge disappeared. Everything is a lookup against
//! previously catalogued fingerprints, so the solver can be exercised
//! against a fixture dataset.

use std::time::Duration;

use chromiumoxide::Page;
use thiserror::Error;
use tracing::debug;

use super::dataset::{image_segment, FingerprintDataset};
use crate::browser::{BrowserError, HumanActions};
use crate::events::EventLog;

/// Captcha page selectors
mod selectors {
    pub const TITLE: &str = ".out-capcha-title";
    pub const TILE_GROUP: &str = ".out-capcha";
    pub const TILE: &str = ".out-capcha-lab";
    pub const SUBMIT: &str = ".btn_big_green";
}

/// Failure reasons for one solve attempt, logged distinctly.
#[derive(Error, Debug)]
pub enum CaptchaError {
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("unsupported challenge type: '{0}'")]
    UnsupportedChallenge(String),

    #[error("submit control could not be clicked")]
    SubmitFailed,

    #[error("challenge still visible after submit")]
    StillVisible,

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// State-free per-call solver; all configuration is fixed at construction.
pub struct CaptchaSolver {
    dataset: FingerprintDataset,
    wait_timeout: Duration,
    events: EventLog,
}

impl CaptchaSolver {
    pub fn new(dataset: FingerprintDataset, wait_timeout: Duration, events: EventLog) -> Self {
        Self {
            dataset,
            wait_timeout,
            events,
        }
    }

    /// Solve the captcha currently shown on `page`. Never raises past this
    /// boundary; every failure cause is logged with enough detail to tell
    /// timeout, unsupported challenge and driver errors apart.
    pub async fn solve(&self, page: &Page) -> bool {
        match self.try_solve(page).await {
            Ok(()) => {
                self.events.log("Captcha solved");
                true
            }
            Err(e) => {
                self.events.log(format!("Captcha failed: {}", e));
                false
            }
        }
    }

    async fn try_solve(&self, page: &Page) -> Result<(), CaptchaError> {
        self.events.log("Waiting for captcha challenge...");

        let title = HumanActions::wait_for_selector(page, selectors::TITLE, self.wait_timeout)
            .await
            .map_err(|e| Self::classify_wait(e, "challenge title"))?;

        let instruction = title
            .inner_text()
            .await
            .map_err(BrowserError::from)?
            .unwrap_or_default()
            .trim()
            .to_string();
        self.events.log(format!("Challenge type: {}", instruction));

        // Unknown instruction text fails before any tile interaction.
        let category = FingerprintDataset::category_for(&instruction)
            .ok_or_else(|| CaptchaError::UnsupportedChallenge(instruction.clone()))?;

        let group = HumanActions::wait_for_selector(page, selectors::TILE_GROUP, self.wait_timeout)
            .await
            .map_err(|e| Self::classify_wait(e, "tile group"))?;

        let tiles = group
            .find_elements(selectors::TILE)
            .await
            .map_err(BrowserError::from)?;
        self.events.log(format!("Found {} tiles", tiles.len()));

        for tile in &tiles {
            if !HumanActions::is_live(tile).await {
                continue;
            }
            let style = tile
                .attribute("style")
                .await
                .map_err(BrowserError::from)?
                .unwrap_or_default();
            let Some(segment) = image_segment(&style) else {
                continue;
            };
            if self.dataset.contains(category, &segment) {
                debug!("Tile match: {}", segment);
                if !HumanActions::click(tile).await {
                    debug!("Tile click failed: {}", segment);
                }
                // Short pause for visual stability between tile clicks
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }

        let submit = HumanActions::wait_for_selector(page, selectors::SUBMIT, self.wait_timeout)
            .await
            .map_err(|e| Self::classify_wait(e, "submit control"))?;
        if !HumanActions::click(&submit).await {
            return Err(CaptchaError::SubmitFailed);
        }

        HumanActions::wait_for_selector_gone(page, selectors::TILE_GROUP, self.wait_timeout)
            .await
            .map_err(|_| CaptchaError::StillVisible)?;

        Ok(())
    }

    fn classify_wait(err: BrowserError, what: &'static str) -> CaptchaError {
        if err.is_timeout() {
            CaptchaError::Timeout(what)
        } else {
            CaptchaError::Browser(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_failure_reported_distinctly_from_still_visible() {
        assert_ne!(
            CaptchaError::SubmitFailed.to_string(),
            CaptchaError::StillVisible.to_string()
        );
    }

    #[test]
    fn test_wait_classification_keeps_timeout_and_driver_errors_apart() {
        let timeout = CaptchaSolver::classify_wait(
            BrowserError::Timeout("waiting for element '.out-capcha'".to_string()),
            "tile group",
        );
        assert!(matches!(timeout, CaptchaError::Timeout("tile group")));

        let driver = CaptchaSolver::classify_wait(
            BrowserError::DriverError("connection lost".to_string()),
            "tile group",
        );
        assert!(matches!(driver, CaptchaError::Browser(_)));
    }
}
