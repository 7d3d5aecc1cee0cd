//! The jump work loop
//!
//! Opens the "Переходы" section and repeatedly executes jumps: click the
//! control, wait for the secondary tab, hold it open for the site-specified
//! duration, close it, return, and reload. Iteration failures consume a
//! consecutive-failure budget; exhausting it ends the loop as a controlled
//! stop, not a run failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Element, Page};
use thiserror::Error;
use tracing::debug;

use crate::browser::{BrowserError, BrowserSession, HumanActions};
use crate::events::EventLog;
use crate::menu::MenuController;
use crate::EngineConfig;

const JUMP_SECTION_LINK: &str =
    "//a[@class='ajax-site user_menuline' and contains(text(), 'Переходы')]";
const JUMP_CONTROL: &str = "//a[contains(@onclick, \"funcjs['go-jump']\")]";

/// Why the loop stopped. All three engine-driven outcomes are non-fatal to
/// the run, but the distinction is reported rather than collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpOutcome {
    /// Reached the maximum successful-jump count
    Exhausted,
    /// No further jump controls on the page (normal end of available work)
    NoMoreTargets,
    /// Consecutive-failure budget spent (controlled stop)
    StoppedOnErrors,
    /// A stop was requested from outside at a loop boundary
    StopRequested,
}

/// Loop-fatal setup failures (menu, section navigation, initial page load).
/// The caller decides whether these end the whole run.
#[derive(Error, Debug)]
pub enum JumpError {
    #[error("jump setup failed: {0}")]
    Setup(&'static str),
}

/// Parse the wait-time from a jump control's onclick attribute: the third
/// comma-separated field, quote-stripped. Malformed, missing or non-positive
/// values yield 0; the result is never negative.
pub fn extract_wait_time(onclick: &str) -> u64 {
    let parts: Vec<&str> = onclick.split(',').collect();
    if parts.len() < 3 {
        return 0;
    }
    parts[2]
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .parse::<i64>()
        .map(|v| v.max(0) as u64)
        .unwrap_or(0)
}

/// Decision after recording one iteration outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopControl {
    Continue,
    MaxJumpsReached,
    ErrorBudgetExhausted,
}

/// Successful-jump and consecutive-failure counters, reset at loop start.
struct WorkCounters {
    jump_count: u32,
    consecutive_errors: u32,
    max_jumps: u32,
    max_consecutive_errors: u32,
}

impl WorkCounters {
    fn new(max_jumps: u32, max_consecutive_errors: u32) -> Self {
        Self {
            jump_count: 0,
            consecutive_errors: 0,
            max_jumps,
            max_consecutive_errors,
        }
    }

    fn record_success(&mut self) -> LoopControl {
        self.jump_count += 1;
        self.consecutive_errors = 0;
        if self.jump_count >= self.max_jumps {
            LoopControl::MaxJumpsReached
        } else {
            LoopControl::Continue
        }
    }

    fn record_failure(&mut self) -> LoopControl {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.max_consecutive_errors {
            LoopControl::ErrorBudgetExhausted
        } else {
            LoopControl::Continue
        }
    }
}

/// Cache of the last-located jump control with an explicit freshness check
/// (enabled + displayed). Staleness invalidates the entry; it is never
/// surfaced as an error.
#[derive(Default)]
struct JumpCache {
    entry: Option<Element>,
}

impl JumpCache {
    /// Drop the entry unless it is still live on the page.
    async fn invalidate_stale(&mut self) {
        let live = match &self.entry {
            Some(element) => HumanActions::is_live(element).await,
            None => false,
        };
        if !live && self.entry.take().is_some() {
            debug!("Cached jump control is stale");
        }
    }

    fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    fn put(&mut self, element: Element) {
        self.entry = Some(element);
    }

    fn entry(&self) -> Option<&Element> {
        self.entry.as_ref()
    }
}

/// The main work loop. Composes the menu controller for its setup phase.
pub struct JumpLoop {
    session: Arc<BrowserSession>,
    menu: MenuController,
    config: EngineConfig,
    events: EventLog,
    stop: Arc<AtomicBool>,
}

impl JumpLoop {
    pub fn new(
        session: Arc<BrowserSession>,
        menu: MenuController,
        config: EngineConfig,
        events: EventLog,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session,
            menu,
            config,
            events,
            stop,
        }
    }

    /// Run the loop to completion, controlled stop, or setup failure.
    pub async fn run(&self) -> Result<JumpOutcome, JumpError> {
        self.events.log("Starting jump work...");
        let page = self
            .session
            .page()
            .await
            .map_err(|_| JumpError::Setup("browser session closed"))?;

        // The element cache exists only within one run; starting fresh is
        // the "clear at loop start" contract.
        let mut cache = JumpCache::default();

        if !self.menu.ensure_open(&page).await {
            self.events.log("Could not open menu");
            return Err(JumpError::Setup("menu would not open"));
        }

        if !self.open_jump_section(&page).await {
            self.events.log("Could not open the jumps section");
            return Err(JumpError::Setup("jumps section navigation failed"));
        }

        if HumanActions::wait_for_page_load(&page, self.config.page_load_timeout())
            .await
            .is_err()
        {
            self.events.log("Jumps page did not finish loading");
            return Err(JumpError::Setup("jumps page load timed out"));
        }

        let mut counters = WorkCounters::new(self.config.max_jumps, self.config.max_consecutive_errors);

        let outcome = loop {
            if self.stop.load(Ordering::Relaxed) {
                self.events.log("Stop requested, ending jump work");
                break JumpOutcome::StopRequested;
            }
            if !self.session.is_alive() {
                self.events.log("Browser disconnected, ending jump work");
                break JumpOutcome::StoppedOnErrors;
            }

            cache.invalidate_stale().await;
            if cache.is_empty() {
                match HumanActions::wait_for_xpath(&page, JUMP_CONTROL, self.config.element_timeout())
                    .await
                {
                    Ok(element) => cache.put(element),
                    Err(_) => {
                        self.events.log("No more jump controls available");
                        break JumpOutcome::NoMoreTargets;
                    }
                }
            }
            let Some(element) = cache.entry() else {
                break JumpOutcome::NoMoreTargets;
            };

            let control = if self.process_jump(&page, element).await {
                let control = counters.record_success();
                self.events
                    .log(format!("Jump #{} completed", counters.jump_count));
                control
            } else {
                let control = counters.record_failure();
                self.events.log(format!(
                    "Jump failed (consecutive failures: {})",
                    counters.consecutive_errors
                ));
                control
            };

            match control {
                LoopControl::Continue => {}
                LoopControl::MaxJumpsReached => break JumpOutcome::Exhausted,
                LoopControl::ErrorBudgetExhausted => {
                    self.events.log("Consecutive-failure budget spent");
                    break JumpOutcome::StoppedOnErrors;
                }
            }

            HumanActions::delay(2.0, 4.0).await;
        };

        self.events.log(format!(
            "Jump work finished, {} jumps completed",
            counters.jump_count
        ));
        Ok(outcome)
    }

    /// Click the "Переходы" section link, with the same bounded retry
    /// pattern as the menu controller.
    async fn open_jump_section(&self, page: &Page) -> bool {
        let retry_delay = self.config.retry_delay_secs;
        for attempt in 1..=self.config.max_menu_attempts {
            match HumanActions::wait_for_xpath(page, JUMP_SECTION_LINK, self.config.element_timeout())
                .await
            {
                Ok(link) => {
                    if HumanActions::click(&link).await {
                        self.events.log("Opened the jumps section");
                        return true;
                    }
                    self.events
                        .log(format!("Attempt {} to open the jumps section failed", attempt));
                }
                Err(e) => {
                    self.events.log(format!("Jumps section link: {}", e));
                }
            }
            if attempt < self.config.max_menu_attempts {
                HumanActions::delay(retry_delay, retry_delay * 2.0).await;
            }
        }
        false
    }

    /// Execute one jump: click, await the secondary tab, hold it open for
    /// the site-specified duration plus a fixed pad for the new page's own
    /// load time, close it, return, reload. Any failure aborts only this
    /// iteration.
    async fn process_jump(&self, page: &Page, element: &Element) -> bool {
        let onclick = match element.attribute("onclick").await {
            Ok(Some(value)) => value,
            Ok(None) => {
                self.events.log("Jump control has no onclick attribute");
                return false;
            }
            Err(e) => {
                self.events.log(format!("Could not read jump control: {}", e));
                return false;
            }
        };

        let wait_secs = extract_wait_time(&onclick);
        if wait_secs == 0 {
            self.events.log("Could not extract a wait time");
            return false;
        }

        let original_target = page.target_id().clone();

        if !HumanActions::click(element).await {
            self.events.log("Could not click the jump control");
            return false;
        }

        let new_page = match self.wait_for_second_page(&original_target).await {
            Ok(new_page) => new_page,
            Err(e) => {
                self.events.log(format!("New tab did not open: {}", e));
                return false;
            }
        };

        let total_wait = wait_secs + self.config.jump_pad_secs;
        self.events.log(format!("Waiting {} seconds...", total_wait));
        tokio::time::sleep(Duration::from_secs(total_wait)).await;

        if let Err(e) = new_page.close().await {
            self.events.log(format!("Error closing the tab: {}", e));
        }

        // Failure to come back to the original window is recoverable; the
        // reload below decides the iteration.
        if let Err(e) = page.bring_to_front().await {
            self.events
                .log(format!("Could not return to the original window: {}", e));
        }

        if let Err(e) = page.reload().await {
            self.events.log(format!("Page reload failed: {}", e));
            return false;
        }
        if HumanActions::wait_for_page_load(page, self.config.page_load_timeout())
            .await
            .is_err()
        {
            self.events.log("Page did not finish reloading");
            return false;
        }

        debug!("Jump iteration completed");
        true
    }

    /// Wait (bounded) for a second tab to appear, returning it.
    async fn wait_for_second_page(
        &self,
        original_target: &chromiumoxide::cdp::browser_protocol::target::TargetId,
    ) -> Result<Page, BrowserError> {
        let deadline = std::time::Instant::now() + self.config.new_window_timeout();
        loop {
            let pages = self.session.pages().await?;
            if let Some(new_page) = pages
                .into_iter()
                .find(|p| p.target_id() != original_target)
            {
                return Ok(new_page);
            }
            if std::time::Instant::now() >= deadline {
                return Err(BrowserError::Timeout(
                    "waiting for the jump tab to open".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;

    #[test]
    fn test_extract_wait_time_simple() {
        assert_eq!(extract_wait_time("go,jump,'7'"), 7);
        assert_eq!(extract_wait_time("go-jump,foo,'12'"), 12);
        assert_eq!(extract_wait_time("funcjs['go-jump'](1, 2, '25', 'x')"), 25);
    }

    #[test]
    fn test_extract_wait_time_malformed() {
        assert_eq!(extract_wait_time(""), 0);
        assert_eq!(extract_wait_time("go,jump"), 0);
        assert_eq!(extract_wait_time("go,jump,'abc'"), 0);
        assert_eq!(extract_wait_time("go,jump,''"), 0);
    }

    #[test]
    fn test_extract_wait_time_never_negative() {
        assert_eq!(extract_wait_time("go,jump,'-5'"), 0);
        assert_eq!(extract_wait_time("go,jump,'0'"), 0);
    }

    #[test]
    fn test_extract_wait_time_is_idempotent() {
        let onclick = "go,jump,'7'";
        assert_eq!(extract_wait_time(onclick), extract_wait_time(onclick));
    }

    #[test]
    fn test_total_wait_includes_fixed_pad() {
        let config = EngineConfig::default();
        assert_eq!(
            extract_wait_time("go-jump,foo,'12'") + config.jump_pad_secs,
            17
        );
    }

    #[test]
    fn test_counters_stop_after_max_jumps() {
        let mut counters = WorkCounters::new(3, 3);
        assert_eq!(counters.record_success(), LoopControl::Continue);
        assert_eq!(counters.record_success(), LoopControl::Continue);
        assert_eq!(counters.record_success(), LoopControl::MaxJumpsReached);
        assert_eq!(counters.jump_count, 3);
    }

    #[test]
    fn test_counters_stop_on_consecutive_errors() {
        let mut counters = WorkCounters::new(100, 3);
        assert_eq!(counters.record_failure(), LoopControl::Continue);
        assert_eq!(counters.record_failure(), LoopControl::Continue);
        assert_eq!(counters.record_failure(), LoopControl::ErrorBudgetExhausted);
        assert_eq!(counters.jump_count, 0);
    }

    #[test]
    fn test_success_resets_consecutive_errors() {
        let mut counters = WorkCounters::new(100, 3);
        counters.record_failure();
        counters.record_failure();
        counters.record_success();
        assert_eq!(counters.consecutive_errors, 0);
        // The budget is available in full again
        assert_eq!(counters.record_failure(), LoopControl::Continue);
        assert_eq!(counters.record_failure(), LoopControl::Continue);
        assert_eq!(counters.record_failure(), LoopControl::ErrorBudgetExhausted);
    }

    #[test]
    fn test_loop_always_terminates() {
        // For any outcome sequence the loop ends within max_jumps successes
        // or max_consecutive_errors consecutive failures.
        let outcomes = [true, false, true, false, false, true, false, false, false];
        let mut counters = WorkCounters::new(100, 3);
        let mut iterations = 0u32;
        for ok in outcomes.iter().cycle() {
            iterations += 1;
            let control = if *ok {
                counters.record_success()
            } else {
                counters.record_failure()
            };
            if control != LoopControl::Continue {
                break;
            }
            assert!(iterations < 10_000, "loop did not terminate");
        }
        assert!(counters.jump_count <= 100);
        assert!(counters.consecutive_errors <= 3);
    }
}
