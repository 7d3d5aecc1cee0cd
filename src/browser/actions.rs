//! Human-like browser actions
//!
//! Cross-cutting helpers used by every other component: randomized delays,
//! resilient clicks (scripted click first, native pointer click as fallback)
//! and bounded polling waits. This layer is the sole click/delay mechanism
//! in the crate so timing behavior stays centrally controlled.

use std::time::{Duration, Instant};

use chromiumoxide::{Element, Page};
use rand::Rng;
use tracing::debug;

use super::BrowserError;

/// Poll interval for all bounded waits
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Stateless human-behavior layer.
pub struct HumanActions;

impl HumanActions {
    /// Sleep for a uniformly-random duration in `[min_secs, max_secs]`.
    /// Randomized to avoid fixed-interval automation signatures.
    pub async fn delay(min_secs: f64, max_secs: f64) {
        let secs = if max_secs > min_secs {
            rand::thread_rng().gen_range(min_secs..=max_secs)
        } else {
            min_secs
        };
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    /// Click an element, scripted click first and native pointer click as
    /// fallback. Returns false only if both strategies fail. Each attempt is
    /// wrapped in short random delays.
    pub async fn click(element: &Element) -> bool {
        Self::delay(0.3, 0.7).await;

        match element
            .call_js_fn("function() { this.click(); }", false)
            .await
        {
            Ok(_) => {
                Self::delay(0.2, 0.5).await;
                debug!("Scripted click succeeded");
                true
            }
            Err(e) => {
                debug!("Scripted click failed: {}, trying native click", e);
                match element.click().await {
                    Ok(_) => {
                        Self::delay(0.2, 0.5).await;
                        debug!("Native click succeeded");
                        true
                    }
                    Err(e) => {
                        debug!("Native click failed: {}", e);
                        false
                    }
                }
            }
        }
    }

    /// Clear an input field and type text character by character with a
    /// small random inter-character delay.
    pub async fn type_text(element: &Element, text: &str) -> bool {
        if element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .is_err()
        {
            return false;
        }
        if element.focus().await.is_err() {
            return false;
        }
        for ch in text.chars() {
            if element.type_str(ch.to_string()).await.is_err() {
                return false;
            }
            Self::delay(0.1, 0.3).await;
        }
        true
    }

    /// Whether the element is both displayed and enabled, judged in-page.
    /// Any evaluation error (e.g. a detached node) counts as not live.
    pub async fn is_live(element: &Element) -> bool {
        element
            .call_js_fn(
                "function() { return this.offsetParent !== null && !this.disabled; }",
                false,
            )
            .await
            .ok()
            .and_then(|ret| ret.result.value)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Wait for an element matching a CSS selector, bounded by `timeout`.
    pub async fn wait_for_selector(
        page: &Page,
        selector: &str,
        timeout: Duration,
    ) -> Result<Element, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(element) = page.find_element(selector).await {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "waiting for element '{}'",
                    selector
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait for an element matching an XPath expression, bounded by `timeout`.
    pub async fn wait_for_xpath(
        page: &Page,
        xpath: &str,
        timeout: Duration,
    ) -> Result<Element, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(element) = page.find_xpath(xpath).await {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "waiting for element '{}'",
                    xpath
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait for all elements matching a CSS selector to disappear.
    pub async fn wait_for_selector_gone(
        page: &Page,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if page.find_element(selector).await.is_err() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "waiting for element '{}' to disappear",
                    selector
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until the current URL equals `url`.
    pub async fn wait_for_url(
        page: &Page,
        url: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            let current = page.url().await.ok().flatten().unwrap_or_default();
            if current == url {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "waiting for URL '{}' (current: '{}')",
                    url, current
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll `document.readyState` until the page reports itself complete.
    pub async fn wait_for_page_load(page: &Page, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            let ready = page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|res| res.into_value::<String>().ok())
                .map(|state| state == "complete")
                .unwrap_or(false);
            if ready {
                Self::delay(0.5, 1.0).await;
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout("waiting for page load".to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
