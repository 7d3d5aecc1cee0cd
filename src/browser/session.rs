//! Browser session management
//!
//! Owns the single controlled Chrome instance for a run. Every other
//! component reaches the browser exclusively through this type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    Bounds, GetWindowForTargetParams, SetWindowBoundsParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::BrowserError;

/// Page load / script timeout applied to every CDP request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Find Chrome/Chromium executable on the system
fn find_chrome() -> Option<std::path::PathBuf> {
    let candidates: Vec<std::path::PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            std::path::PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            std::path::PathBuf::from(
                r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            ),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(std::path::PathBuf::from(format!(
                r"{}\Google\Chrome\Application\chrome.exe",
                local
            )));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![std::path::PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        )]
    } else {
        vec![
            std::path::PathBuf::from("/usr/bin/google-chrome"),
            std::path::PathBuf::from("/usr/bin/google-chrome-stable"),
            std::path::PathBuf::from("/usr/bin/chromium"),
            std::path::PathBuf::from("/usr/bin/chromium-browser"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// One controlled browser instance.
///
/// Invariant: at most one live underlying browser handle at a time.
/// `shutdown` is idempotent, never fails outward, and always clears the
/// handle; it is safe to call repeatedly and before any launch.
pub struct BrowserSession {
    browser: Mutex<Option<Browser>>,
    page: RwLock<Option<Page>>,
    headless: AtomicBool,
    alive: Arc<AtomicBool>,
}

impl BrowserSession {
    /// Create an unlaunched session shell.
    pub fn new() -> Self {
        Self {
            browser: Mutex::new(None),
            page: RwLock::new(None),
            headless: AtomicBool::new(false),
            alive: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Launch Chrome with the stability flag set and position the window on
    /// the right half of the screen (skipped when headless).
    ///
    /// On failure no partial handle is left behind.
    pub async fn launch(&self, headless: bool) -> Result<(), BrowserError> {
        // Enforce the single-handle invariant if a previous launch survived.
        self.shutdown().await;

        info!("Launching browser (headless: {})", headless);

        let mut builder = BrowserConfig::builder()
            .request_timeout(REQUEST_TIMEOUT)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--enable-unsafe-swiftshader");

        if !headless {
            builder = builder.with_head();
        }

        if let Some(chrome_path) = find_chrome() {
            info!("Auto-detected Chrome at: {}", chrome_path.display());
            builder = builder.chrome_executable(chrome_path);
        }

        let config = builder
            .build()
            .map_err(BrowserError::LaunchFailed)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // Drain CDP events in the background; when the handler ends, Chrome
        // has disconnected or crashed.
        let alive = self.alive.clone();
        alive.store(true, Ordering::Relaxed);
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser event error: {}", e);
                }
            }
            warn!("Chrome disconnected (event handler ended)");
            alive.store(false, Ordering::Relaxed);
        });

        // Chrome opens with one blank tab; take it as the main page.
        let page = {
            let mut pages = browser.pages().await?;
            let main_page = if !pages.is_empty() {
                pages.remove(0)
            } else {
                browser.new_page("about:blank").await?
            };
            for extra_page in pages {
                debug!("Closing extra blank tab");
                let _ = extra_page.close().await;
            }
            main_page
        };

        if !headless {
            if let Err(e) = Self::position_right_half(&page).await {
                // Window placement is cosmetic; a failure must not abort launch.
                warn!("Could not position browser window: {}", e);
            }
        }

        self.headless.store(headless, Ordering::Relaxed);
        *self.browser.lock().await = Some(browser);
        *self.page.write().await = Some(page);

        info!("Browser session created");
        Ok(())
    }

    /// Resize and move the window to occupy the right half of the screen at
    /// full height, using the physical screen size reported by the page.
    async fn position_right_half(page: &Page) -> Result<(), BrowserError> {
        let screen_width = page
            .evaluate("window.screen.width")
            .await?
            .into_value::<i64>()
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
        let screen_height = page
            .evaluate("window.screen.height")
            .await?
            .into_value::<i64>()
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        let window_width = screen_width / 2;
        let window_height = screen_height;
        let window_x = screen_width - window_width;

        let window = page.execute(GetWindowForTargetParams::default()).await?;
        let bounds = Bounds {
            left: Some(window_x),
            top: Some(0),
            width: Some(window_width),
            height: Some(window_height),
            window_state: None,
        };
        page.execute(SetWindowBoundsParams {
            window_id: window.result.window_id.clone(),
            bounds,
        })
        .await?;

        debug!(
            "Window positioned: {}x{} at ({}, 0)",
            window_width, window_height, window_x
        );
        Ok(())
    }

    /// The main page of the session.
    pub async fn page(&self) -> Result<Page, BrowserError> {
        self.page
            .read()
            .await
            .clone()
            .ok_or(BrowserError::SessionClosed)
    }

    /// All currently open pages (tabs) of the browser.
    pub async fn pages(&self) -> Result<Vec<Page>, BrowserError> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(BrowserError::SessionClosed)?;
        Ok(browser.pages().await?)
    }

    /// Whether the session was launched headless.
    pub fn is_headless(&self) -> bool {
        self.headless.load(Ordering::Relaxed)
    }

    /// Whether Chrome is still connected.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Close the browser. Never fails outward; safe to call repeatedly and
    /// when never launched.
    pub async fn shutdown(&self) {
        *self.page.write().await = None;
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            info!("Shutting down browser");
            if let Err(e) = browser.close().await {
                warn!("Error closing browser: {}", e);
            }
            if let Err(e) = browser.wait().await {
                warn!("Error waiting for browser exit: {}", e);
            }
        }
        self.alive.store(false, Ordering::Relaxed);
    }
}

impl Default for BrowserSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_is_safe_before_launch_and_repeated() {
        let session = BrowserSession::new();
        session.shutdown().await;
        session.shutdown().await;

        assert!(!session.is_alive());
        assert!(!session.is_headless());
        assert!(matches!(
            session.page().await,
            Err(BrowserError::SessionClosed)
        ));
        assert!(matches!(
            session.pages().await,
            Err(BrowserError::SessionClosed)
        ));
    }
}
