//! ProfitCentr Jumper
//!
//! Automated surf-jump sessions on profitcentr.com: logs in, solves the
//! image-selection captcha against a precomputed fingerprint dataset, opens
//! the navigation menu, and runs the repeat-jump work loop. The engine runs
//! on one worker task and reports to the presentation layer only through a
//! one-way event channel.

pub mod auth;
pub mod browser;
pub mod captcha;
pub mod events;
pub mod jump;
pub mod menu;
pub mod worker;

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

/// Engine configuration: retry counts, delays and timeouts live here rather
/// than as per-component constants, so tests can override timing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Site base URL
    pub base_url: String,

    /// Run the browser headless
    pub headless: bool,

    /// Login attempts before the run is aborted as fatal
    pub max_login_attempts: u32,
    /// Menu-open / section-navigation attempts
    pub max_menu_attempts: u32,
    /// Base retry delay in seconds (ranges double on retry)
    pub retry_delay_secs: f64,

    /// Bounded wait for a single element, in seconds
    pub element_timeout_secs: u64,
    /// Bounded wait for captcha elements, in seconds
    pub captcha_timeout_secs: u64,
    /// Bounded wait for the post-login URL, in seconds
    pub login_timeout_secs: u64,
    /// Bounded wait for document.readyState, in seconds
    pub page_load_timeout_secs: u64,
    /// Bounded wait for the jump tab to appear, in seconds
    pub new_window_timeout_secs: u64,

    /// Maximum successful jumps per run
    pub max_jumps: u32,
    /// Consecutive-failure budget before a controlled stop
    pub max_consecutive_errors: u32,
    /// Fixed pad added to each jump's site-specified wait, in seconds,
    /// covering the new page's own load/settle time
    pub jump_pad_secs: u64,

    /// Override for the data directory (key, credentials)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Override for the fingerprint dataset directory
    #[serde(default)]
    pub captcha_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://profitcentr.com".to_string(),
            headless: false,
            max_login_attempts: 3,
            max_menu_attempts: 3,
            retry_delay_secs: 2.0,
            element_timeout_secs: 10,
            captcha_timeout_secs: 20,
            login_timeout_secs: 30,
            page_load_timeout_secs: 10,
            new_window_timeout_secs: 10,
            max_jumps: 100,
            max_consecutive_errors: 3,
            jump_pad_secs: 5,
            data_dir: None,
            captcha_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }

    pub fn members_url(&self) -> String {
        format!("{}/members", self.base_url)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn captcha_timeout(&self) -> Duration {
        Duration::from_secs(self.captcha_timeout_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn new_window_timeout(&self) -> Duration {
        Duration::from_secs(self.new_window_timeout_secs)
    }

    /// Directory for the key and credential files.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("profitcentr-jumper")
        })
    }

    /// Directory holding one dataset file per captcha category.
    pub fn captcha_dir(&self) -> PathBuf {
        self.captcha_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("captcha"))
    }

    /// Config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("profitcentr-jumper").join("config.json"))
    }

    /// Load config from file, falling back to defaults.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("profitcentr-jumper").join("logs"))
}

/// Initialize logging with console output and a daily rolling file.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "profitcentr-jumper.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets_match_site_behavior() {
        let config = EngineConfig::default();
        assert_eq!(config.max_jumps, 100);
        assert_eq!(config.max_consecutive_errors, 3);
        assert_eq!(config.max_login_attempts, 3);
        assert_eq!(config.jump_pad_secs, 5);
    }

    #[test]
    fn test_urls_derive_from_base() {
        let config = EngineConfig {
            base_url: "https://example.org".to_string(),
            ..Default::default()
        };
        assert_eq!(config.login_url(), "https://example.org/login");
        assert_eq!(config.members_url(), "https://example.org/members");
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_jumps, config.max_jumps);
        assert_eq!(parsed.base_url, config.base_url);
    }
}
