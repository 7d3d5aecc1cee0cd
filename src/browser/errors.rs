//! Browser error types

use thiserror::Error;

/// Browser-related errors
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("JavaScript error: {0}")]
    JavaScriptError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Driver error: {0}")]
    DriverError(String),
}

impl BrowserError {
    /// Whether this error is a bounded-wait timeout (as opposed to a missing
    /// element or a driver-level failure). Callers log the two differently.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrowserError::Timeout(_))
    }
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        BrowserError::DriverError(err.to_string())
    }
}

impl From<BrowserError> for String {
    fn from(err: BrowserError) -> String {
        err.to_string()
    }
}
