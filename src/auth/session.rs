//! Login, logout and auth-status checks
//!
//! Drives the login page with human-like pacing and hands the captcha to the
//! solver. Owns no retry loop: retrying failed logins is the worker's
//! responsibility.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use super::credentials::CredentialStore;
use crate::browser::{BrowserError, BrowserSession, HumanActions};
use crate::captcha::CaptchaSolver;
use crate::events::EventLog;
use crate::EngineConfig;

mod selectors {
    pub const USERNAME_INPUT: &str = "input[name='username']";
    pub const PASSWORD_INPUT: &str = "input[name='password']";
    pub const LOGGED_IN_MARKER: &str = ".user_menu";
    pub const LOGOUT_LINK: &str = "//a[contains(@href, 'logout?exit_account') and text()='Выход']";
    pub const POST_LOGOUT_MARKER: &str = "//a[@href='/login' and contains(@class, 'btn_log')]";
}

/// Failure reasons for one login attempt.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("empty credentials")]
    EmptyCredentials,

    #[error("login input fields not found")]
    InputFieldsMissing,

    #[error("typing failed")]
    TypingFailed,

    #[error("captcha not solved")]
    Captcha,

    #[error("timed out waiting for members page")]
    LoginTimeout,

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// One authenticated site session.
pub struct AuthSession {
    session: Arc<BrowserSession>,
    solver: CaptchaSolver,
    store: Option<CredentialStore>,
    config: EngineConfig,
    events: EventLog,
}

impl AuthSession {
    pub fn new(
        session: Arc<BrowserSession>,
        solver: CaptchaSolver,
        store: Option<CredentialStore>,
        config: EngineConfig,
        events: EventLog,
    ) -> Self {
        Self {
            session,
            solver,
            store,
            config,
            events,
        }
    }

    /// True iff the current URL is the members URL and the logged-in marker
    /// is present within a short timeout.
    pub async fn check_auth_status(&self) -> bool {
        let Ok(page) = self.session.page().await else {
            return false;
        };
        let current = page.url().await.ok().flatten().unwrap_or_default();
        if current != self.config.members_url() {
            return false;
        }
        HumanActions::wait_for_selector(
            &page,
            selectors::LOGGED_IN_MARKER,
            Duration::from_secs(5),
        )
        .await
        .is_ok()
    }

    /// Perform one login attempt. Never raises past this boundary.
    pub async fn login(&self, username: &str, password: &str) -> bool {
        match self.try_login(username, password).await {
            Ok(()) => {
                self.events.log("Login completed");
                true
            }
            Err(e) => {
                self.events.log(format!("Login failed: {}", e));
                false
            }
        }
    }

    async fn try_login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        // Validate before any network action
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::EmptyCredentials);
        }

        self.events.log("Starting login...");
        let page = self.session.page().await?;
        page.goto(self.config.login_url())
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
        HumanActions::delay(1.0, 2.0).await;

        let element_timeout = self.config.element_timeout();
        let username_field =
            HumanActions::wait_for_selector(&page, selectors::USERNAME_INPUT, element_timeout)
                .await
                .map_err(|_| AuthError::InputFieldsMissing)?;
        let password_field =
            HumanActions::wait_for_selector(&page, selectors::PASSWORD_INPUT, element_timeout)
                .await
                .map_err(|_| AuthError::InputFieldsMissing)?;

        self.events.log("Typing username...");
        if !HumanActions::type_text(&username_field, username).await {
            return Err(AuthError::TypingFailed);
        }
        HumanActions::delay(0.5, 1.0).await;

        self.events.log("Typing password...");
        if !HumanActions::type_text(&password_field, password).await {
            return Err(AuthError::TypingFailed);
        }
        HumanActions::delay(0.5, 1.0).await;

        self.events.log("Checking captcha...");
        if !self.solver.solve(&page).await {
            return Err(AuthError::Captcha);
        }

        HumanActions::wait_for_url(&page, &self.config.members_url(), self.config.login_timeout())
            .await
            .map_err(|_| AuthError::LoginTimeout)?;

        // Persist only after the confirmed successful login
        if let Some(store) = &self.store {
            if !store.save(username, password) {
                self.events.log("Warning: could not save credentials");
            }
        }

        Ok(())
    }

    /// Log out of the site: locate the logout link, click it, and confirm
    /// the post-logout marker. Never raises.
    pub async fn logout(&self) -> bool {
        self.events.log("Logging out...");
        let Ok(page) = self.session.page().await else {
            self.events.log("Logout failed: session closed");
            return false;
        };

        HumanActions::delay(1.0, 2.0).await;

        let element_timeout = self.config.element_timeout();
        let link = match HumanActions::wait_for_xpath(&page, selectors::LOGOUT_LINK, element_timeout)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                self.events.log(format!("Logout link not found: {}", e));
                return false;
            }
        };

        if let Err(e) = link.scroll_into_view().await {
            debug!("Could not scroll logout link into view: {}", e);
        }
        HumanActions::delay(0.5, 1.0).await;

        if !HumanActions::click(&link).await {
            self.events.log("Logout click failed");
            return false;
        }

        match HumanActions::wait_for_xpath(&page, selectors::POST_LOGOUT_MARKER, element_timeout)
            .await
        {
            Ok(_) => {
                self.events.log("Logged out");
                true
            }
            Err(_) => {
                self.events.log("Could not confirm logout");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::{CaptchaSolver, FingerprintDataset};
    use crate::events::WorkerEvent;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// An auth session over a browser that was never launched. Reaching the
    /// browser from here fails with "session closed", so any earlier guard
    /// is observable on its own.
    fn offline_auth() -> (AuthSession, UnboundedReceiver<WorkerEvent>) {
        let (events, rx) = EventLog::channel();
        let solver = CaptchaSolver::new(
            FingerprintDataset::new(std::env::temp_dir()),
            Duration::from_secs(1),
            events.clone(),
        );
        let auth = AuthSession::new(
            Arc::new(BrowserSession::new()),
            solver,
            None,
            EngineConfig::default(),
            events,
        );
        (auth, rx)
    }

    #[tokio::test]
    async fn test_empty_username_fails_login_before_any_navigation() {
        let (auth, mut rx) = offline_auth();

        assert!(!auth.login("", "pw").await);

        let mut lines = Vec::new();
        while let Ok(WorkerEvent::Log(line)) = rx.try_recv() {
            lines.push(line);
        }
        let guard_lines = lines
            .iter()
            .filter(|line| line.contains("empty credentials"))
            .count();
        assert_eq!(guard_lines, 1);
        // The guard fires before the navigation step is even announced.
        assert!(!lines.iter().any(|line| line.contains("Starting login")));
    }

    #[tokio::test]
    async fn test_empty_password_fails_login() {
        let (auth, _rx) = offline_auth();
        assert!(!auth.login("user", "").await);
    }
}
