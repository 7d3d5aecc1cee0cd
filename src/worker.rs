//! The run worker
//!
//! Owns the whole session lifecycle on one task: launch the browser, log in
//! (bounded retries), run the jump loop, log out, tear down. Fatal failures
//! surface as exactly one error event; browser teardown is guaranteed on
//! every path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use crate::auth::{AuthSession, CredentialStore};
use crate::browser::BrowserSession;
use crate::captcha::{CaptchaSolver, FingerprintDataset};
use crate::events::{EventLog, WorkerEvent};
use crate::jump::{JumpError, JumpLoop, JumpOutcome};
use crate::menu::MenuController;
use crate::EngineConfig;

/// Handle held by the presentation layer while a run is in flight.
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    session: Arc<BrowserSession>,
    task: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Request a stop. The flag takes effect at the next loop/retry
    /// boundary; closing the browser makes any in-flight driver call fail as
    /// an ordinary iteration failure.
    pub async fn stop(&self) {
        info!("Stop requested");
        self.stop.store(true, Ordering::Relaxed);
        self.session.shutdown().await;
    }

    /// Block until the worker has acknowledged termination.
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

/// The session-automation worker.
pub struct Worker;

impl Worker {
    /// Spawn a run. The returned receiver yields log lines, at most one
    /// error notification, and a final `Finished` event after teardown.
    pub fn spawn(
        username: String,
        password: String,
        config: EngineConfig,
    ) -> (WorkerHandle, UnboundedReceiver<WorkerEvent>) {
        let (events, rx) = EventLog::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let session = Arc::new(BrowserSession::new());

        let task = tokio::spawn(Self::run(
            session.clone(),
            username,
            password,
            config,
            events,
            stop.clone(),
        ));

        (
            WorkerHandle {
                stop,
                session,
                task,
            },
            rx,
        )
    }

    async fn run(
        session: Arc<BrowserSession>,
        username: String,
        password: String,
        config: EngineConfig,
        events: EventLog,
        stop: Arc<AtomicBool>,
    ) {
        if let Err(message) =
            Self::drive(&session, &username, &password, &config, &events, &stop).await
        {
            events.error(message);
        }
        // Teardown happens regardless of success, failure or stop request.
        session.shutdown().await;
        events.log("Session closed");
        events.finished();
    }

    async fn drive(
        session: &Arc<BrowserSession>,
        username: &str,
        password: &str,
        config: &EngineConfig,
        events: &EventLog,
        stop: &Arc<AtomicBool>,
    ) -> Result<(), String> {
        session
            .launch(config.headless)
            .await
            .map_err(|e| format!("Could not launch the browser: {}", e))?;
        events.log(format!(
            "Browser ready (headless: {})",
            session.is_headless()
        ));

        // Credential persistence is best-effort; the run proceeds without it.
        let store = match CredentialStore::open(&config.data_dir()) {
            Ok(store) => Some(store),
            Err(e) => {
                events.log(format!("Credential store unavailable: {}", e));
                None
            }
        };

        let solver = CaptchaSolver::new(
            FingerprintDataset::new(config.captcha_dir()),
            config.captcha_timeout(),
            events.clone(),
        );
        let auth = AuthSession::new(
            session.clone(),
            solver,
            store,
            config.clone(),
            events.clone(),
        );

        let mut logged_in = false;
        for attempt in 1..=config.max_login_attempts {
            if stop.load(Ordering::Relaxed) {
                events.log("Stop requested before login completed");
                return Ok(());
            }
            if auth.check_auth_status().await {
                logged_in = true;
                break;
            }
            events.log(format!("Login attempt {}...", attempt));
            if auth.login(username, password).await {
                logged_in = true;
                break;
            }
            if attempt < config.max_login_attempts {
                events.log("Waiting before the next attempt...");
                tokio::time::sleep(Duration::from_secs_f64(config.retry_delay_secs)).await;
            }
        }
        if !logged_in {
            return Err("Could not log in after all attempts".to_string());
        }

        let menu = MenuController::new(config.clone(), events.clone());
        let jump_loop = JumpLoop::new(
            session.clone(),
            menu,
            config.clone(),
            events.clone(),
            stop.clone(),
        );

        match jump_loop.run().await {
            Ok(outcome) => {
                events.log(match outcome {
                    JumpOutcome::Exhausted => "Work finished: jump limit reached",
                    JumpOutcome::NoMoreTargets => "Work finished: no jumps left",
                    JumpOutcome::StoppedOnErrors => "Work finished: too many consecutive failures",
                    JumpOutcome::StopRequested => "Work stopped on request",
                });
                if outcome == JumpOutcome::StopRequested {
                    return Ok(());
                }
            }
            Err(JumpError::Setup(reason)) => {
                return Err(format!("Jump work could not start: {}", reason));
            }
        }

        events.log("Ending the session...");
        if !auth.logout().await {
            events.log("Warning: the session did not close cleanly");
        }

        Ok(())
    }
}
