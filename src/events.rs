//! One-way notification channel from the engine to the presentation layer
//!
//! Every component reports status exclusively through this capability; no
//! component reads presentation state directly.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::info;

/// Notification emitted by the worker. Fire-and-forget, one-directional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A timestamped log line for display
    Log(String),
    /// A user-visible error notification (at most one per run)
    Error(String),
    /// The run has ended and the browser has been torn down
    Finished,
}

/// Cloneable logging capability handed to every component by composition.
///
/// A dropped receiver makes sends no-ops; the engine never blocks or fails
/// on the presentation side.
#[derive(Clone)]
pub struct EventLog {
    tx: UnboundedSender<WorkerEvent>,
}

impl EventLog {
    pub fn channel() -> (Self, UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit a log line, prefixed with the local wall-clock time.
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);
        let line = format!("{} | {}", chrono::Local::now().format("%H:%M:%S"), message);
        let _ = self.tx.send(WorkerEvent::Log(line));
    }

    /// Emit the run's user-visible error notification.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        let _ = self.tx.send(WorkerEvent::Error(message));
    }

    /// Signal that the run has finished and teardown is complete.
    pub fn finished(&self) {
        let _ = self.tx.send(WorkerEvent::Finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_lines_are_timestamped() {
        let (events, mut rx) = EventLog::channel();
        events.log("hello");

        match rx.recv().await {
            Some(WorkerEvent::Log(line)) => {
                assert!(line.ends_with(" | hello"), "unexpected line: {}", line);
                // HH:MM:SS prefix
                assert_eq!(line.split(" | ").next().map(|t| t.len()), Some(8));
            }
            other => panic!("expected log event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_events_survive_dropped_receiver() {
        let (events, rx) = EventLog::channel();
        drop(rx);
        events.log("nobody listening");
        events.error("still fine");
        events.finished();
    }
}
