//! Headless runner: feeds credentials to the worker and prints its event
//! stream. Ctrl-C requests a stop and waits for the worker to acknowledge.

use anyhow::{bail, Result};
use profitcentr_jumper::auth::{read_plaintext_fallback, CredentialStore};
use profitcentr_jumper::events::WorkerEvent;
use profitcentr_jumper::worker::Worker;
use profitcentr_jumper::{init_logging, EngineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logging();

    let config = EngineConfig::load();

    // Credentials: command line, then the encrypted store, then the
    // plaintext two-line fallback file.
    let mut args = std::env::args().skip(1);
    let (username, password) = match (args.next(), args.next()) {
        (Some(username), Some(password)) => (username, password),
        _ => match stored_credentials(&config) {
            Some((username, password)) => (username, password),
            None => bail!(
                "no credentials: pass USERNAME PASSWORD as arguments, or place \
                 account.txt (two lines) in {}",
                config.data_dir().display()
            ),
        },
    };

    let (handle, mut rx) = Worker::spawn(username, password, config);

    let mut stop_sent = false;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(WorkerEvent::Log(line)) => println!("{}", line),
                Some(WorkerEvent::Error(message)) => eprintln!("ERROR: {}", message),
                Some(WorkerEvent::Finished) | None => break,
            },
            result = tokio::signal::ctrl_c(), if !stop_sent => {
                if result.is_ok() {
                    stop_sent = true;
                    handle.stop().await;
                }
            }
        }
    }

    handle.wait().await;
    Ok(())
}

/// Load saved credentials: the encrypted store first, then the plaintext
/// pre-fill file.
fn stored_credentials(config: &EngineConfig) -> Option<(String, String)> {
    let data_dir = config.data_dir();
    if let Ok(store) = CredentialStore::open(&data_dir) {
        if let Some(credentials) = store.load() {
            return Some((credentials.username, credentials.password));
        }
    }
    read_plaintext_fallback(&data_dir.join("account.txt"))
        .map(|credentials| (credentials.username, credentials.password))
}
