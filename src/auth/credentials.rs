//! Encrypted credential persistence
//!
//! One symmetric key generated on first use and persisted next to the
//! encrypted credentials; the key is never rotated. Decryption failures of
//! any kind surface as `None`, never as an error.

use std::path::{Path, PathBuf};

use fernet::Fernet;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const KEY_FILE: &str = "auth_key.key";
const CREDENTIALS_FILE: &str = "credentials.enc";

/// The last-used login/password pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Encrypts and persists credentials under a locally generated key.
pub struct CredentialStore {
    fernet: Fernet,
    credentials_path: PathBuf,
}

impl CredentialStore {
    /// Open the store in `dir`, loading the key file or generating and
    /// persisting a fresh key if absent. A corrupt key file is replaced (the
    /// previously stored credentials then simply fail to decrypt).
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let key_path = dir.join(KEY_FILE);

        let key = if key_path.exists() {
            std::fs::read_to_string(&key_path)?.trim().to_string()
        } else {
            let key = Fernet::generate_key();
            std::fs::write(&key_path, &key)?;
            info!("Generated new encryption key at {}", key_path.display());
            key
        };

        let fernet = match Fernet::new(&key) {
            Some(f) => f,
            None => {
                warn!("Encryption key file is corrupt, generating a new key");
                let key = Fernet::generate_key();
                std::fs::write(&key_path, &key)?;
                Fernet::new(&key).ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "generated key rejected")
                })?
            }
        };

        Ok(Self {
            fernet,
            credentials_path: dir.join(CREDENTIALS_FILE),
        })
    }

    /// Encrypt a credential pair into an opaque token.
    pub fn encrypt(&self, username: &str, password: &str) -> String {
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        // Serializing two strings cannot fail
        let json = serde_json::to_vec(&credentials).unwrap_or_default();
        self.fernet.encrypt(&json)
    }

    /// Decrypt a token back into credentials. Any corruption or format error
    /// yields `None`.
    pub fn decrypt(&self, token: &str) -> Option<Credentials> {
        let plaintext = self.fernet.decrypt(token.trim()).ok()?;
        serde_json::from_slice(&plaintext).ok()
    }

    /// Load the persisted credentials; `None` if the file is absent or fails
    /// to decrypt.
    pub fn load(&self) -> Option<Credentials> {
        let token = std::fs::read_to_string(&self.credentials_path).ok()?;
        self.decrypt(&token)
    }

    /// Encrypt and persist a credential pair. Only called after a confirmed
    /// successful login. Returns false (and logs) on I/O failure.
    pub fn save(&self, username: &str, password: &str) -> bool {
        let token = self.encrypt(username, password);
        match std::fs::write(&self.credentials_path, token) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to save credentials to {}: {}",
                    self.credentials_path.display(),
                    e
                );
                false
            }
        }
    }
}

/// Read the plaintext two-line fallback file (line 1 = username, line 2 =
/// password). A separate persistence path from the encrypted store, used only
/// to pre-fill inputs at startup.
pub fn read_plaintext_fallback(path: &Path) -> Option<Credentials> {
    let content = std::fs::read_to_string(path).ok()?;
    let mut lines = content.lines();
    let username = lines.next()?.trim().to_string();
    let password = lines.next()?.trim().to_string();
    if username.is_empty() {
        return None;
    }
    Some(Credentials { username, password })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "profitcentr-jumper-cred-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let dir = temp_store_dir("roundtrip");
        let store = CredentialStore::open(&dir).unwrap();

        let token = store.encrypt("alice", "s3cret");
        let credentials = store.decrypt(&token).unwrap();
        assert_eq!(credentials.username, "alice");
        assert_eq!(credentials.password, "s3cret");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_decrypt_garbage_is_none() {
        let dir = temp_store_dir("garbage");
        let store = CredentialStore::open(&dir).unwrap();

        assert!(store.decrypt("not a fernet token").is_none());
        assert!(store.decrypt("").is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_fresh_store_creates_key_and_loads_none() {
        let dir = temp_store_dir("fresh");
        assert!(!dir.join(KEY_FILE).exists());

        let store = CredentialStore::open(&dir).unwrap();
        assert!(dir.join(KEY_FILE).exists());
        assert!(store.load().is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_then_load() {
        let dir = temp_store_dir("saveload");
        let store = CredentialStore::open(&dir).unwrap();

        assert!(store.save("bob", "hunter2"));
        let loaded = store.load().unwrap();
        assert_eq!(loaded.username, "bob");
        assert_eq!(loaded.password, "hunter2");

        // A second store over the same directory reuses the key
        let reopened = CredentialStore::open(&dir).unwrap();
        assert_eq!(reopened.load(), Some(loaded));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_plaintext_fallback() {
        let dir = temp_store_dir("fallback");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("account.txt");

        std::fs::write(&path, "carol\npass123\n").unwrap();
        let credentials = read_plaintext_fallback(&path).unwrap();
        assert_eq!(credentials.username, "carol");
        assert_eq!(credentials.password, "pass123");

        std::fs::write(&path, "\n\n").unwrap();
        assert!(read_plaintext_fallback(&path).is_none());
        assert!(read_plaintext_fallback(&dir.join("absent.txt")).is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
