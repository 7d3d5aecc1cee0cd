//! Authentication: credential storage and the login/logout flow

mod credentials;
mod session;

pub use credentials::{read_plaintext_fallback, CredentialStore, Credentials};
pub use session::{AuthError, AuthSession};
