//! Browser session and human-like action layer

mod actions;
mod errors;
mod session;

pub use actions::HumanActions;
pub use errors::BrowserError;
pub use session::BrowserSession;
