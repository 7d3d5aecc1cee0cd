//! Captcha classification and fingerprint-based solving

mod dataset;
mod solver;

pub use dataset::{image_segment, FingerprintDataset};
pub use solver::{CaptchaError, CaptchaSolver};
