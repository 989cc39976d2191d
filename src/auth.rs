//! Credential models: redacted secrets and the short-lived access credential.

pub mod credential;
pub mod secret;

pub use credential::*;
pub use secret::*;
