//! Error types for `selfverify` core library.

use thiserror::Error;

/// Result type alias using `selfverify` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `selfverify` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
