//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the event core.
#[derive(Error, Debug)]
pub enum Error {
    /// Native source failures (poll or credential calls). Fatal for the dispatch loop.
    #[error("native source error: {0}")]
    Native(String),

    /// Malformed OAUTHBEARER token or credential configuration.
    #[error("oauthbearer config error: {0}")]
    AuthConfig(String),

    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Channel or client already closed.
    #[error("closed: {0}")]
    Closed(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error must stop the dispatch loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Native(_) | Error::Internal(_))
    }
}

// Convenience constructors
impl Error {
    pub fn native(msg: impl Into<String>) -> Self {
        Self::Native(msg.into())
    }

    pub fn auth_config(msg: impl Into<String>) -> Self {
        Self::AuthConfig(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
