//! Error types for Turnstile.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Invalid limiter or backend configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The remote counting service could not be reached
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(#[source] redis::RedisError),

    /// A backend call exceeded its deadline
    #[error("Backend operation `{operation}` timed out after {after:?}")]
    Timeout {
        /// Backend operation that was abandoned
        operation: &'static str,
        /// Deadline that elapsed
        after: Duration,
    },

    /// The remote counting service rejected a command
    #[error("Backend error: {0}")]
    Backend(#[source] redis::RedisError),

    /// The remote counting service replied with something we cannot interpret
    #[error("Unexpected backend reply: {0}")]
    Protocol(String),
}

impl TurnstileError {
    /// Whether this error originated in the counting backend rather than in
    /// configuration.
    ///
    /// Callers use this to apply their own fail-open or fail-closed policy.
    pub fn is_backend_failure(&self) -> bool {
        !matches!(self, TurnstileError::Config(_))
    }
}

impl From<redis::RedisError> for TurnstileError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            TurnstileError::BackendUnavailable(err)
        } else {
            TurnstileError::Backend(err)
        }
    }
}

impl From<config::ConfigError> for TurnstileError {
    fn from(err: config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
