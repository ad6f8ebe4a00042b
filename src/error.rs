//! Error types for Tollgate.

use std::time::Duration;
use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shared counter backend rejected or failed the request
    #[error("Backend error: {0}")]
    Backend(#[from] redis::RedisError),

    /// The shared counter backend did not answer in time
    #[error("Backend timed out after {0:?}")]
    BackendTimeout(Duration),

    /// The shared counter backend answered with something we cannot interpret
    #[error("Backend protocol error: {0}")]
    BackendProtocol(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TollgateError {
    /// Whether this error means the shared backend is unusable for the current call.
    ///
    /// These are the errors a fallback counter recovers from.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            TollgateError::Backend(_)
                | TollgateError::BackendTimeout(_)
                | TollgateError::BackendProtocol(_)
        )
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_are_unavailable() {
        assert!(TollgateError::BackendTimeout(Duration::from_millis(500)).is_backend_unavailable());
        assert!(TollgateError::BackendProtocol("nil".to_string()).is_backend_unavailable());

        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        assert!(TollgateError::from(redis_err).is_backend_unavailable());
    }

    #[test]
    fn test_config_errors_are_not_unavailable() {
        assert!(!TollgateError::Config("bad".to_string()).is_backend_unavailable());
    }
}
