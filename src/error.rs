//! Error types for the Floodgate throttling engine.

use thiserror::Error;

/// Main error type for Floodgate operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// Configuration-related errors, raised while options are compiled
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store failures
    #[error("Counter store error: {0}")]
    Store(String),

    /// Redis errors from the networked counter store
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Counter (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A construction invariant was violated
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottleError {
    /// Returns `true` if the error came from the counter store layer.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            ThrottleError::Store(_) | ThrottleError::Redis(_) | ThrottleError::Serialization(_)
        )
    }
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_failure_classification() {
        assert!(ThrottleError::Store("down".to_string()).is_store_failure());
        assert!(ThrottleError::Serialization(serde_json::from_str::<u8>("x").unwrap_err()).is_store_failure());
        assert!(!ThrottleError::Internal("broken".to_string()).is_store_failure());
        assert!(!ThrottleError::Config("bad".to_string()).is_store_failure());
    }
}
