use std::fmt;

use tokio::task::JoinError;

use crate::types::PoolId;

/// Unified error type for harness operations
#[derive(Debug)]
pub enum Error {
    /// Configuration rejected before any run started
    InvalidConfig(String),

    /// A buffer was returned to a pool that did not issue it
    ForeignBuffer { pool: PoolId, owner: PoolId },

    /// Write attempted after the hand-off channel was completed
    ChannelCompleted,

    /// An execution context panicked or was aborted
    ContextFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::ForeignBuffer { pool, owner } => write!(
                f,
                "Buffer owned by pool {} returned to pool {}",
                owner, pool
            ),
            Error::ChannelCompleted => write!(f, "Write to completed hand-off channel"),
            Error::ContextFailed(msg) => write!(f, "Execution context failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        Error::ContextFailed(e.to_string())
    }
}

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_buffer_display() {
        let err = Error::ForeignBuffer {
            pool: PoolId::new(2),
            owner: PoolId::new(1),
        };
        assert_eq!(err.to_string(), "Buffer owned by pool 1 returned to pool 2");
    }

    #[test]
    fn test_invalid_config_display() {
        let err = Error::InvalidConfig("rental size must be positive".into());
        assert!(err.to_string().contains("rental size"));
    }
}
