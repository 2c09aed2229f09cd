use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AmasError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("lock timeout for user {user_id} after {timeout:?}")]
    LockTimeout { user_id: String, timeout: Duration },
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("operation cancelled")]
    Cancelled,
    #[error("model not found for user {0}")]
    ModelNotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("policy error: {0}")]
    Policy(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AmasError>;
