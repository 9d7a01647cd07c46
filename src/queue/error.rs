//! Queue Manager error types (§4.1, §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("task metadata unreadable: {0}")]
    CorruptTask(String),
    #[error("task not found: {0}")]
    NotFound(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::BackendUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::CorruptTask(err.to_string())
    }
}
