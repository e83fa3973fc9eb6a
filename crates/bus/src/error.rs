use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to encode bus envelope: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("bus publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("bus is shut down")]
    Closed,
}

impl BusError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Redis(_) | BusError::Timeout(_))
    }
}

pub type BusResult<T> = Result<T, BusError>;
