//! Error types for voltage-rtdb

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure injected by a test backend
    #[error("Injected failure: {0}")]
    Injected(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// Whether the same call may succeed when retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_)
                | StoreError::Timeout(_)
                | StoreError::Io(_)
                | StoreError::Injected(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
