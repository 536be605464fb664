//! Model Layer Error Types

use thiserror::Error;

/// Result type for voltage-model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Model layer errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Entity id / entity type could not be parsed
    #[error("Invalid entity id: {0}")]
    InvalidEntityId(String),

    /// Rule definition failed validation
    #[error("Invalid alarm rule: {0}")]
    InvalidRule(String),
}

impl ModelError {
    pub fn invalid_entity(msg: impl Into<String>) -> Self {
        ModelError::InvalidEntityId(msg.into())
    }

    pub fn invalid_rule(msg: impl Into<String>) -> Self {
        ModelError::InvalidRule(msg.into())
    }
}
