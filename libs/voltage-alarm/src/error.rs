//! Alarm Engine Error Types

use crate::evaluator::EvalError;
use thiserror::Error;
use voltage_model::{AlarmRuleId, EntityId};
use voltage_rtdb::StoreError;

/// Result type for alarm engine operations
pub type Result<T> = std::result::Result<T, AlarmEngineError>;

/// Alarm engine errors
#[derive(Debug, Error)]
pub enum AlarmEngineError {
    /// Storage read/write failed during hydration or checkpointing
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Checkpoint record could not be encoded or decoded
    #[error("Checkpoint codec error: {0}")]
    Codec(String),

    /// Event payload could not be parsed
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Evaluation of a rule hit a rate/quota limit
    #[error("Quota exceeded for rule {rule_id}: {message}")]
    QuotaExceeded {
        rule_id: AlarmRuleId,
        message: String,
    },

    /// Condition evaluator rejected the rule or its inputs
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Alarm persistence failed
    #[error("Alarm API error: {0}")]
    AlarmApi(String),

    /// Entity is not (or no longer) partitioned to this process
    #[error("Entity {0} is not owned by this node")]
    NotOwned(EntityId),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine is stopping
    #[error("Engine is shutting down")]
    Shutdown,

    /// Worker queue rejected the job
    #[error("Queue error: {0}")]
    Queue(String),
}

impl AlarmEngineError {
    pub fn codec(msg: impl Into<String>) -> Self {
        AlarmEngineError::Codec(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        AlarmEngineError::MalformedPayload(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        AlarmEngineError::Config(msg.into())
    }

    /// Attach the failing rule to an evaluator error
    pub fn from_eval(rule_id: AlarmRuleId, err: EvalError) -> Self {
        match err {
            EvalError::QuotaExceeded(message) => AlarmEngineError::QuotaExceeded { rule_id, message },
            EvalError::Invalid(message) => {
                AlarmEngineError::Evaluation(format!("rule {}: {}", rule_id, message))
            },
        }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            AlarmEngineError::Store(_) => "ALARM_STORE",
            AlarmEngineError::Codec(_) => "ALARM_CODEC",
            AlarmEngineError::MalformedPayload(_) => "ALARM_MALFORMED_PAYLOAD",
            AlarmEngineError::QuotaExceeded { .. } => "ALARM_QUOTA_EXCEEDED",
            AlarmEngineError::Evaluation(_) => "ALARM_EVALUATION",
            AlarmEngineError::AlarmApi(_) => "ALARM_API",
            AlarmEngineError::NotOwned(_) => "ALARM_NOT_OWNED",
            AlarmEngineError::Config(_) => "ALARM_CONFIG",
            AlarmEngineError::Shutdown => "ALARM_SHUTDOWN",
            AlarmEngineError::Queue(_) => "ALARM_QUEUE",
        }
    }

    /// Whether redelivering the same event may succeed
    ///
    /// The engine never retries on its own; this only informs the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            AlarmEngineError::Store(e) => e.is_retryable(),
            AlarmEngineError::AlarmApi(_)
            | AlarmEngineError::NotOwned(_)
            | AlarmEngineError::Shutdown
            | AlarmEngineError::Queue(_) => true,
            AlarmEngineError::Codec(_)
            | AlarmEngineError::MalformedPayload(_)
            | AlarmEngineError::QuotaExceeded { .. }
            | AlarmEngineError::Evaluation(_)
            | AlarmEngineError::Config(_) => false,
        }
    }

    /// Suggested log level when the error reaches the event caller
    pub fn log_level(&self) -> tracing::Level {
        match self {
            AlarmEngineError::NotOwned(_) | AlarmEngineError::Shutdown => tracing::Level::DEBUG,
            AlarmEngineError::MalformedPayload(_) | AlarmEngineError::QuotaExceeded { .. } => {
                tracing::Level::WARN
            },
            _ => tracing::Level::ERROR,
        }
    }
}

impl From<serde_json::Error> for AlarmEngineError {
    fn from(err: serde_json::Error) -> Self {
        AlarmEngineError::Codec(err.to_string())
    }
}

impl From<figment::Error> for AlarmEngineError {
    fn from(err: figment::Error) -> Self {
        AlarmEngineError::Config(err.to_string())
    }
}
