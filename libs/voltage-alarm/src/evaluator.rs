//! Condition Evaluator contract
//!
//! The engine never interprets a rule's condition. It asks the evaluator
//! which keys a rule reads, and hands it the snapshot plus the rule-local
//! state it returned last time. The evaluator is a pure function of its
//! inputs; any memory it needs between calls lives in `RuleLocalState`.

use crate::snapshot::ValueSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use voltage_model::{Alarm, AlarmRule, AlarmSeverity, ConditionKey, CustomerId, EntityId};

/// Opaque evaluator bookkeeping for one (entity, rule) pair
///
/// `Null` is the cold-start state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleLocalState(pub Value);

/// Owner information available to dynamic conditions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerContext {
    pub customer_id: Option<CustomerId>,
}

/// Everything the evaluator may look at for one call
#[derive(Debug, Clone, Copy)]
pub struct EvalInput<'a> {
    pub entity_id: &'a EntityId,
    pub rule: &'a AlarmRule,
    pub snapshot: &'a ValueSnapshot,
    /// Keys changed by the triggering update; `None` on a time tick
    pub changed_keys: Option<&'a HashSet<ConditionKey>>,
    /// Timestamp of the triggering update or tick
    pub ts: i64,
    pub state: &'a RuleLocalState,
    pub current_alarm: Option<&'a Alarm>,
    pub owner: &'a OwnerContext,
}

/// Alarm decision of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Create condition holds at `severity`
    Raise { severity: AlarmSeverity, details: Value },
    /// Clear condition holds
    Clear { details: Value },
    /// Neither condition fired
    NoChange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub verdict: Verdict,
    pub state: RuleLocalState,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// Rate/quota limit hit while evaluating
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Rule configuration cannot be evaluated
    #[error("invalid rule configuration: {0}")]
    Invalid(String),
}

pub trait ConditionEvaluator: Send + Sync + 'static {
    /// Condition keys read by `rule`
    fn referenced_keys(&self, rule: &AlarmRule) -> Result<HashSet<ConditionKey>, EvalError>;

    /// Evaluate `rule` against the snapshot
    fn evaluate(&self, input: EvalInput<'_>) -> Result<EvalOutcome, EvalError>;

    /// Called when the raised alarm was acknowledged externally
    ///
    /// Lets escalation bookkeeping that counts unacknowledged time reset.
    fn on_acknowledged(&self, _rule: &AlarmRule, state: &RuleLocalState) -> RuleLocalState {
        state.clone()
    }
}
