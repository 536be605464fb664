//! Persisted State Codec
//!
//! Checkpoint records are JSON wrapped in a small versioned envelope. A
//! record carries enough to rebuild every rule state of an entity without
//! replaying history.

use crate::error::{AlarmEngineError, Result};
use crate::evaluator::RuleLocalState;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use voltage_model::{Alarm, AlarmRuleId, EntityId, TenantId};

/// Current checkpoint format version
pub const CODEC_VERSION: u32 = 1;

/// Checkpointed state of one (entity, rule) pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedAlarmState {
    #[serde(default)]
    pub rule_state: RuleLocalState,
    /// Alarm currently raised by this rule, canonical stored form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_alarm: Option<Alarm>,
    #[serde(default)]
    pub last_eval_ts: i64,
    /// When the rule last cleared its alarm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cleared_ts: Option<i64>,
}

/// Checkpoint of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntityState {
    pub tenant_id: TenantId,
    pub entity_id: EntityId,
    #[serde(default)]
    pub alarm_states: BTreeMap<AlarmRuleId, PersistedAlarmState>,
}

impl PersistedEntityState {
    pub fn new(tenant_id: TenantId, entity_id: EntityId) -> Self {
        Self {
            tenant_id,
            entity_id,
            alarm_states: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.alarm_states.is_empty()
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    state: &'a PersistedEntityState,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    state: PersistedEntityState,
}

pub fn encode(state: &PersistedEntityState) -> Result<Bytes> {
    let data = serde_json::to_vec(&EnvelopeRef {
        version: CODEC_VERSION,
        state,
    })?;
    Ok(Bytes::from(data))
}

pub fn decode(record: &[u8]) -> Result<PersistedEntityState> {
    let envelope: Envelope = serde_json::from_slice(record)?;
    if envelope.version > CODEC_VERSION {
        return Err(AlarmEngineError::codec(format!(
            "checkpoint version {} is newer than supported version {}",
            envelope.version, CODEC_VERSION
        )));
    }
    Ok(envelope.state)
}
