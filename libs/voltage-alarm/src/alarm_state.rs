//! Alarm State Machine
//!
//! One instance per (entity, rule). Owns the evaluator's rule-local state and
//! the alarm currently raised for the pair. All predicate logic lives in the
//! condition evaluator; this type only turns verdicts into lifecycle requests.
//!
//! ```text
//! INACTIVE ──raise──▶ RAISED{ack?} ──clear──▶ CLEARED ──raise──▶ RAISED
//! ```

use crate::codec::PersistedAlarmState;
use crate::collaborators::EngineServices;
use crate::error::{AlarmEngineError, Result};
use crate::evaluator::{EvalInput, OwnerContext, RuleLocalState, Verdict};
use crate::snapshot::ValueSnapshot;
use crate::stats::EngineStats;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;
use voltage_model::{
    Alarm, AlarmId, AlarmLifecycleResult, AlarmModification, AlarmRule, AlarmRuleId,
    ConditionKey, EntityId, TenantId,
};

/// Externally visible lifecycle state of an (entity, rule) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmStatus {
    Inactive,
    Raised { acknowledged: bool },
    Cleared,
}

/// Outcome of one `AlarmRuleState::evaluate` call
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Whether the evaluator was invoked at all
    pub evaluated: bool,
    /// Whether anything that gets checkpointed moved
    pub state_changed: bool,
    pub result: AlarmLifecycleResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlarmRuleState {
    tenant_id: TenantId,
    entity_id: EntityId,
    rule_id: AlarmRuleId,
    local: RuleLocalState,
    current_alarm: Option<Alarm>,
    last_eval_ts: i64,
    last_cleared_ts: Option<i64>,
}

impl AlarmRuleState {
    /// Cold-start state
    pub fn new(tenant_id: TenantId, entity_id: EntityId, rule_id: AlarmRuleId) -> Self {
        Self {
            tenant_id,
            entity_id,
            rule_id,
            local: RuleLocalState::default(),
            current_alarm: None,
            last_eval_ts: 0,
            last_cleared_ts: None,
        }
    }

    /// Rebuild from a checkpoint entry
    pub fn restore(
        tenant_id: TenantId,
        entity_id: EntityId,
        rule_id: AlarmRuleId,
        persisted: &PersistedAlarmState,
    ) -> Self {
        Self {
            tenant_id,
            entity_id,
            rule_id,
            local: persisted.rule_state.clone(),
            current_alarm: persisted.current_alarm.clone(),
            last_eval_ts: persisted.last_eval_ts,
            last_cleared_ts: persisted.last_cleared_ts,
        }
    }

    pub fn to_persisted(&self) -> PersistedAlarmState {
        PersistedAlarmState {
            rule_state: self.local.clone(),
            current_alarm: self.current_alarm.clone(),
            last_eval_ts: self.last_eval_ts,
            last_cleared_ts: self.last_cleared_ts,
        }
    }

    pub fn rule_id(&self) -> AlarmRuleId {
        self.rule_id
    }

    pub fn current_alarm(&self) -> Option<&Alarm> {
        self.current_alarm.as_ref()
    }

    pub fn local_state(&self) -> &RuleLocalState {
        &self.local
    }

    pub fn status(&self) -> AlarmStatus {
        match (&self.current_alarm, self.last_cleared_ts) {
            (Some(alarm), _) => AlarmStatus::Raised {
                acknowledged: alarm.acknowledged,
            },
            (None, Some(_)) => AlarmStatus::Cleared,
            (None, None) => AlarmStatus::Inactive,
        }
    }

    /// Evaluate the rule and apply the verdict
    ///
    /// With `changed_keys` set, the evaluator only runs when the rule reads one
    /// of those keys. `None` (time tick) always evaluates.
    #[allow(clippy::too_many_arguments)]
    pub async fn evaluate(
        &mut self,
        rule: &AlarmRule,
        rule_keys: &HashSet<ConditionKey>,
        snapshot: &ValueSnapshot,
        changed_keys: Option<&HashSet<ConditionKey>>,
        ts: i64,
        owner: &OwnerContext,
        services: &EngineServices,
    ) -> Result<Evaluation> {
        if let Some(changed) = changed_keys {
            if rule_keys.is_disjoint(changed) {
                return Ok(Evaluation::default());
            }
        }

        let outcome = services
            .evaluator
            .evaluate(EvalInput {
                entity_id: &self.entity_id,
                rule,
                snapshot,
                changed_keys,
                ts,
                state: &self.local,
                current_alarm: self.current_alarm.as_ref(),
                owner,
            })
            .map_err(|e| AlarmEngineError::from_eval(self.rule_id, e))?;

        let mut state_changed = outcome.state != self.local;
        self.local = outcome.state;
        self.last_eval_ts = ts;

        let modification = match (outcome.verdict, &self.current_alarm) {
            (Verdict::Raise { severity, details }, None) => Some(AlarmModification::Create {
                tenant_id: self.tenant_id,
                originator: self.entity_id,
                customer_id: owner.customer_id,
                rule_id: self.rule_id,
                alarm_type: rule.alarm_type.clone(),
                severity,
                ts,
                details,
                propagation: rule.propagation.clone(),
            }),
            (Verdict::Raise { severity, details }, Some(alarm)) if alarm.severity != severity => {
                Some(AlarmModification::Update {
                    alarm_id: alarm.id,
                    severity,
                    ts,
                    details,
                })
            },
            (Verdict::Clear { details }, Some(alarm)) => Some(AlarmModification::Clear {
                alarm_id: alarm.id,
                ts,
                details,
            }),
            _ => None,
        };

        let Some(modification) = modification else {
            return Ok(Evaluation {
                evaluated: true,
                state_changed,
                result: AlarmLifecycleResult::noop(),
            });
        };

        let op = modification.op_name();
        let adopted = self.current_alarm.is_none();
        let clearing = matches!(modification, AlarmModification::Clear { .. });
        let mut result = services.alarm_api.apply(modification).await?;
        // A rolled-back round may already have applied this request; the
        // retry owns the transition the API reports back
        if result.successful && adopted && !result.created && !result.cleared {
            result.created = true;
        } else if !result.successful && clearing && result.alarm.as_ref().is_some_and(|a| a.cleared) {
            result.successful = true;
            result.cleared = true;
        }
        if result.successful {
            if result.cleared {
                self.current_alarm = None;
                self.last_cleared_ts = Some(ts);
                EngineStats::incr(&services.stats.alarms_cleared);
            } else {
                self.current_alarm = result.alarm.clone();
                if result.created {
                    EngineStats::incr(&services.stats.alarms_created);
                } else {
                    EngineStats::incr(&services.stats.alarms_updated);
                }
            }
            state_changed = true;
            debug!(
                "[{}] rule {} {} -> {:?}",
                self.entity_id,
                self.rule_id,
                op,
                self.status()
            );
        } else if self.current_alarm.is_some() {
            match &result.alarm {
                // Alarm vanished from persistence
                None => {
                    self.current_alarm = None;
                    state_changed = true;
                },
                Some(alarm) if alarm.cleared => {
                    self.current_alarm = None;
                    self.last_cleared_ts = Some(alarm.clear_ts.unwrap_or(ts));
                    state_changed = true;
                },
                Some(_) => {},
            }
        }

        Ok(Evaluation {
            evaluated: true,
            state_changed,
            result,
        })
    }

    /// Alarm cleared outside the engine
    pub fn on_external_clear(&mut self, alarm: &Alarm) -> bool {
        if !self.tracks(&alarm.id) {
            return false;
        }
        self.current_alarm = None;
        self.last_cleared_ts = Some(alarm.clear_ts.unwrap_or(alarm.end_ts));
        true
    }

    /// Alarm acknowledged outside the engine
    ///
    /// No lifecycle transition, but the stored copy and the evaluator's
    /// bookkeeping both learn about it.
    pub fn on_external_ack(&mut self, alarm: &Alarm, rule: &AlarmRule, services: &EngineServices) -> bool {
        let Some(current) = self.current_alarm.as_mut() else {
            return false;
        };
        if current.id != alarm.id || current.acknowledged {
            return false;
        }
        current.acknowledged = true;
        current.ack_ts = alarm.ack_ts;
        self.local = services.evaluator.on_acknowledged(rule, &self.local);
        true
    }

    /// Alarm deleted outside the engine
    pub fn on_external_delete(&mut self, alarm_id: &AlarmId) -> bool {
        if !self.tracks(alarm_id) {
            return false;
        }
        self.current_alarm = None;
        true
    }

    fn tracks(&self, alarm_id: &AlarmId) -> bool {
        self.current_alarm
            .as_ref()
            .is_some_and(|current| current.id == *alarm_id)
    }
}
