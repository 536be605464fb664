//! Common test utilities and helpers
#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use voltage_alarm::{
    ConditionEvaluator, EngineRegistry, EngineServices, EngineStats, EvalError, EvalInput,
    EvalOutcome, MemoryAlarmApi, MemoryRuleSource, RecordingNotifier, RuleLocalState,
    StaticOwnerResolver, StaticPartitionService, Verdict,
};
use voltage_model::{
    AlarmRule, AlarmRuleId, AlarmSeverity, AttributeScope, ConditionKey, ConditionKeyType, EntityEvent,
    EntityId, EventKind, TenantId,
};
use voltage_rtdb::{ManualTimeProvider, MemoryRtdb, StateStore};

// ============================================================================
// Condition evaluator
// ============================================================================

/// Raises after `consecutive` readings above `greaterThan`
///
/// Configuration:
/// ```json
/// {"key": "temp", "keyType": "TIME_SERIES", "greaterThan": 40,
///  "consecutive": 2, "severity": "MAJOR", "clearWhenMissing": true,
///  "enabledBy": "alarmEnabled"}
/// ```
/// A reading counts once, by its timestamp, so ticks do not extend a streak.
/// `enabledBy` names a boolean attribute that must be true to raise.
#[derive(Default)]
pub struct ConsecutiveThresholdEvaluator {
    calls: AtomicUsize,
    quota_exhausted: AtomicBool,
    exhausted_rules: parking_lot::Mutex<HashSet<AlarmRuleId>>,
}

struct Condition {
    key: ConditionKey,
    greater_than: f64,
    consecutive: u64,
    severity: AlarmSeverity,
    clear_when_missing: bool,
    enabled_by: Option<ConditionKey>,
}

impl Condition {
    fn parse(config: &Value) -> Result<Self, EvalError> {
        let name = config
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| EvalError::Invalid("missing key".into()))?;
        let kind: ConditionKeyType = match config.get("keyType") {
            Some(kind) => serde_json::from_value(kind.clone())
                .map_err(|e| EvalError::Invalid(e.to_string()))?,
            None => ConditionKeyType::TimeSeries,
        };
        Ok(Self {
            key: ConditionKey::new(kind, name),
            greater_than: config
                .get("greaterThan")
                .and_then(Value::as_f64)
                .ok_or_else(|| EvalError::Invalid("missing greaterThan".into()))?,
            consecutive: config.get("consecutive").and_then(Value::as_u64).unwrap_or(1),
            severity: config
                .get("severity")
                .cloned()
                .and_then(|s| serde_json::from_value(s).ok())
                .unwrap_or(AlarmSeverity::Major),
            clear_when_missing: config
                .get("clearWhenMissing")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            enabled_by: config
                .get("enabledBy")
                .and_then(Value::as_str)
                .map(ConditionKey::attribute),
        })
    }
}

impl ConsecutiveThresholdEvaluator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    pub fn exhaust_quota(&self, exhausted: bool) {
        self.quota_exhausted.store(exhausted, Ordering::SeqCst);
    }

    /// Quota errors for one rule only
    pub fn exhaust_quota_for(&self, rule_id: AlarmRuleId, exhausted: bool) {
        let mut rules = self.exhausted_rules.lock();
        if exhausted {
            rules.insert(rule_id);
        } else {
            rules.remove(&rule_id);
        }
    }
}

impl ConditionEvaluator for ConsecutiveThresholdEvaluator {
    fn referenced_keys(&self, rule: &AlarmRule) -> Result<HashSet<ConditionKey>, EvalError> {
        let condition = Condition::parse(&rule.configuration)?;
        let mut keys = HashSet::from([condition.key]);
        keys.extend(condition.enabled_by);
        Ok(keys)
    }

    fn evaluate(&self, input: EvalInput<'_>) -> Result<EvalOutcome, EvalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.quota_exhausted.load(Ordering::SeqCst)
            || self.exhausted_rules.lock().contains(&input.rule.id)
        {
            return Err(EvalError::QuotaExceeded("evaluation budget exhausted".into()));
        }
        let condition = Condition::parse(&input.rule.configuration)?;
        let mut streak = input.state.0.get("streak").and_then(Value::as_u64).unwrap_or(0);
        let mut last_ts = input.state.0.get("lastTs").and_then(Value::as_i64).unwrap_or(i64::MIN);

        let Some(entry) = input.snapshot.get(&condition.key) else {
            let verdict = if condition.clear_when_missing {
                Verdict::Clear {
                    details: json!({ "reason": "missing" }),
                }
            } else {
                Verdict::NoChange
            };
            return Ok(EvalOutcome {
                verdict,
                state: RuleLocalState(json!({ "streak": 0, "lastTs": last_ts })),
            });
        };

        if entry.ts > last_ts {
            let above = entry
                .value
                .as_f64()
                .is_some_and(|v| v > condition.greater_than);
            streak = if above { streak + 1 } else { 0 };
            last_ts = entry.ts;
        }
        let enabled = condition.enabled_by.as_ref().map_or(true, |key| {
            input.snapshot.value(key).and_then(|v| v.as_bool()) == Some(true)
        });

        let verdict = if streak >= condition.consecutive && enabled {
            Verdict::Raise {
                severity: condition.severity,
                details: json!({ "streak": streak }),
            }
        } else if streak == 0 {
            Verdict::Clear { details: json!({}) }
        } else {
            Verdict::NoChange
        };
        Ok(EvalOutcome {
            verdict,
            state: RuleLocalState(json!({ "streak": streak, "lastTs": last_ts })),
        })
    }
}

// ============================================================================
// Environment
// ============================================================================

pub struct TestEnv {
    pub tenant: TenantId,
    pub rtdb: Arc<MemoryRtdb>,
    pub api: Arc<MemoryAlarmApi>,
    pub notifier: Arc<RecordingNotifier>,
    pub owners: Arc<StaticOwnerResolver>,
    pub partitions: Arc<StaticPartitionService>,
    pub rules: Arc<MemoryRuleSource>,
    pub evaluator: Arc<ConsecutiveThresholdEvaluator>,
    pub time: Arc<ManualTimeProvider>,
    pub services: Arc<EngineServices>,
}

impl TestEnv {
    pub fn new() -> Self {
        let rtdb = Arc::new(MemoryRtdb::new());
        Self::build(rtdb.clone(), rtdb)
    }

    /// Same collaborators, checkpoints in `state_store`
    pub fn with_state_store(state_store: Arc<dyn StateStore>) -> Self {
        Self::build(Arc::new(MemoryRtdb::new()), state_store)
    }

    fn build(rtdb: Arc<MemoryRtdb>, state_store: Arc<dyn StateStore>) -> Self {
        let api = Arc::new(MemoryAlarmApi::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let owners = Arc::new(StaticOwnerResolver::new());
        let partitions = Arc::new(StaticPartitionService::new());
        let rules = Arc::new(MemoryRuleSource::new());
        let evaluator = Arc::new(ConsecutiveThresholdEvaluator::default());
        let time = Arc::new(ManualTimeProvider::new(1_000_000));
        let services = Arc::new(EngineServices {
            ts_store: rtdb.clone(),
            attr_store: rtdb.clone(),
            state_store,
            evaluator: evaluator.clone(),
            alarm_api: api.clone(),
            notifier: notifier.clone(),
            owner_resolver: owners.clone(),
            partitions: partitions.clone(),
            rule_source: rules.clone(),
            time: time.clone(),
            stats: Arc::new(EngineStats::default()),
        });
        Self {
            tenant: TenantId::random(),
            rtdb,
            api,
            notifier,
            owners,
            partitions,
            rules,
            evaluator,
            time,
            services,
        }
    }

    /// Same tenant, rules and stores with fresh engine services reading
    /// checkpoints from `state_store`, as after a process restart
    pub fn restart_with_state_store(&self, state_store: Arc<dyn StateStore>) -> Self {
        let services = Arc::new(EngineServices {
            ts_store: self.rtdb.clone(),
            attr_store: self.rtdb.clone(),
            state_store,
            evaluator: self.evaluator.clone(),
            alarm_api: self.api.clone(),
            notifier: self.notifier.clone(),
            owner_resolver: self.owners.clone(),
            partitions: self.partitions.clone(),
            rule_source: self.rules.clone(),
            time: self.time.clone(),
            stats: Arc::new(EngineStats::default()),
        });
        Self {
            tenant: self.tenant,
            rtdb: self.rtdb.clone(),
            api: self.api.clone(),
            notifier: self.notifier.clone(),
            owners: self.owners.clone(),
            partitions: self.partitions.clone(),
            rules: self.rules.clone(),
            evaluator: self.evaluator.clone(),
            time: self.time.clone(),
            services,
        }
    }

    /// Same collaborators with a fresh registry, as after a restart
    pub fn registry(&self) -> EngineRegistry {
        EngineRegistry::new(self.services.clone())
    }

    /// Store a rule in the rule source
    pub fn add_rule(&self, name: &str, configuration: Value) -> AlarmRule {
        let rule = AlarmRule::new(self.tenant, name, configuration);
        self.rules
            .upsert(rule.clone())
            .unwrap_or_else(|e| panic!("rule rejected: {}", e));
        rule
    }

    /// `temp > 40` for `consecutive` readings
    pub fn high_temp_rule(&self, consecutive: u64) -> AlarmRule {
        self.add_rule(
            "High Temperature",
            json!({ "key": "temp", "greaterThan": 40, "consecutive": consecutive }),
        )
    }

    pub fn telemetry(&self, entity: EntityId, ts: i64, payload: Value) -> EntityEvent {
        EntityEvent::telemetry(self.tenant, entity, ts, payload)
    }

    pub fn attributes(&self, entity: EntityId, ts: i64, scope: AttributeScope, payload: Value) -> EntityEvent {
        EntityEvent::new(self.tenant, entity, EventKind::AttributesUpdated, ts, payload).with_scope(scope)
    }

    pub fn attributes_deleted(&self, entity: EntityId, ts: i64, keys: &[&str]) -> EntityEvent {
        EntityEvent::new(
            self.tenant,
            entity,
            EventKind::AttributesDeleted,
            ts,
            json!({ "attributes": keys }),
        )
    }
}
