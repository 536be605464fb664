//! Shared fixtures for unit tests

use crate::collaborators::EngineServices;
use crate::evaluator::{ConditionEvaluator, EvalError, EvalInput, EvalOutcome, RuleLocalState, Verdict};
use crate::memory::{
    MemoryAlarmApi, MemoryRuleSource, RecordingNotifier, StaticOwnerResolver,
    StaticPartitionService,
};
use crate::stats::EngineStats;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use voltage_model::{AlarmRule, AlarmSeverity, ConditionKey, TenantId};
use voltage_rtdb::{ManualTimeProvider, MemoryRtdb};

/// Raises while `key > above`, clears otherwise
///
/// Configuration: `{"key": "temp", "above": 40, "severity": "MAJOR"}`.
/// A missing value clears. The rule-local state counts raise verdicts and
/// records acknowledgement.
#[derive(Default)]
pub struct ThresholdEvaluator {
    pub calls: AtomicUsize,
    pub quota_exhausted: AtomicBool,
}

impl ThresholdEvaluator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn key_of(rule: &AlarmRule) -> Result<ConditionKey, EvalError> {
        rule.configuration
            .get("key")
            .and_then(Value::as_str)
            .map(ConditionKey::time_series)
            .ok_or_else(|| EvalError::Invalid("missing key".into()))
    }
}

impl ConditionEvaluator for ThresholdEvaluator {
    fn referenced_keys(&self, rule: &AlarmRule) -> Result<HashSet<ConditionKey>, EvalError> {
        Ok(HashSet::from([Self::key_of(rule)?]))
    }

    fn evaluate(&self, input: EvalInput<'_>) -> Result<EvalOutcome, EvalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.quota_exhausted.load(Ordering::SeqCst) {
            return Err(EvalError::QuotaExceeded("too many evaluations".into()));
        }
        let config = &input.rule.configuration;
        let key = Self::key_of(input.rule)?;
        let above = config.get("above").and_then(Value::as_f64).unwrap_or(0.0);
        let severity: AlarmSeverity = config
            .get("severity")
            .cloned()
            .and_then(|s| serde_json::from_value(s).ok())
            .unwrap_or(AlarmSeverity::Major);

        let raises = input.state.0.get("raises").and_then(Value::as_u64).unwrap_or(0);
        let acked = input.state.0.get("acked").and_then(Value::as_bool).unwrap_or(false);
        let value = input.snapshot.value(&key).and_then(|v| v.as_f64());
        Ok(match value {
            Some(v) if v > above => EvalOutcome {
                verdict: Verdict::Raise {
                    severity,
                    details: json!({ "value": v }),
                },
                state: RuleLocalState(json!({ "raises": raises + 1, "acked": acked })),
            },
            _ => EvalOutcome {
                verdict: Verdict::Clear { details: json!({}) },
                state: input.state.clone(),
            },
        })
    }

    fn on_acknowledged(&self, _rule: &AlarmRule, state: &RuleLocalState) -> RuleLocalState {
        let mut next = state.0.clone();
        if let Some(object) = next.as_object_mut() {
            object.insert("acked".into(), json!(true));
        }
        RuleLocalState(next)
    }
}

pub struct Harness {
    pub rtdb: Arc<MemoryRtdb>,
    pub api: Arc<MemoryAlarmApi>,
    pub notifier: Arc<RecordingNotifier>,
    pub owners: Arc<StaticOwnerResolver>,
    pub partitions: Arc<StaticPartitionService>,
    pub rules: Arc<MemoryRuleSource>,
    pub evaluator: Arc<ThresholdEvaluator>,
    pub time: Arc<ManualTimeProvider>,
    pub services: Arc<EngineServices>,
}

impl Harness {
    pub fn new() -> Self {
        let rtdb = Arc::new(MemoryRtdb::new());
        let api = Arc::new(MemoryAlarmApi::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let owners = Arc::new(StaticOwnerResolver::new());
        let partitions = Arc::new(StaticPartitionService::new());
        let rules = Arc::new(MemoryRuleSource::new());
        let evaluator = Arc::new(ThresholdEvaluator::default());
        let time = Arc::new(ManualTimeProvider::new(1_000));
        let services = Arc::new(EngineServices {
            ts_store: rtdb.clone(),
            attr_store: rtdb.clone(),
            state_store: rtdb.clone(),
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
}

pub fn threshold_rule(tenant: TenantId, key: &str, above: f64) -> AlarmRule {
    AlarmRule::new(
        tenant,
        format!("{} above {}", key, above),
        json!({ "key": key, "above": above, "severity": "MAJOR" }),
    )
}
