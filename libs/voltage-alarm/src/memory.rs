//! In-memory collaborators
//!
//! Used by tests and embedded deployments. Together with `MemoryRtdb` they
//! make a fully self-contained engine.

use crate::collaborators::{
    AlarmApi, AlarmNotifier, OwnerResolver, PartitionService, ResolvedRules, RuleSource,
};
use crate::error::{AlarmEngineError, Result};
use crate::evaluator::OwnerContext;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use voltage_model::{
    Alarm, AlarmId, AlarmLifecycleResult, AlarmModification, AlarmRule, AlarmRuleId, CustomerId,
    EntityId, EntityType, ProfileId, TenantId,
};

// ============================================================================
// Alarm persistence
// ============================================================================

/// Alarm store keyed by alarm id, with an index of active alarms per
/// (originator, rule)
#[derive(Default)]
pub struct MemoryAlarmApi {
    alarms: DashMap<AlarmId, Alarm>,
    active: DashMap<(EntityId, AlarmRuleId), AlarmId>,
    requests: AtomicU64,
    fault: RwLock<Option<String>>,
}

impl MemoryAlarmApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent request fail (`None` to heal)
    pub fn fail_requests(&self, reason: Option<&str>) {
        *self.fault.write() = reason.map(str::to_string);
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn get(&self, alarm_id: &AlarmId) -> Option<Alarm> {
        self.alarms.get(alarm_id).map(|a| a.value().clone())
    }

    pub fn active_alarm(&self, originator: &EntityId, rule_id: &AlarmRuleId) -> Option<Alarm> {
        let id = *self.active.get(&(*originator, *rule_id))?;
        self.get(&id)
    }

    pub fn alarms_of(&self, originator: &EntityId) -> Vec<Alarm> {
        let mut alarms: Vec<Alarm> = self
            .alarms
            .iter()
            .filter(|a| a.originator == *originator)
            .map(|a| a.value().clone())
            .collect();
        alarms.sort_by_key(|a| a.start_ts);
        alarms
    }

    /// Acknowledge outside the engine (operator action)
    pub fn acknowledge(&self, alarm_id: &AlarmId, ts: i64) -> Option<Alarm> {
        let mut alarm = self.alarms.get_mut(alarm_id)?;
        alarm.acknowledged = true;
        alarm.ack_ts = Some(ts);
        Some(alarm.clone())
    }

    /// Clear outside the engine (operator action)
    pub fn clear_manually(&self, alarm_id: &AlarmId, ts: i64) -> Option<Alarm> {
        let cleared = {
            let mut alarm = self.alarms.get_mut(alarm_id)?;
            alarm.cleared = true;
            alarm.clear_ts = Some(ts);
            alarm.end_ts = ts;
            alarm.clone()
        };
        self.unindex(&cleared);
        Some(cleared)
    }

    /// Delete outside the engine
    pub fn delete(&self, alarm_id: &AlarmId) -> Option<Alarm> {
        let (_, alarm) = self.alarms.remove(alarm_id)?;
        self.unindex(&alarm);
        Some(alarm)
    }

    fn unindex(&self, alarm: &Alarm) {
        if let Some(rule_id) = alarm.rule_id {
            self.active
                .remove_if(&(alarm.originator, rule_id), |_, id| *id == alarm.id);
        }
    }

    fn propagated_entities(alarm: &Alarm) -> Vec<EntityId> {
        let mut entities = vec![alarm.originator];
        if alarm.propagation.propagate_to_owner {
            if let Some(customer) = alarm.customer_id {
                entities.push(EntityId::new(EntityType::Customer, *customer.as_uuid()));
            }
        }
        if alarm.propagation.propagate_to_tenant {
            entities.push(EntityId::new(EntityType::Tenant, *alarm.tenant_id.as_uuid()));
        }
        entities
    }

    fn modify(
        &self,
        alarm_id: &AlarmId,
        apply: impl FnOnce(&mut Alarm) -> bool,
    ) -> AlarmLifecycleResult {
        let Some(mut alarm) = self.alarms.get_mut(alarm_id) else {
            return AlarmLifecycleResult::noop();
        };
        let old = alarm.value().clone();
        if !apply(alarm.value_mut()) {
            return AlarmLifecycleResult {
                alarm: Some(old),
                ..Default::default()
            };
        }
        let current = alarm.value().clone();
        drop(alarm);
        AlarmLifecycleResult {
            successful: true,
            modified: true,
            cleared: current.cleared,
            propagated_entities: Self::propagated_entities(&current),
            alarm: Some(current),
            old: Some(old),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AlarmApi for MemoryAlarmApi {
    async fn apply(&self, modification: AlarmModification) -> Result<AlarmLifecycleResult> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if let Some(reason) = self.fault.read().as_ref() {
            return Err(AlarmEngineError::AlarmApi(reason.clone()));
        }

        let result = match modification {
            AlarmModification::Create {
                tenant_id,
                originator,
                customer_id,
                rule_id,
                alarm_type,
                severity,
                ts,
                details,
                propagation,
            } => {
                let existing = self.active.get(&(originator, rule_id)).map(|id| *id);
                if let Some(alarm_id) = existing {
                    // Same (originator, rule) already raised: converge on it
                    let mut result = self.modify(&alarm_id, |alarm| {
                        let changed = alarm.severity != severity;
                        alarm.severity = severity;
                        alarm.end_ts = alarm.end_ts.max(ts);
                        alarm.details = details;
                        changed
                    });
                    result.successful = result.alarm.is_some();
                    if result.propagated_entities.is_empty() {
                        if let Some(alarm) = &result.alarm {
                            result.propagated_entities = Self::propagated_entities(alarm);
                        }
                    }
                    result
                } else {
                    let alarm = Alarm {
                        id: AlarmId::random(),
                        tenant_id,
                        originator,
                        customer_id,
                        alarm_type,
                        rule_id: Some(rule_id),
                        severity,
                        acknowledged: false,
                        cleared: false,
                        start_ts: ts,
                        end_ts: ts,
                        ack_ts: None,
                        clear_ts: None,
                        details,
                        propagation,
                    };
                    self.alarms.insert(alarm.id, alarm.clone());
                    self.active.insert((originator, rule_id), alarm.id);
                    AlarmLifecycleResult {
                        successful: true,
                        created: true,
                        propagated_entities: Self::propagated_entities(&alarm),
                        alarm: Some(alarm),
                        ..Default::default()
                    }
                }
            },
            AlarmModification::Update {
                alarm_id,
                severity,
                ts,
                details,
            } => self.modify(&alarm_id, |alarm| {
                if alarm.cleared {
                    return false;
                }
                alarm.severity = severity;
                alarm.end_ts = alarm.end_ts.max(ts);
                alarm.details = details;
                true
            }),
            AlarmModification::Clear {
                alarm_id,
                ts,
                details,
            } => {
                let result = self.modify(&alarm_id, |alarm| {
                    if alarm.cleared {
                        return false;
                    }
                    alarm.cleared = true;
                    alarm.clear_ts = Some(ts);
                    alarm.end_ts = alarm.end_ts.max(ts);
                    alarm.details = details;
                    true
                });
                if result.cleared {
                    if let Some(alarm) = &result.alarm {
                        self.unindex(alarm);
                    }
                }
                result
            },
        };
        Ok(result)
    }
}

// ============================================================================
// Notification sink
// ============================================================================

/// Records every lifecycle result it is handed
#[derive(Default)]
pub struct RecordingNotifier {
    results: Mutex<Vec<(EntityId, AlarmLifecycleResult)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<(EntityId, AlarmLifecycleResult)> {
        self.results.lock().clone()
    }

    pub fn created_count(&self) -> usize {
        self.results.lock().iter().filter(|(_, r)| r.created).count()
    }

    pub fn cleared_count(&self) -> usize {
        self.results.lock().iter().filter(|(_, r)| r.cleared).count()
    }

    pub fn clear(&self) {
        self.results.lock().clear();
    }
}

#[async_trait]
impl AlarmNotifier for RecordingNotifier {
    async fn notify(&self, entity_id: &EntityId, result: &AlarmLifecycleResult) {
        self.results.lock().push((*entity_id, result.clone()));
    }
}

// ============================================================================
// Owner resolution
// ============================================================================

#[derive(Default)]
pub struct StaticOwnerResolver {
    owners: DashMap<EntityId, CustomerId>,
    lookups: AtomicU64,
}

impl StaticOwnerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_owner(&self, entity_id: EntityId, customer_id: Option<CustomerId>) {
        match customer_id {
            Some(customer) => {
                self.owners.insert(entity_id, customer);
            },
            None => {
                self.owners.remove(&entity_id);
            },
        }
    }

    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OwnerResolver for StaticOwnerResolver {
    async fn resolve(&self, _tenant_id: &TenantId, entity_id: &EntityId) -> Result<OwnerContext> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(OwnerContext {
            customer_id: self.owners.get(entity_id).map(|c| *c),
        })
    }
}

// ============================================================================
// Partitioning
// ============================================================================

/// Owns every entity except the ones explicitly released
#[derive(Default)]
pub struct StaticPartitionService {
    released: DashSet<EntityId>,
}

impl StaticPartitionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entity moved to another node
    pub fn release(&self, entity_id: EntityId) {
        self.released.insert(entity_id);
    }

    /// Entity is ours again
    pub fn acquire(&self, entity_id: &EntityId) {
        self.released.remove(entity_id);
    }
}

impl PartitionService for StaticPartitionService {
    fn is_mine(&self, _tenant_id: &TenantId, entity_id: &EntityId) -> bool {
        !self.released.contains(entity_id)
    }
}

// ============================================================================
// Rule source
// ============================================================================

#[derive(Default)]
pub struct MemoryRuleSource {
    rules: DashMap<TenantId, DashMap<AlarmRuleId, AlarmRule>>,
    profiles: DashMap<EntityId, ProfileId>,
    resolves: AtomicU64,
}

impl MemoryRuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rule definition
    pub fn upsert(&self, rule: AlarmRule) -> Result<()> {
        rule.validate()
            .map_err(|e| AlarmEngineError::Evaluation(e.to_string()))?;
        debug!("Rule {} ({}) stored", rule.id, rule.name);
        self.rules
            .entry(rule.tenant_id)
            .or_default()
            .insert(rule.id, rule);
        Ok(())
    }

    pub fn remove(&self, tenant_id: &TenantId, rule_id: &AlarmRuleId) -> Option<AlarmRule> {
        self.rules
            .get(tenant_id)
            .and_then(|rules| rules.remove(rule_id).map(|(_, rule)| rule))
    }

    pub fn remove_tenant(&self, tenant_id: &TenantId) {
        self.rules.remove(tenant_id);
    }

    pub fn set_profile(&self, entity_id: EntityId, profile_id: ProfileId) {
        self.profiles.insert(entity_id, profile_id);
    }

    pub fn resolve_count(&self) -> u64 {
        self.resolves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RuleSource for MemoryRuleSource {
    async fn resolve(&self, tenant_id: &TenantId, entity_id: &EntityId) -> Result<ResolvedRules> {
        self.resolves.fetch_add(1, Ordering::Relaxed);
        let profile_id = self.profiles.get(entity_id).map(|p| *p);
        let mut rules: Vec<AlarmRule> = self
            .rules
            .get(tenant_id)
            .map(|rules| {
                rules
                    .iter()
                    .filter(|r| r.applies_to(entity_id, profile_id.as_ref()))
                    .map(|r| r.value().clone())
                    .collect()
            })
            .unwrap_or_default();
        rules.sort_by_key(|r| r.id);
        Ok(ResolvedRules { profile_id, rules })
    }
}
