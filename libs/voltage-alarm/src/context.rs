//! Entity Evaluation Context
//!
//! Single point of mutation for one entity: its value snapshot, the rules
//! that apply to it and one alarm state machine per rule. The registry wraps
//! every context in a mutex, so everything here runs for one event at a time.
//!
//! An event is applied as a round: merge, evaluate the affected rules, then
//! checkpoint if any rule state moved. A failed round restores the in-memory
//! state it started from, so redelivering the event is safe. A quota error
//! only drops the failing rule's state; the other rules finish the round.

use crate::alarm_state::{AlarmRuleState, AlarmStatus};
use crate::codec::{self, PersistedAlarmState, PersistedEntityState};
use crate::collaborators::{EngineServices, ResolvedRules};
use crate::error::{AlarmEngineError, Result};
use crate::evaluator::{ConditionEvaluator, OwnerContext};
use crate::payload::{self, TelemetryBatch};
use crate::snapshot::{self, ValueSnapshot};
use crate::stats::EngineStats;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};
use voltage_model::{
    Alarm, AlarmLifecycleResult, AlarmRule, AlarmRuleId, AttributeKvEntry, ConditionKey,
    EntityEvent, EntityId, EventKind, ProfileId, TenantId,
};

/// Result of one event or tick round
#[derive(Debug, Clone, Default)]
pub struct EventReport {
    /// Successful lifecycle transitions, in evaluation order
    pub results: Vec<AlarmLifecycleResult>,
    /// Rules whose evaluator was invoked
    pub evaluated_rules: usize,
    pub state_changed: bool,
    pub checkpointed: bool,
    /// Rules whose state was discarded after a quota error, with the message
    pub discarded: Vec<(AlarmRuleId, String)>,
}

impl EventReport {
    pub fn created(&self) -> usize {
        self.results.iter().filter(|r| r.created).count()
    }

    pub fn cleared(&self) -> usize {
        self.results.iter().filter(|r| r.cleared).count()
    }

    fn is_discarded(&self, rule_id: &AlarmRuleId) -> bool {
        self.discarded.iter().any(|(id, _)| id == rule_id)
    }

    /// The first quota failure of a round that otherwise completed
    fn into_result(self) -> Result<Self> {
        match self.discarded.first() {
            Some((rule_id, message)) => Err(AlarmEngineError::QuotaExceeded {
                rule_id: *rule_id,
                message: message.clone(),
            }),
            None => Ok(self),
        }
    }
}

/// A rule together with the keys it reads
#[derive(Debug, Clone)]
struct RuleEntry {
    rule: AlarmRule,
    keys: HashSet<ConditionKey>,
}

/// Fully parsed event, ready to apply
enum EventInput {
    Telemetry(TelemetryBatch),
    Attributes(Vec<AttributeKvEntry>),
    AttributesDeleted(Vec<String>),
    AlarmAck(Alarm),
    AlarmClear(Alarm),
    AlarmDelete(Alarm),
    OwnerChanged,
    Ignored,
}

impl EventInput {
    fn parse(event: &EntityEvent) -> Result<Self> {
        Ok(match event.kind {
            EventKind::PostTelemetry => {
                EventInput::Telemetry(payload::parse_telemetry(&event.payload, event.ts)?)
            },
            EventKind::PostAttributes | EventKind::AttributesUpdated => {
                EventInput::Attributes(payload::parse_attributes(&event.payload, event.ts)?)
            },
            EventKind::AttributesDeleted => {
                EventInput::AttributesDeleted(payload::parse_deleted_keys(&event.payload)?)
            },
            EventKind::Activity | EventKind::Inactivity => match event.scope {
                Some(_) => EventInput::Attributes(payload::parse_attributes(&event.payload, event.ts)?),
                None => EventInput::Telemetry(payload::parse_telemetry(&event.payload, event.ts)?),
            },
            EventKind::AlarmAck => EventInput::AlarmAck(payload::parse_alarm(&event.payload)?),
            EventKind::AlarmClear => EventInput::AlarmClear(payload::parse_alarm(&event.payload)?),
            EventKind::AlarmDelete => EventInput::AlarmDelete(payload::parse_alarm(&event.payload)?),
            EventKind::EntityAssigned | EventKind::EntityUnassigned => EventInput::OwnerChanged,
            EventKind::Other => EventInput::Ignored,
        })
    }
}

/// In-memory state captured before a round
struct Backup {
    snapshot: Option<ValueSnapshot>,
    states: BTreeMap<AlarmRuleId, AlarmRuleState>,
    owner: Option<OwnerContext>,
}

fn seed_state(
    tenant_id: TenantId,
    entity_id: EntityId,
    rule_id: AlarmRuleId,
    persisted: &BTreeMap<AlarmRuleId, PersistedAlarmState>,
) -> AlarmRuleState {
    match persisted.get(&rule_id) {
        Some(saved) => AlarmRuleState::restore(tenant_id, entity_id, rule_id, saved),
        None => AlarmRuleState::new(tenant_id, entity_id, rule_id),
    }
}

pub struct EntityContext {
    tenant_id: TenantId,
    entity_id: EntityId,
    profile_id: Option<ProfileId>,
    rules: BTreeMap<AlarmRuleId, RuleEntry>,
    states: BTreeMap<AlarmRuleId, AlarmRuleState>,
    /// Contents of the last durable checkpoint
    persisted: BTreeMap<AlarmRuleId, PersistedAlarmState>,
    /// `None` until the first event or tick
    snapshot: Option<ValueSnapshot>,
    /// `None` until resolved, reset by ownership changes
    owner: Option<OwnerContext>,
    evicted: bool,
}

impl EntityContext {
    /// Build a context from resolved rules and the entity's checkpoint
    ///
    /// No storage access happens here; the snapshot is hydrated lazily.
    pub fn new(
        tenant_id: TenantId,
        entity_id: EntityId,
        resolved: ResolvedRules,
        checkpoint: Option<PersistedEntityState>,
        evaluator: &dyn ConditionEvaluator,
    ) -> Self {
        let persisted = checkpoint.map(|c| c.alarm_states).unwrap_or_default();
        let mut ctx = Self {
            tenant_id,
            entity_id,
            profile_id: resolved.profile_id,
            rules: BTreeMap::new(),
            states: BTreeMap::new(),
            persisted,
            snapshot: None,
            owner: None,
            evicted: false,
        };
        for rule in resolved.rules {
            match evaluator.referenced_keys(&rule) {
                Ok(keys) => {
                    let state = seed_state(tenant_id, entity_id, rule.id, &ctx.persisted);
                    ctx.states.insert(rule.id, state);
                    ctx.rules.insert(rule.id, RuleEntry { rule, keys });
                },
                Err(e) => warn!("[{}] rule {} skipped: {}", entity_id, rule.id, e),
            }
        }
        ctx
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn profile_id(&self) -> Option<&ProfileId> {
        self.profile_id.as_ref()
    }

    pub fn has_rule(&self, rule_id: &AlarmRuleId) -> bool {
        self.rules.contains_key(rule_id)
    }

    pub fn rule_ids(&self) -> Vec<AlarmRuleId> {
        self.rules.keys().copied().collect()
    }

    /// True once every rule is gone; the registry may evict the context
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    pub fn is_hydrated(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn snapshot(&self) -> Option<&ValueSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn rule_status(&self, rule_id: &AlarmRuleId) -> Option<AlarmStatus> {
        if !self.rules.contains_key(rule_id) {
            return None;
        }
        Some(
            self.states
                .get(rule_id)
                .map(AlarmRuleState::status)
                .unwrap_or(AlarmStatus::Inactive),
        )
    }

    pub fn rule_state(&self, rule_id: &AlarmRuleId) -> Option<&AlarmRuleState> {
        self.states.get(rule_id)
    }

    /// Union of the keys read by all rules
    fn all_keys(&self) -> HashSet<ConditionKey> {
        self.rules
            .values()
            .flat_map(|entry| entry.keys.iter().cloned())
            .collect()
    }

    // ========================================================================
    // Rule lifecycle
    // ========================================================================

    /// Register a rule; no-op when it is already tracked
    pub async fn add_rule(&mut self, rule: AlarmRule, services: &EngineServices) -> Result<bool> {
        if self.rules.contains_key(&rule.id) {
            return Ok(false);
        }
        let keys = services
            .evaluator
            .referenced_keys(&rule)
            .map_err(|e| AlarmEngineError::from_eval(rule.id, e))?;
        self.fetch_new_keys(&keys, services).await?;

        let state = seed_state(self.tenant_id, self.entity_id, rule.id, &self.persisted);
        debug!("[{}] rule {} added", self.entity_id, rule.id);
        self.states.insert(rule.id, state);
        self.rules.insert(rule.id, RuleEntry { rule, keys });
        Ok(true)
    }

    /// Replace a rule definition, keeping its evaluation state
    pub async fn update_rule(&mut self, rule: AlarmRule, services: &EngineServices) -> Result<()> {
        if !self.rules.contains_key(&rule.id) {
            self.add_rule(rule, services).await?;
            return Ok(());
        }
        let keys = services
            .evaluator
            .referenced_keys(&rule)
            .map_err(|e| AlarmEngineError::from_eval(rule.id, e))?;
        self.fetch_new_keys(&keys, services).await?;

        let rule_id = rule.id;
        self.rules.insert(rule_id, RuleEntry { rule, keys });
        self.states.entry(rule_id).or_insert_with(|| {
            seed_state(self.tenant_id, self.entity_id, rule_id, &self.persisted)
        });
        let all_keys = self.all_keys();
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.retain_keys(&all_keys);
        }
        debug!("[{}] rule {} updated", self.entity_id, rule_id);
        Ok(())
    }

    /// Drop rules and their state
    ///
    /// Returns whether any of them had checkpointed data, in which case a
    /// new checkpoint without them has been written.
    pub async fn remove_rules(
        &mut self,
        rule_ids: &[AlarmRuleId],
        services: &EngineServices,
    ) -> Result<bool> {
        let mut had_persisted = false;
        for rule_id in rule_ids {
            self.rules.remove(rule_id);
            self.states.remove(rule_id);
            had_persisted |= self.persisted.contains_key(rule_id);
        }
        let all_keys = self.all_keys();
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.retain_keys(&all_keys);
        }
        if had_persisted {
            self.checkpoint(services).await?;
        }
        Ok(had_persisted)
    }

    /// Fetch keys the snapshot does not track yet (only once hydrated)
    async fn fetch_new_keys(
        &mut self,
        keys: &HashSet<ConditionKey>,
        services: &EngineServices,
    ) -> Result<()> {
        let missing: HashSet<ConditionKey> = match &self.snapshot {
            Some(snapshot) => keys
                .iter()
                .filter(|key| !snapshot.is_tracked(key))
                .cloned()
                .collect(),
            None => return Ok(()),
        };
        if missing.is_empty() {
            return Ok(());
        }
        let fetched = snapshot::fetch_values(
            &self.tenant_id,
            &self.entity_id,
            &missing,
            services.ts_store.as_ref(),
            services.attr_store.as_ref(),
        )
        .await?;
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.track_keys(&missing);
            for (key, ts, value) in fetched {
                snapshot.put_value(key, ts, value);
            }
        }
        debug!("[{}] fetched {} new keys", self.entity_id, missing.len());
        Ok(())
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub async fn on_event(
        &mut self,
        event: &EntityEvent,
        services: &EngineServices,
    ) -> Result<EventReport> {
        let input = EventInput::parse(event)?;
        match input {
            EventInput::Ignored => Ok(EventReport::default()),
            EventInput::OwnerChanged => {
                debug!("[{}] owner changed, context invalidated", self.entity_id);
                self.owner = None;
                Ok(EventReport::default())
            },
            EventInput::AlarmAck(alarm) => self.on_alarm_notification(EventKind::AlarmAck, &alarm, services).await,
            EventInput::AlarmClear(alarm) => self.on_alarm_notification(EventKind::AlarmClear, &alarm, services).await,
            EventInput::AlarmDelete(alarm) => self.on_alarm_notification(EventKind::AlarmDelete, &alarm, services).await,
            data => {
                self.ensure_ready(services).await?;
                let backup = self.backup();
                match self.apply_data(data, event.ts, services).await {
                    Ok(report) => {
                        self.notify(&report, services).await;
                        report.into_result()
                    },
                    Err(e) => {
                        self.rollback(backup);
                        Err(e)
                    },
                }
            },
        }
    }

    /// Re-evaluate every rule regardless of changes
    pub async fn on_time_tick(&mut self, now: i64, services: &EngineServices) -> Result<EventReport> {
        self.ensure_ready(services).await?;
        let backup = self.backup();
        match self.apply_tick(now, services).await {
            Ok(report) => {
                self.notify(&report, services).await;
                report.into_result()
            },
            Err(e) => {
                self.rollback(backup);
                Err(e)
            },
        }
    }

    async fn apply_tick(&mut self, now: i64, services: &EngineServices) -> Result<EventReport> {
        let mut report = EventReport::default();
        self.evaluate_rules(None, now, services, &mut report).await?;
        if report.state_changed {
            self.checkpoint(services).await?;
            report.checkpointed = true;
        }
        Ok(report)
    }

    async fn apply_data(
        &mut self,
        input: EventInput,
        event_ts: i64,
        services: &EngineServices,
    ) -> Result<EventReport> {
        let mut report = EventReport::default();
        match input {
            EventInput::Telemetry(batch) => {
                for (ts, values) in batch {
                    let update = match self.snapshot.as_mut() {
                        Some(snapshot) => snapshot.merge_time_series(ts, &values),
                        None => continue,
                    };
                    if update.has_changes() {
                        self.evaluate_rules(Some(&update.changed_keys), ts, services, &mut report)
                            .await?;
                    }
                }
            },
            EventInput::Attributes(entries) => {
                if let Some(snapshot) = self.snapshot.as_mut() {
                    let update = snapshot.merge_attributes(&entries);
                    if update.has_changes() {
                        self.evaluate_rules(
                            Some(&update.changed_keys),
                            event_ts,
                            services,
                            &mut report,
                        )
                        .await?;
                    }
                }
            },
            EventInput::AttributesDeleted(keys) => {
                // Rules see the missing value on their next evaluation
                if let Some(snapshot) = self.snapshot.as_mut() {
                    let removed = snapshot.remove_keys(&keys);
                    if removed.has_changes() {
                        debug!(
                            "[{}] removed {} attribute keys",
                            self.entity_id,
                            removed.changed_keys.len()
                        );
                    }
                }
            },
            _ => {},
        }
        if report.state_changed {
            self.checkpoint(services).await?;
            report.checkpointed = true;
        }
        Ok(report)
    }

    async fn evaluate_rules(
        &mut self,
        changed_keys: Option<&HashSet<ConditionKey>>,
        ts: i64,
        services: &EngineServices,
        report: &mut EventReport,
    ) -> Result<()> {
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Ok(());
        };
        let owner = self.owner.clone().unwrap_or_default();
        for (rule_id, entry) in &self.rules {
            if report.is_discarded(rule_id) {
                continue;
            }
            let state = self.states.entry(*rule_id).or_insert_with(|| {
                seed_state(self.tenant_id, self.entity_id, *rule_id, &self.persisted)
            });
            let outcome = state
                .evaluate(
                    &entry.rule,
                    &entry.keys,
                    snapshot,
                    changed_keys,
                    ts,
                    &owner,
                    services,
                )
                .await;
            let evaluation = match outcome {
                Ok(evaluation) => evaluation,
                Err(AlarmEngineError::QuotaExceeded { rule_id, message }) => {
                    // Re-seeded from the last checkpoint on the next round
                    self.states.remove(&rule_id);
                    warn!("[{}] rule {} state discarded: {}", self.entity_id, rule_id, message);
                    report.discarded.push((rule_id, message));
                    continue;
                },
                Err(e) => return Err(e),
            };
            if evaluation.evaluated {
                report.evaluated_rules += 1;
            }
            report.state_changed |= evaluation.state_changed;
            if evaluation.result.successful {
                report.results.push(evaluation.result);
            }
        }
        Ok(())
    }

    async fn on_alarm_notification(
        &mut self,
        kind: EventKind,
        alarm: &Alarm,
        services: &EngineServices,
    ) -> Result<EventReport> {
        let Some(rule_id) = alarm.rule_id else {
            return Ok(EventReport::default());
        };
        let (Some(entry), Some(state)) = (self.rules.get(&rule_id), self.states.get_mut(&rule_id))
        else {
            debug!(
                "[{}] {} for untracked rule {} ignored",
                self.entity_id,
                kind.as_str(),
                rule_id
            );
            return Ok(EventReport::default());
        };

        let previous = state.clone();
        let changed = match kind {
            EventKind::AlarmAck => state.on_external_ack(alarm, &entry.rule, services),
            EventKind::AlarmClear => state.on_external_clear(alarm),
            EventKind::AlarmDelete => state.on_external_delete(&alarm.id),
            _ => false,
        };
        if !changed {
            return Ok(EventReport::default());
        }
        if let Err(e) = self.checkpoint(services).await {
            self.states.insert(rule_id, previous);
            return Err(e);
        }
        Ok(EventReport {
            state_changed: true,
            checkpointed: true,
            ..Default::default()
        })
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    /// Hydrate the snapshot and resolve the owner if not done yet
    async fn ensure_ready(&mut self, services: &EngineServices) -> Result<()> {
        if self.snapshot.is_none() {
            let snapshot = snapshot::hydrate(
                &self.tenant_id,
                &self.entity_id,
                &self.all_keys(),
                services.ts_store.as_ref(),
                services.attr_store.as_ref(),
            )
            .await?;
            EngineStats::incr(&services.stats.hydrations);
            self.snapshot = Some(snapshot);
        }
        if self.owner.is_none() {
            let owner = services
                .owner_resolver
                .resolve(&self.tenant_id, &self.entity_id)
                .await?;
            self.owner = Some(owner);
        }
        Ok(())
    }

    fn backup(&self) -> Backup {
        Backup {
            snapshot: self.snapshot.clone(),
            states: self.states.clone(),
            owner: self.owner.clone(),
        }
    }

    fn rollback(&mut self, backup: Backup) {
        self.snapshot = backup.snapshot;
        self.states = backup.states;
        self.owner = backup.owner;
    }

    fn to_persisted(&self) -> PersistedEntityState {
        PersistedEntityState {
            tenant_id: self.tenant_id,
            entity_id: self.entity_id,
            // Discarded states keep their last checkpointed entry
            alarm_states: self
                .rules
                .keys()
                .filter_map(|rule_id| {
                    let state = match self.states.get(rule_id) {
                        Some(state) => state.to_persisted(),
                        None => self.persisted.get(rule_id)?.clone(),
                    };
                    Some((*rule_id, state))
                })
                .collect(),
        }
    }

    /// Write (or delete, when nothing is left) the entity's checkpoint
    async fn checkpoint(&mut self, services: &EngineServices) -> Result<()> {
        let state = self.to_persisted();
        if state.is_empty() {
            services.state_store.remove(&self.entity_id).await?;
        } else {
            let record = codec::encode(&state)?;
            services.state_store.put(&self.entity_id, record).await?;
        }
        EngineStats::incr(&services.stats.checkpoints);
        self.persisted = state.alarm_states;
        Ok(())
    }

    async fn notify(&self, report: &EventReport, services: &EngineServices) {
        for result in &report.results {
            services.notifier.notify(&self.entity_id, result).await;
        }
    }
}
