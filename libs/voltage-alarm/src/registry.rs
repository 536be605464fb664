//! Engine Registry
//!
//! Process-wide table of entity contexts, limited to the entities partitioned
//! to this process. The table is a concurrent map; each context sits behind
//! its own async mutex so events for one entity serialize while different
//! entities run in parallel.

use crate::alarm_state::AlarmStatus;
use crate::codec;
use crate::collaborators::EngineServices;
use crate::context::{EntityContext, EventReport};
use crate::error::{AlarmEngineError, Result};
use crate::snapshot::ValueSnapshot;
use crate::stats::EngineStats;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use voltage_model::{AlarmRule, AlarmRuleId, EntityEvent, EntityId, TenantId};

/// What happened to a submitted event
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// Applied to the entity's context
    Processed(EventReport),
    /// No enabled rule applies to the entity
    NoRules,
    /// Entity or tenant was deleted; the event is discarded
    Dropped,
}

impl EventOutcome {
    pub fn report(&self) -> Option<&EventReport> {
        match self {
            EventOutcome::Processed(report) => Some(report),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct Slot {
    tenant_id: TenantId,
    context: Arc<Mutex<EntityContext>>,
}

pub struct EngineRegistry {
    services: Arc<EngineServices>,
    contexts: DashMap<EntityId, Slot>,
    deleted_entities: DashSet<EntityId>,
    deleted_tenants: DashSet<TenantId>,
}

impl EngineRegistry {
    pub fn new(services: Arc<EngineServices>) -> Self {
        Self {
            services,
            contexts: DashMap::new(),
            deleted_entities: DashSet::new(),
            deleted_tenants: DashSet::new(),
        }
    }

    pub fn services(&self) -> &Arc<EngineServices> {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn contains(&self, entity_id: &EntityId) -> bool {
        self.contexts.contains_key(entity_id)
    }

    pub fn cached_entities(&self) -> Vec<EntityId> {
        self.contexts.iter().map(|slot| *slot.key()).collect()
    }

    fn is_deleted(&self, tenant_id: &TenantId, entity_id: &EntityId) -> bool {
        self.deleted_entities.contains(entity_id) || self.deleted_tenants.contains(tenant_id)
    }

    /// Cached contexts of one tenant
    fn slots_of(&self, tenant_id: &TenantId) -> Vec<(EntityId, Slot)> {
        self.contexts
            .iter()
            .filter(|slot| slot.tenant_id == *tenant_id)
            .map(|slot| (*slot.key(), slot.value().clone()))
            .collect()
    }

    /// Remove the map entry only if it still points at this context
    fn evict(&self, entity_id: &EntityId, context: &Arc<Mutex<EntityContext>>) {
        self.contexts
            .remove_if(entity_id, |_, slot| Arc::ptr_eq(&slot.context, context));
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub async fn on_event(&self, event: &EntityEvent) -> Result<EventOutcome> {
        let stats = &self.services.stats;
        if self.is_deleted(&event.tenant_id, &event.entity_id) {
            debug!("[{}] event for deleted entity dropped", event.entity_id);
            EngineStats::incr(&stats.events_dropped);
            return Ok(EventOutcome::Dropped);
        }
        if !self.services.partitions.is_mine(&event.tenant_id, &event.entity_id) {
            EngineStats::incr(&stats.events_failed);
            return Err(AlarmEngineError::NotOwned(event.entity_id));
        }

        let Some(context) = self.context_for(&event.tenant_id, &event.entity_id).await? else {
            return Ok(EventOutcome::NoRules);
        };

        let mut ctx = context.lock().await;
        // Deletion or repartition may have landed while the context was built
        let deleted = self.is_deleted(&event.tenant_id, &event.entity_id);
        if !ctx.is_evicted()
            && (deleted || !self.services.partitions.is_mine(&event.tenant_id, &event.entity_id))
        {
            debug!("[{}] stale context evicted", event.entity_id);
            ctx.mark_evicted();
            self.evict(&event.entity_id, &context);
        }
        if ctx.is_evicted() {
            // Lost the race against a repartition or a deletion
            if deleted {
                EngineStats::incr(&stats.events_dropped);
                return Ok(EventOutcome::Dropped);
            }
            EngineStats::incr(&stats.events_failed);
            return Err(AlarmEngineError::NotOwned(event.entity_id));
        }

        match ctx.on_event(event, &self.services).await {
            Ok(report) => {
                EngineStats::incr(&stats.events_processed);
                Ok(EventOutcome::Processed(report))
            },
            Err(e) => {
                EngineStats::incr(&stats.events_failed);
                Err(e)
            },
        }
    }

    /// Re-evaluate every rule of a cached entity
    ///
    /// Returns `None` when the entity has no live context.
    pub async fn tick_entity(&self, entity_id: &EntityId, now: i64) -> Result<Option<EventReport>> {
        let Some(context) = self.contexts.get(entity_id).map(|slot| slot.context.clone()) else {
            return Ok(None);
        };
        let mut ctx = context.lock().await;
        if ctx.is_evicted() {
            return Ok(None);
        }
        EngineStats::incr(&self.services.stats.ticks);
        ctx.on_time_tick(now, &self.services).await.map(Some)
    }

    /// Existing context, or a new one built from the rule source and the
    /// entity's checkpoint. `None` when no rule applies.
    async fn context_for(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
    ) -> Result<Option<Arc<Mutex<EntityContext>>>> {
        if let Some(slot) = self.contexts.get(entity_id) {
            return Ok(Some(slot.context.clone()));
        }

        let resolved = self.services.rule_source.resolve(tenant_id, entity_id).await?;
        if resolved.rules.is_empty() {
            return Ok(None);
        }
        let checkpoint = match self.services.state_store.get(entity_id).await? {
            Some(record) => Some(codec::decode(&record)?),
            None => None,
        };
        let context = EntityContext::new(
            *tenant_id,
            *entity_id,
            resolved,
            checkpoint,
            self.services.evaluator.as_ref(),
        );

        // Another worker may have created it while we were resolving
        let slot = self
            .contexts
            .entry(*entity_id)
            .or_insert_with(|| Slot {
                tenant_id: *tenant_id,
                context: Arc::new(Mutex::new(context)),
            })
            .clone();
        debug!("[{}] context created", entity_id);
        Ok(Some(slot.context))
    }

    // ========================================================================
    // Rule lifecycle
    // ========================================================================

    /// Add a rule to every cached context it targets
    ///
    /// Entities without a cached context pick the rule up from the rule
    /// source on their next event.
    pub async fn add_rule(&self, rule: &AlarmRule) -> Result<usize> {
        if !rule.enabled {
            return Ok(0);
        }
        let mut added = 0;
        for (entity_id, slot) in self.slots_of(&rule.tenant_id) {
            let mut ctx = slot.context.lock().await;
            if ctx.is_evicted() || !rule.target.matches(&entity_id, ctx.profile_id()) {
                continue;
            }
            if ctx.add_rule(rule.clone(), &self.services).await? {
                added += 1;
            }
        }
        info!("Rule {} added to {} contexts", rule.id, added);
        Ok(added)
    }

    /// Apply a changed rule definition
    ///
    /// Contexts the rule no longer targets (or every context, when the rule
    /// is disabled) lose it.
    pub async fn update_rule(&self, rule: &AlarmRule) -> Result<usize> {
        let mut touched = 0;
        for (entity_id, slot) in self.slots_of(&rule.tenant_id) {
            let mut ctx = slot.context.lock().await;
            if ctx.is_evicted() {
                continue;
            }
            if rule.enabled && rule.target.matches(&entity_id, ctx.profile_id()) {
                ctx.update_rule(rule.clone(), &self.services).await?;
                touched += 1;
            } else if ctx.has_rule(&rule.id) {
                ctx.remove_rules(&[rule.id], &self.services).await?;
                touched += 1;
                if ctx.is_empty() {
                    ctx.mark_evicted();
                    self.evict(&entity_id, &slot.context);
                }
            }
        }
        info!("Rule {} updated in {} contexts", rule.id, touched);
        Ok(touched)
    }

    /// Remove a rule from every cached context of the tenant
    pub async fn remove_rule(&self, tenant_id: &TenantId, rule_id: &AlarmRuleId) -> Result<usize> {
        let mut removed = 0;
        for (entity_id, slot) in self.slots_of(tenant_id) {
            let mut ctx = slot.context.lock().await;
            if ctx.is_evicted() || !ctx.has_rule(rule_id) {
                continue;
            }
            ctx.remove_rules(&[*rule_id], &self.services).await?;
            removed += 1;
            if ctx.is_empty() {
                debug!("[{}] last rule removed, context evicted", entity_id);
                ctx.mark_evicted();
                self.evict(&entity_id, &slot.context);
            }
        }
        info!("Rule {} removed from {} contexts", rule_id, removed);
        Ok(removed)
    }

    // ========================================================================
    // Partitioning and deletion
    // ========================================================================

    /// Drop contexts of entities no longer owned by this process
    ///
    /// No checkpoint is written; the last one is already durable.
    pub async fn on_partition_change(&self) -> usize {
        let foreign: Vec<(EntityId, Slot)> = self
            .contexts
            .iter()
            .filter(|slot| !self.services.partitions.is_mine(&slot.tenant_id, slot.key()))
            .map(|slot| (*slot.key(), slot.value().clone()))
            .collect();

        for (entity_id, slot) in &foreign {
            self.evict(entity_id, &slot.context);
            slot.context.lock().await.mark_evicted();
        }
        if !foreign.is_empty() {
            info!("Repartition evicted {} entity contexts", foreign.len());
        }
        foreign.len()
    }

    /// Forget an entity and its checkpoint; later events are dropped
    pub async fn on_entity_deleted(&self, entity_id: &EntityId) -> Result<()> {
        self.deleted_entities.insert(*entity_id);
        if let Some((_, slot)) = self.contexts.remove(entity_id) {
            slot.context.lock().await.mark_evicted();
        }
        self.services.state_store.remove(entity_id).await?;
        info!("[{}] entity deleted", entity_id);
        Ok(())
    }

    /// Forget every cached entity of a tenant and their checkpoints
    pub async fn on_tenant_deleted(&self, tenant_id: &TenantId) -> Result<usize> {
        self.deleted_tenants.insert(*tenant_id);
        let slots = self.slots_of(tenant_id);
        for (entity_id, slot) in &slots {
            self.evict(entity_id, &slot.context);
            slot.context.lock().await.mark_evicted();
            self.services.state_store.remove(entity_id).await?;
        }
        info!("Tenant {} deleted, {} contexts removed", tenant_id, slots.len());
        Ok(slots.len())
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub async fn snapshot_of(&self, entity_id: &EntityId) -> Option<ValueSnapshot> {
        let context = self.contexts.get(entity_id).map(|slot| slot.context.clone())?;
        let ctx = context.lock().await;
        ctx.snapshot().cloned()
    }

    pub async fn rule_status(&self, entity_id: &EntityId, rule_id: &AlarmRuleId) -> Option<AlarmStatus> {
        let context = self.contexts.get(entity_id).map(|slot| slot.context.clone())?;
        let ctx = context.lock().await;
        ctx.rule_status(rule_id)
    }

    pub async fn rule_ids(&self, entity_id: &EntityId) -> Vec<AlarmRuleId> {
        let Some(context) = self.contexts.get(entity_id).map(|slot| slot.context.clone()) else {
            return Vec::new();
        };
        let ctx = context.lock().await;
        ctx.rule_ids()
    }
}
