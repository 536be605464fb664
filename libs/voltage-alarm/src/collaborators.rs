//! External collaborators of the engine
//!
//! Storage traits come from `voltage-rtdb`; the traits here cover alarm
//! persistence, notification fan-out, owner lookup, cluster ownership and
//! rule resolution.

use crate::error::Result;
use crate::evaluator::{ConditionEvaluator, OwnerContext};
use crate::stats::EngineStats;
use async_trait::async_trait;
use std::sync::Arc;
use voltage_model::{
    AlarmLifecycleResult, AlarmModification, AlarmRule, EntityId, ProfileId, TenantId,
};
use voltage_rtdb::{AttributeStore, StateStore, TimeProvider, TimeseriesStore};

/// Durable alarm records
///
/// `Create` for an (originator, rule) pair that already has an active alarm
/// must return that alarm instead of raising a second one.
#[async_trait]
pub trait AlarmApi: Send + Sync + 'static {
    async fn apply(&self, modification: AlarmModification) -> Result<AlarmLifecycleResult>;
}

/// Downstream fan-out of lifecycle results (fire-and-forget)
#[async_trait]
pub trait AlarmNotifier: Send + Sync + 'static {
    async fn notify(&self, entity_id: &EntityId, result: &AlarmLifecycleResult);
}

/// Resolves the current owner of an entity
#[async_trait]
pub trait OwnerResolver: Send + Sync + 'static {
    async fn resolve(&self, tenant_id: &TenantId, entity_id: &EntityId) -> Result<OwnerContext>;
}

/// Authority on which entities this process owns
pub trait PartitionService: Send + Sync + 'static {
    fn is_mine(&self, tenant_id: &TenantId, entity_id: &EntityId) -> bool;
}

/// Rules applicable to one entity
#[derive(Debug, Clone, Default)]
pub struct ResolvedRules {
    pub profile_id: Option<ProfileId>,
    pub rules: Vec<AlarmRule>,
}

/// Source of alarm rule definitions
#[async_trait]
pub trait RuleSource: Send + Sync + 'static {
    /// Enabled rules that apply to the entity, with its profile
    async fn resolve(&self, tenant_id: &TenantId, entity_id: &EntityId) -> Result<ResolvedRules>;
}

/// Every collaborator the engine talks to, built once at startup
#[derive(Clone)]
pub struct EngineServices {
    pub ts_store: Arc<dyn TimeseriesStore>,
    pub attr_store: Arc<dyn AttributeStore>,
    pub state_store: Arc<dyn StateStore>,
    pub evaluator: Arc<dyn ConditionEvaluator>,
    pub alarm_api: Arc<dyn AlarmApi>,
    pub notifier: Arc<dyn AlarmNotifier>,
    pub owner_resolver: Arc<dyn OwnerResolver>,
    pub partitions: Arc<dyn PartitionService>,
    pub rule_source: Arc<dyn RuleSource>,
    pub time: Arc<dyn TimeProvider>,
    pub stats: Arc<EngineStats>,
}
