//! Alarm rule definitions
//!
//! The engine never interprets `configuration`; it is handed verbatim to the
//! condition evaluator, which also reports which condition keys it reads.

use crate::error::{ModelError, Result};
use crate::ids::{AlarmRuleId, EntityId, EntityType, ProfileId, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which entities a rule applies to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmRuleTarget {
    /// Every entity of the tenant
    #[default]
    AnyEntity,
    /// Every entity of one type
    EntityType { entity_type: EntityType },
    /// An explicit list of entities
    EntityList { entities: Vec<EntityId> },
    /// Every entity created from a profile
    Profile { profile_id: ProfileId },
}

impl AlarmRuleTarget {
    /// Check whether an entity (with its resolved profile) is targeted
    pub fn matches(&self, entity: &EntityId, profile: Option<&ProfileId>) -> bool {
        match self {
            AlarmRuleTarget::AnyEntity => true,
            AlarmRuleTarget::EntityType { entity_type } => entity.entity_type == *entity_type,
            AlarmRuleTarget::EntityList { entities } => entities.contains(entity),
            AlarmRuleTarget::Profile { profile_id } => profile == Some(profile_id),
        }
    }
}

/// Alarm propagation settings carried onto raised alarms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmPropagation {
    #[serde(default)]
    pub propagate: bool,
    #[serde(default)]
    pub propagate_to_owner: bool,
    #[serde(default)]
    pub propagate_to_tenant: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub propagate_relation_types: Vec<String>,
}

/// Tenant-defined alarm rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRule {
    pub id: AlarmRuleId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Alarm type written on raised alarms (e.g. "High Temperature")
    pub alarm_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub target: AlarmRuleTarget,
    #[serde(default)]
    pub propagation: AlarmPropagation,
    /// Opaque condition configuration (create/clear predicates, severities)
    #[serde(default)]
    pub configuration: Value,
}

fn default_enabled() -> bool {
    true
}

impl AlarmRule {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, configuration: Value) -> Self {
        let name = name.into();
        Self {
            id: AlarmRuleId::random(),
            tenant_id,
            alarm_type: name.clone(),
            name,
            enabled: true,
            target: AlarmRuleTarget::AnyEntity,
            propagation: AlarmPropagation::default(),
            configuration,
        }
    }

    pub fn with_target(mut self, target: AlarmRuleTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_propagation(mut self, propagation: AlarmPropagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Basic structural checks before a rule is accepted by a rule source
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ModelError::invalid_rule(format!(
                "rule {} has an empty name",
                self.id
            )));
        }
        if self.alarm_type.trim().is_empty() {
            return Err(ModelError::invalid_rule(format!(
                "rule {} has an empty alarm type",
                self.id
            )));
        }
        if let AlarmRuleTarget::EntityList { entities } = &self.target {
            if entities.is_empty() {
                return Err(ModelError::invalid_rule(format!(
                    "rule {} targets an empty entity list",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Whether the rule is active for the given entity
    pub fn applies_to(&self, entity: &EntityId, profile: Option<&ProfileId>) -> bool {
        self.enabled && self.target.matches(entity, profile)
    }
}
