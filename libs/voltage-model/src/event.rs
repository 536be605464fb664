//! Inbound entity events

use crate::ids::{EntityId, TenantId};
use crate::key::AttributeScope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    PostTelemetry,
    PostAttributes,
    AttributesUpdated,
    AttributesDeleted,
    Activity,
    Inactivity,
    AlarmAck,
    AlarmClear,
    AlarmDelete,
    EntityAssigned,
    EntityUnassigned,
    /// Anything this engine does not react to
    #[serde(other)]
    Other,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PostTelemetry => "POST_TELEMETRY",
            EventKind::PostAttributes => "POST_ATTRIBUTES",
            EventKind::AttributesUpdated => "ATTRIBUTES_UPDATED",
            EventKind::AttributesDeleted => "ATTRIBUTES_DELETED",
            EventKind::Activity => "ACTIVITY",
            EventKind::Inactivity => "INACTIVITY",
            EventKind::AlarmAck => "ALARM_ACK",
            EventKind::AlarmClear => "ALARM_CLEAR",
            EventKind::AlarmDelete => "ALARM_DELETE",
            EventKind::EntityAssigned => "ENTITY_ASSIGNED",
            EventKind::EntityUnassigned => "ENTITY_UNASSIGNED",
            EventKind::Other => "OTHER",
        }
    }
}

/// Event addressed to one monitored entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub tenant_id: TenantId,
    pub entity_id: EntityId,
    pub kind: EventKind,
    /// Metadata timestamp (ms); default timestamp for payload values
    pub ts: i64,
    /// Attribute scope for attribute events (CLIENT when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<AttributeScope>,
    #[serde(default)]
    pub payload: Value,
}

impl EntityEvent {
    pub fn new(
        tenant_id: TenantId,
        entity_id: EntityId,
        kind: EventKind,
        ts: i64,
        payload: Value,
    ) -> Self {
        Self {
            tenant_id,
            entity_id,
            kind,
            ts,
            scope: None,
            payload,
        }
    }

    pub fn telemetry(tenant_id: TenantId, entity_id: EntityId, ts: i64, payload: Value) -> Self {
        Self::new(tenant_id, entity_id, EventKind::PostTelemetry, ts, payload)
    }

    pub fn with_scope(mut self, scope: AttributeScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Scope to use for attribute handling
    pub fn scope_or_default(&self) -> AttributeScope {
        self.scope.unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_kind_is_other() {
        let kind: EventKind = serde_json::from_str("\"RPC_CALL\"").unwrap();
        assert_eq!(kind, EventKind::Other);
    }

    #[test]
    fn test_event_from_json() {
        let entity = EntityId::device();
        let tenant = TenantId::random();
        let event: EntityEvent = serde_json::from_value(json!({
            "tenant_id": tenant,
            "entity_id": entity,
            "kind": "ATTRIBUTES_UPDATED",
            "ts": 10,
            "scope": "SERVER_SCOPE",
            "payload": {"alarmEnabled": true}
        }))
        .unwrap();
        assert_eq!(event.kind, EventKind::AttributesUpdated);
        assert_eq!(event.scope_or_default(), AttributeScope::Server);
    }

    #[test]
    fn test_scope_defaults_to_client() {
        let event = EntityEvent::telemetry(TenantId::random(), EntityId::device(), 1, json!({}));
        assert_eq!(event.scope_or_default(), AttributeScope::Client);
    }
}
