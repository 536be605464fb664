//! Alarm records, lifecycle requests and lifecycle results

use crate::ids::{AlarmId, AlarmRuleId, CustomerId, EntityId, TenantId};
use crate::rule::AlarmPropagation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Alarm severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmSeverity {
    Critical,
    Major,
    Minor,
    Warning,
    Indeterminate,
}

impl AlarmSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmSeverity::Critical => "CRITICAL",
            AlarmSeverity::Major => "MAJOR",
            AlarmSeverity::Minor => "MINOR",
            AlarmSeverity::Warning => "WARNING",
            AlarmSeverity::Indeterminate => "INDETERMINATE",
        }
    }
}

impl fmt::Display for AlarmSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable alarm record (canonical form returned by alarm persistence)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub tenant_id: TenantId,
    pub originator: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<CustomerId>,
    #[serde(rename = "type")]
    pub alarm_type: String,
    /// Rule that raised the alarm; `None` for manually created alarms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<AlarmRuleId>,
    pub severity: AlarmSeverity,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub cleared: bool,
    pub start_ts: i64,
    pub end_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear_ts: Option<i64>,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub propagation: AlarmPropagation,
}

impl Alarm {
    /// Active = raised and not yet cleared
    pub fn is_active(&self) -> bool {
        !self.cleared
    }
}

/// Lifecycle request handed to alarm persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmModification {
    /// Raise a new alarm for (originator, rule)
    Create {
        tenant_id: TenantId,
        originator: EntityId,
        customer_id: Option<CustomerId>,
        rule_id: AlarmRuleId,
        alarm_type: String,
        severity: AlarmSeverity,
        ts: i64,
        details: Value,
        propagation: AlarmPropagation,
    },
    /// Update a raised alarm (severity escalation, details refresh)
    Update {
        alarm_id: AlarmId,
        severity: AlarmSeverity,
        ts: i64,
        details: Value,
    },
    /// Clear a raised alarm
    Clear {
        alarm_id: AlarmId,
        ts: i64,
        details: Value,
    },
}

impl AlarmModification {
    pub fn op_name(&self) -> &'static str {
        match self {
            AlarmModification::Create { .. } => "CREATE",
            AlarmModification::Update { .. } => "UPDATE",
            AlarmModification::Clear { .. } => "CLEAR",
        }
    }
}

/// Outcome of one alarm lifecycle transition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmLifecycleResult {
    pub successful: bool,
    pub created: bool,
    pub modified: bool,
    pub cleared: bool,
    /// Alarm after the transition
    pub alarm: Option<Alarm>,
    /// Alarm before the transition
    pub old: Option<Alarm>,
    /// Entities the alarm is propagated to (originator included)
    #[serde(default)]
    pub propagated_entities: Vec<EntityId>,
}

impl AlarmLifecycleResult {
    /// Result for an evaluation that triggered nothing
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn is_severity_changed(&self) -> bool {
        match (&self.alarm, &self.old) {
            (Some(alarm), Some(old)) => alarm.severity != old.severity,
            _ => false,
        }
    }

    pub fn old_severity(&self) -> Option<AlarmSeverity> {
        if self.is_severity_changed() {
            self.old.as_ref().map(|old| old.severity)
        } else {
            None
        }
    }

    pub fn is_propagation_changed(&self) -> bool {
        if self.created {
            return true;
        }
        match (&self.alarm, &self.old) {
            (Some(alarm), Some(old)) => alarm.propagation != old.propagation,
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    fn alarm(severity: AlarmSeverity) -> Alarm {
        Alarm {
            id: AlarmId::random(),
            tenant_id: TenantId::random(),
            originator: EntityId::device(),
            customer_id: None,
            alarm_type: "High Temp".into(),
            rule_id: Some(AlarmRuleId::random()),
            severity,
            acknowledged: false,
            cleared: false,
            start_ts: 1,
            end_ts: 1,
            ack_ts: None,
            clear_ts: None,
            details: json!({}),
            propagation: AlarmPropagation::default(),
        }
    }

    #[test]
    fn test_severity_order() {
        assert!(AlarmSeverity::Critical < AlarmSeverity::Major);
        assert!(AlarmSeverity::Warning < AlarmSeverity::Indeterminate);
    }

    #[test]
    fn test_severity_changed() {
        let old = alarm(AlarmSeverity::Minor);
        let mut new = old.clone();
        new.severity = AlarmSeverity::Critical;
        let result = AlarmLifecycleResult {
            successful: true,
            modified: true,
            alarm: Some(new),
            old: Some(old),
            ..Default::default()
        };
        assert!(result.is_severity_changed());
        assert_eq!(result.old_severity(), Some(AlarmSeverity::Minor));
        assert!(!result.is_propagation_changed());
    }

    #[test]
    fn test_propagation_changed() {
        let created = AlarmLifecycleResult {
            successful: true,
            created: true,
            alarm: Some(alarm(AlarmSeverity::Major)),
            ..Default::default()
        };
        assert!(created.is_propagation_changed());
        assert!(!created.is_severity_changed());

        let old = alarm(AlarmSeverity::Major);
        let mut new = old.clone();
        new.propagation.propagate_relation_types = vec!["Contains".into()];
        let modified = AlarmLifecycleResult {
            successful: true,
            modified: true,
            alarm: Some(new),
            old: Some(old),
            ..Default::default()
        };
        assert!(modified.is_propagation_changed());
    }

    #[test]
    fn test_noop() {
        let result = AlarmLifecycleResult::noop();
        assert!(!result.successful);
        assert!(!result.is_propagation_changed());
        assert_eq!(result.old_severity(), None);
    }
}
