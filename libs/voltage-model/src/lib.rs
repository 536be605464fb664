//! Voltage Model Library
//!
//! Domain types shared by the alarm engine and its storage collaborators.
//! Pure data, no IO.
//!
//! # Modules
//!
//! - `ids`: Typed identifiers (tenant, entity, rule, alarm)
//! - `key`: Condition keys and attribute scopes
//! - `value`: Typed values and stored key/value entries
//! - `rule`: Alarm rule definitions, targeting and propagation
//! - `alarm`: Alarm records, lifecycle requests and results
//! - `event`: Inbound entity events

pub mod alarm;
pub mod error;
pub mod event;
pub mod ids;
pub mod key;
pub mod rule;
pub mod value;

// Re-exports for convenience
pub use alarm::{Alarm, AlarmLifecycleResult, AlarmModification, AlarmSeverity};
pub use error::{ModelError, Result};
pub use event::{EntityEvent, EventKind};
pub use ids::{AlarmId, AlarmRuleId, CustomerId, EntityId, EntityType, ProfileId, TenantId};
pub use key::{AttributeScope, ConditionKey, ConditionKeyType};
pub use rule::{AlarmPropagation, AlarmRule, AlarmRuleTarget};
pub use value::{AttributeKvEntry, TsKvEntry, TypedValue};
