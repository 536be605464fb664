//! Voltage Alarm - Stateful Alarm Rule Engine
//!
//! Evaluates tenant-defined alarm rules against the live telemetry and
//! attributes of individual entities:
//! - Per-entity value snapshot, hydrated lazily and advanced by events
//! - One alarm state machine per (entity, rule)
//! - Durable checkpoints so evaluation state survives restarts
//! - Repartition-aware registry of entity contexts
//! - Sharded worker pool with a periodic time-tick scheduler
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌───────────────┐
//! │ AlarmEngine │────▶│   Registry   │────▶│ EntityContext │
//! │ (shards)    │     │ (DashMap)    │     │ (per entity)  │
//! └─────────────┘     └──────────────┘     └───────────────┘
//!        │                                   │         │
//!        ▼                                   ▼         ▼
//! ┌─────────────┐                  ┌──────────────┐ ┌────────────────┐
//! │  Scheduler  │                  │ValueSnapshot │ │AlarmRuleState  │
//! │  (ticks)    │                  │  (hydrate)   │ │(evaluator, API)│
//! └─────────────┘                  └──────────────┘ └────────────────┘
//! ```
//!
//! Storage access goes through the `voltage-rtdb` traits; alarm persistence,
//! notification, owner lookup, partition ownership and rule resolution are
//! the collaborator traits in [`collaborators`].

pub mod alarm_state;
pub mod codec;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod logging;
pub mod memory;
pub mod payload;
pub mod registry;
pub mod snapshot;
pub mod stats;

#[cfg(test)]
mod test_support;

// Re-export public API
pub use alarm_state::{AlarmRuleState, AlarmStatus, Evaluation};
pub use codec::{PersistedAlarmState, PersistedEntityState, CODEC_VERSION};
pub use collaborators::{
    AlarmApi, AlarmNotifier, EngineServices, OwnerResolver, PartitionService, ResolvedRules,
    RuleSource,
};
pub use config::{load_config, load_config_from_file, EngineConfig, LoggingConfig, StateBackend, StateConfig};
pub use context::{EntityContext, EventReport};
pub use engine::{AlarmEngine, EventReceipt};
pub use error::{AlarmEngineError, Result};
pub use evaluator::{
    ConditionEvaluator, EvalError, EvalInput, EvalOutcome, OwnerContext, RuleLocalState, Verdict,
};
pub use logging::init_logging;
pub use memory::{
    MemoryAlarmApi, MemoryRuleSource, RecordingNotifier, StaticOwnerResolver,
    StaticPartitionService,
};
pub use registry::{EngineRegistry, EventOutcome};
pub use snapshot::{SnapshotEntry, SnapshotUpdate, UpdateKind, ValueSnapshot};
pub use stats::{EngineStats, EngineStatsSnapshot};
