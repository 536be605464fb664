//! VoltageEMS Storage Collaborators
//!
//! Read-side access to latest time-series and attributes, plus the durable
//! checkpoint store used by the alarm engine.
//!
//! # Key Components
//!
//! - **TimeseriesStore / AttributeStore**: hydration reads
//! - **StateStore**: atomic per-entity checkpoint records
//! - **MemoryRtdb**: in-memory backend for all three
//! - **FileStateStore**: file-backed checkpoints
//! - **TimeProvider**: wall clock abstraction

pub mod error;

pub mod traits;

pub mod memory_impl;

pub mod file_state;

pub mod time;

// Re-exports
pub use bytes::Bytes;
pub use error::{Result, StoreError};
pub use traits::{AttributeStore, StateStore, TimeseriesStore};

pub use memory_impl::{MemoryRtdb, MemoryStats};

pub use file_state::FileStateStore;

pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};

/// Helper functions for common operations
pub mod helpers {
    use super::MemoryRtdb;
    use std::sync::Arc;

    /// Create a concrete MemoryRtdb for unit testing
    ///
    /// The same instance can be handed out as time-series store, attribute
    /// store and state store.
    ///
    /// # Example
    /// ```
    /// use voltage_rtdb::helpers::create_test_memory_rtdb;
    ///
    /// let rtdb = create_test_memory_rtdb();
    /// assert_eq!(rtdb.stats().state_count, 0);
    /// ```
    pub fn create_test_memory_rtdb() -> Arc<MemoryRtdb> {
        Arc::new(MemoryRtdb::new())
    }
}
