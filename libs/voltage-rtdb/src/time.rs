//! Time provider abstraction
//!
//! Separates time acquisition from evaluation so that ticks and alarm
//! timestamps are deterministic under test.

use std::sync::atomic::{AtomicI64, Ordering};

/// Time provider trait for generating timestamps
pub trait TimeProvider: Send + Sync + 'static {
    /// Get current timestamp in milliseconds since Unix epoch
    fn now_millis(&self) -> i64;
}

/// System time provider using local clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven time provider for testing
///
/// Starts at a given timestamp and only moves when told to.
#[derive(Debug)]
pub struct ManualTimeProvider {
    timestamp_ms: AtomicI64,
}

impl ManualTimeProvider {
    pub fn new(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms: AtomicI64::new(timestamp_ms),
        }
    }

    pub fn set(&self, timestamp_ms: i64) {
        self.timestamp_ms.store(timestamp_ms, Ordering::SeqCst);
    }

    /// Move forward and return the new timestamp
    pub fn advance(&self, delta_ms: i64) -> i64 {
        self.timestamp_ms.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now_millis(&self) -> i64 {
        self.timestamp_ms.load(Ordering::SeqCst)
    }
}
