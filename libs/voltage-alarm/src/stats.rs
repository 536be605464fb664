//! Engine statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by workers, contexts and the scheduler
#[derive(Debug, Default)]
pub struct EngineStats {
    pub events_processed: AtomicU64,
    pub events_dropped: AtomicU64,
    pub events_failed: AtomicU64,
    pub ticks: AtomicU64,
    pub checkpoints: AtomicU64,
    pub alarms_created: AtomicU64,
    pub alarms_updated: AtomicU64,
    pub alarms_cleared: AtomicU64,
    pub hydrations: AtomicU64,
}

/// Plain copy of `EngineStats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub events_processed: u64,
    pub events_dropped: u64,
    pub events_failed: u64,
    pub ticks: u64,
    pub checkpoints: u64,
    pub alarms_created: u64,
    pub alarms_updated: u64,
    pub alarms_cleared: u64,
    pub hydrations: u64,
}

impl EngineStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            alarms_created: self.alarms_created.load(Ordering::Relaxed),
            alarms_updated: self.alarms_updated.load(Ordering::Relaxed),
            alarms_cleared: self.alarms_cleared.load(Ordering::Relaxed),
            hydrations: self.hydrations.load(Ordering::Relaxed),
        }
    }
}
