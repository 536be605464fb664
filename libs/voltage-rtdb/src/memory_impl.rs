//! In-memory storage backend
//!
//! Uses DashMap for lock-free concurrent access. Implements every storage
//! collaborator at once, counts reads for tests that assert on fetch
//! behaviour, and can be told to fail reads or writes.

use crate::error::{Result, StoreError};
use crate::traits::*;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use voltage_model::{AttributeKvEntry, AttributeScope, EntityId, TenantId, TsKvEntry};

/// In-memory storage with concurrent access support
pub struct MemoryRtdb {
    latest: Arc<DashMap<EntityId, DashMap<String, TsKvEntry>>>,
    attributes: Arc<DashMap<(EntityId, AttributeScope), DashMap<String, AttributeKvEntry>>>,
    states: Arc<DashMap<EntityId, Bytes>>,
    counters: FetchCounters,
    read_fault: RwLock<Option<String>>,
    write_fault: RwLock<Option<String>>,
}

#[derive(Debug, Default)]
struct FetchCounters {
    ts_fetches: AtomicU64,
    attribute_fetches: AtomicU64,
    state_reads: AtomicU64,
    state_writes: AtomicU64,
}

impl MemoryRtdb {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(DashMap::new()),
            attributes: Arc::new(DashMap::new()),
            states: Arc::new(DashMap::new()),
            counters: FetchCounters::default(),
            read_fault: RwLock::new(None),
            write_fault: RwLock::new(None),
        }
    }

    // ==================== Seeding ====================

    /// Store a latest time-series value (newer timestamps win)
    pub fn save_latest(&self, entity_id: EntityId, entry: TsKvEntry) {
        let series = self.latest.entry(entity_id).or_default();
        let keep_existing = series
            .get(&entry.key)
            .is_some_and(|existing| existing.ts > entry.ts);
        if !keep_existing {
            series.insert(entry.key.clone(), entry);
        }
    }

    /// Store an attribute value in one scope
    pub fn save_attribute(&self, entity_id: EntityId, scope: AttributeScope, entry: AttributeKvEntry) {
        self.attributes
            .entry((entity_id, scope))
            .or_default()
            .insert(entry.key.clone(), entry);
    }

    /// Delete an attribute, returns whether it existed
    pub fn delete_attribute(&self, entity_id: EntityId, scope: AttributeScope, key: &str) -> bool {
        self.attributes
            .get(&(entity_id, scope))
            .is_some_and(|scoped| scoped.remove(key).is_some())
    }

    /// Raw checkpoint access for tests
    pub fn state_of(&self, entity_id: &EntityId) -> Option<Bytes> {
        self.states.get(entity_id).map(|entry| entry.value().clone())
    }

    // ==================== Fault injection ====================

    /// Make every subsequent read fail (`None` to heal)
    pub fn fail_reads(&self, reason: Option<&str>) {
        *self.read_fault.write() = reason.map(str::to_string);
    }

    /// Make every subsequent checkpoint write/delete fail (`None` to heal)
    pub fn fail_writes(&self, reason: Option<&str>) {
        *self.write_fault.write() = reason.map(str::to_string);
    }

    fn check_read(&self) -> Result<()> {
        match self.read_fault.read().as_ref() {
            Some(reason) => Err(StoreError::Injected(reason.clone())),
            None => Ok(()),
        }
    }

    fn check_write(&self) -> Result<()> {
        match self.write_fault.read().as_ref() {
            Some(reason) => Err(StoreError::Injected(reason.clone())),
            None => Ok(()),
        }
    }

    // ==================== Introspection ====================

    /// Clear all data and counters (useful for testing)
    pub fn clear(&self) {
        self.latest.clear();
        self.attributes.clear();
        self.states.clear();
        self.reset_counters();
    }

    pub fn reset_counters(&self) {
        self.counters.ts_fetches.store(0, Ordering::Relaxed);
        self.counters.attribute_fetches.store(0, Ordering::Relaxed);
        self.counters.state_reads.store(0, Ordering::Relaxed);
        self.counters.state_writes.store(0, Ordering::Relaxed);
    }

    /// Get statistics about stored data and calls served
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            ts_entity_count: self.latest.len(),
            attribute_set_count: self.attributes.len(),
            state_count: self.states.len(),
            ts_fetches: self.counters.ts_fetches.load(Ordering::Relaxed),
            attribute_fetches: self.counters.attribute_fetches.load(Ordering::Relaxed),
            state_reads: self.counters.state_reads.load(Ordering::Relaxed),
            state_writes: self.counters.state_writes.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryRtdb {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about memory storage usage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub ts_entity_count: usize,
    pub attribute_set_count: usize,
    pub state_count: usize,
    /// `find_latest` calls
    pub ts_fetches: u64,
    /// `AttributeStore::find` calls (one per scope)
    pub attribute_fetches: u64,
    pub state_reads: u64,
    pub state_writes: u64,
}

#[async_trait]
impl TimeseriesStore for MemoryRtdb {
    async fn find_latest(
        &self,
        _tenant_id: &TenantId,
        entity_id: &EntityId,
        keys: &[String],
    ) -> Result<Vec<TsKvEntry>> {
        self.counters.ts_fetches.fetch_add(1, Ordering::Relaxed);
        self.check_read()?;

        let Some(series) = self.latest.get(entity_id) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|key| series.get(key).map(|entry| entry.value().clone()))
            .collect())
    }
}

#[async_trait]
impl AttributeStore for MemoryRtdb {
    async fn find(
        &self,
        _tenant_id: &TenantId,
        entity_id: &EntityId,
        scope: AttributeScope,
        keys: &[String],
    ) -> Result<Vec<AttributeKvEntry>> {
        self.counters.attribute_fetches.fetch_add(1, Ordering::Relaxed);
        self.check_read()?;

        let Some(scoped) = self.attributes.get(&(*entity_id, scope)) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|key| scoped.get(key).map(|entry| entry.value().clone()))
            .collect())
    }
}

#[async_trait]
impl StateStore for MemoryRtdb {
    async fn get(&self, entity_id: &EntityId) -> Result<Option<Bytes>> {
        self.counters.state_reads.fetch_add(1, Ordering::Relaxed);
        self.check_read()?;
        Ok(self.state_of(entity_id))
    }

    async fn put(&self, entity_id: &EntityId, record: Bytes) -> Result<()> {
        self.check_write()?;
        self.counters.state_writes.fetch_add(1, Ordering::Relaxed);
        self.states.insert(*entity_id, record);
        Ok(())
    }

    async fn remove(&self, entity_id: &EntityId) -> Result<bool> {
        self.check_write()?;
        Ok(self.states.remove(entity_id).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_find_latest_returns_only_known_keys() {
        let rtdb = MemoryRtdb::new();
        let tenant = TenantId::random();
        let device = EntityId::device();
        rtdb.save_latest(device, TsKvEntry::new("temp", 10, 42.0));
        rtdb.save_latest(device, TsKvEntry::new("temp", 5, 1.0));

        let found = rtdb
            .find_latest(&tenant, &device, &keys(&["temp", "humidity"]))
            .await
            .unwrap();
        assert_eq!(found, vec![TsKvEntry::new("temp", 10, 42.0)]);
        assert_eq!(rtdb.stats().ts_fetches, 1);
    }

    #[tokio::test]
    async fn test_attributes_are_scoped() {
        let rtdb = MemoryRtdb::new();
        let tenant = TenantId::random();
        let device = EntityId::device();
        rtdb.save_attribute(
            device,
            AttributeScope::Server,
            AttributeKvEntry::new("alarmEnabled", 3, true),
        );

        let client = rtdb
            .find(&tenant, &device, AttributeScope::Client, &keys(&["alarmEnabled"]))
            .await
            .unwrap();
        assert!(client.is_empty());

        let server = rtdb
            .find(&tenant, &device, AttributeScope::Server, &keys(&["alarmEnabled"]))
            .await
            .unwrap();
        assert_eq!(server.len(), 1);

        assert!(rtdb.delete_attribute(device, AttributeScope::Server, "alarmEnabled"));
        assert!(!rtdb.delete_attribute(device, AttributeScope::Server, "alarmEnabled"));
    }

    #[tokio::test]
    async fn test_state_put_get_remove() {
        let rtdb = MemoryRtdb::new();
        let device = EntityId::device();
        assert_eq!(rtdb.get(&device).await.unwrap(), None);

        rtdb.put(&device, Bytes::from_static(b"v1")).await.unwrap();
        rtdb.put(&device, Bytes::from_static(b"v2")).await.unwrap();
        assert_eq!(rtdb.get(&device).await.unwrap(), Some(Bytes::from_static(b"v2")));

        assert!(rtdb.remove(&device).await.unwrap());
        assert!(!rtdb.remove(&device).await.unwrap());

        let stats = rtdb.stats();
        assert_eq!(stats.state_writes, 2);
        assert_eq!(stats.state_reads, 2);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let rtdb = MemoryRtdb::new();
        let device = EntityId::device();

        rtdb.fail_writes(Some("disk full"));
        let err = rtdb.put(&device, Bytes::from_static(b"x")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(rtdb.state_of(&device).is_none());

        rtdb.fail_writes(None);
        rtdb.put(&device, Bytes::from_static(b"x")).await.unwrap();

        rtdb.fail_reads(Some("offline"));
        assert!(rtdb.get(&device).await.is_err());
        assert!(rtdb
            .find_latest(&TenantId::random(), &device, &keys(&["temp"]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let rtdb = MemoryRtdb::new();
        let device = EntityId::device();
        rtdb.save_latest(device, TsKvEntry::new("temp", 1, 1.0));
        rtdb.put(&device, Bytes::from_static(b"x")).await.unwrap();

        rtdb.clear();
        assert_eq!(rtdb.stats(), MemoryStats::default());
    }
}
