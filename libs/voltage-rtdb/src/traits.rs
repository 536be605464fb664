//! Trait definitions for the storage collaborators
//!
//! The alarm engine only reads time-series and attributes (for hydration)
//! and reads/writes its own evaluation checkpoints. It never writes
//! telemetry or attributes.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use voltage_model::{AttributeKvEntry, AttributeScope, EntityId, TenantId, TsKvEntry};

/// Latest time-series values
///
/// Implementations:
/// - `MemoryRtdb`: In-memory backend for testing and embedded use
#[async_trait]
pub trait TimeseriesStore: Send + Sync + 'static {
    /// Find the latest entry for each requested key
    ///
    /// Keys without any stored entry are omitted from the result.
    async fn find_latest(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        keys: &[String],
    ) -> Result<Vec<TsKvEntry>>;
}

/// Entity attributes, per scope
#[async_trait]
pub trait AttributeStore: Send + Sync + 'static {
    /// Find the requested attributes of one scope
    ///
    /// Keys without a stored attribute are omitted from the result.
    async fn find(
        &self,
        tenant_id: &TenantId,
        entity_id: &EntityId,
        scope: AttributeScope,
        keys: &[String],
    ) -> Result<Vec<AttributeKvEntry>>;
}

/// Durable checkpoint store, one opaque record per entity
///
/// `put` must be atomic per entity: readers observe either the previous
/// record or the new one, never a partial write.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Read the checkpoint of an entity
    async fn get(&self, entity_id: &EntityId) -> Result<Option<Bytes>>;

    /// Replace the checkpoint of an entity
    async fn put(&self, entity_id: &EntityId, record: Bytes) -> Result<()>;

    /// Delete the checkpoint of an entity, returns whether one existed
    async fn remove(&self, entity_id: &EntityId) -> Result<bool>;
}
