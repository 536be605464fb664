//! Value Snapshot
//!
//! Per-entity cache of the latest value of every condition key referenced by
//! the entity's active rules. Hydrated once from storage, then advanced only
//! by merges of live events.
//!
//! Merge rule: last writer wins by timestamp. An update older than the stored
//! value is ignored, an update with the same timestamp keeps the stored value
//! and is not reported as a change.

use crate::error::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;
use voltage_model::{
    AttributeKvEntry, AttributeScope, ConditionKey, ConditionKeyType, EntityId, TenantId,
    TypedValue,
};
use voltage_rtdb::{AttributeStore, TimeseriesStore};

/// Stored value of one condition key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotEntry {
    pub ts: i64,
    pub value: TypedValue,
}

/// What produced a snapshot update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateKind {
    TimeSeries,
    Attributes,
    AttributesDeleted,
}

/// Result of a merge: the keys whose stored value actually moved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotUpdate {
    pub kind: UpdateKind,
    pub changed_keys: HashSet<ConditionKey>,
}

impl SnapshotUpdate {
    pub fn new(kind: UpdateKind) -> Self {
        Self {
            kind,
            changed_keys: HashSet::new(),
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changed_keys.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSnapshot {
    /// Keys referenced by at least one active rule
    tracked: HashSet<ConditionKey>,
    values: HashMap<ConditionKey, SnapshotEntry>,
    /// High-water timestamp of merged telemetry/attributes
    ts: i64,
}

impl ValueSnapshot {
    pub fn new(tracked: HashSet<ConditionKey>) -> Self {
        Self {
            tracked,
            values: HashMap::new(),
            ts: 0,
        }
    }

    pub fn tracked_keys(&self) -> &HashSet<ConditionKey> {
        &self.tracked
    }

    pub fn is_tracked(&self, key: &ConditionKey) -> bool {
        self.tracked.contains(key)
    }

    pub fn get(&self, key: &ConditionKey) -> Option<&SnapshotEntry> {
        self.values.get(key)
    }

    pub fn value(&self, key: &ConditionKey) -> Option<&TypedValue> {
        self.values.get(key).map(|entry| &entry.value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn ts(&self) -> i64 {
        self.ts
    }

    /// Plain copy of the stored values, keyed by `TYPE:name`
    pub fn to_map(&self) -> BTreeMap<String, SnapshotEntry> {
        self.values
            .iter()
            .map(|(key, entry)| (key.to_string(), entry.clone()))
            .collect()
    }

    /// Start tracking additional keys (values arrive via merge or fetch)
    pub fn track_keys<'a>(&mut self, keys: impl IntoIterator<Item = &'a ConditionKey>) {
        self.tracked.extend(keys.into_iter().cloned());
    }

    /// Restrict tracking to `keys`, dropping values nobody references anymore
    pub fn retain_keys(&mut self, keys: &HashSet<ConditionKey>) {
        self.tracked = keys.clone();
        self.values.retain(|key, _| keys.contains(key));
    }

    /// Apply the merge rule to one key, returns whether the stored value moved
    pub fn put_value(&mut self, key: ConditionKey, ts: i64, value: TypedValue) -> bool {
        if !self.tracked.contains(&key) {
            return false;
        }
        let changed = match self.values.get(&key) {
            Some(existing) => existing.ts < ts,
            None => true,
        };
        if changed {
            self.values.insert(key, SnapshotEntry { ts, value });
        }
        self.ts = self.ts.max(ts);
        changed
    }

    /// Merge telemetry values sharing one timestamp
    pub fn merge_time_series(
        &mut self,
        ts: i64,
        values: &BTreeMap<String, TypedValue>,
    ) -> SnapshotUpdate {
        let mut update = SnapshotUpdate::new(UpdateKind::TimeSeries);
        for (name, value) in values {
            let key = ConditionKey::time_series(name.as_str());
            if self.put_value(key.clone(), ts, value.clone()) {
                update.changed_keys.insert(key);
            }
        }
        self.ts = self.ts.max(ts);
        update
    }

    /// Merge attributes, each carrying its own last-update timestamp
    pub fn merge_attributes(&mut self, entries: &[AttributeKvEntry]) -> SnapshotUpdate {
        let mut update = SnapshotUpdate::new(UpdateKind::Attributes);
        for entry in entries {
            let Some(value) = &entry.value else {
                continue;
            };
            let key = ConditionKey::attribute(entry.key.as_str());
            if self.put_value(key.clone(), entry.last_update_ts, value.clone()) {
                update.changed_keys.insert(key);
            }
        }
        update
    }

    /// Drop deleted attributes; the update lists the keys that were present
    pub fn remove_keys(&mut self, names: &[String]) -> SnapshotUpdate {
        let mut update = SnapshotUpdate::new(UpdateKind::AttributesDeleted);
        update.changed_keys = names
            .iter()
            .map(|name| ConditionKey::attribute(name.as_str()))
            .filter(|key| self.values.remove(key).is_some())
            .collect();
        update
    }
}

// ============================================================================
// Storage reads
// ============================================================================

/// Values loaded for a set of keys, ready to be folded into a snapshot
pub type FetchedValues = Vec<(ConditionKey, i64, TypedValue)>;

/// Read the current stored values of `keys`
///
/// Time-series keys come from one latest-value query. Attribute keys are read
/// from every scope; when a key exists in several scopes the most recently
/// updated one wins. Absent or null values are skipped.
pub async fn fetch_values(
    tenant_id: &TenantId,
    entity_id: &EntityId,
    keys: &HashSet<ConditionKey>,
    ts_store: &dyn TimeseriesStore,
    attr_store: &dyn AttributeStore,
) -> Result<FetchedValues> {
    let mut ts_names: Vec<String> = Vec::new();
    let mut attr_names: Vec<String> = Vec::new();
    for key in keys {
        match key.kind {
            ConditionKeyType::TimeSeries => ts_names.push(key.name.clone()),
            ConditionKeyType::Attribute => attr_names.push(key.name.clone()),
        }
    }
    ts_names.sort();
    attr_names.sort();

    let mut fetched = FetchedValues::new();

    if !ts_names.is_empty() {
        for entry in ts_store.find_latest(tenant_id, entity_id, &ts_names).await? {
            if let Some(value) = entry.value {
                fetched.push((ConditionKey::time_series(entry.key), entry.ts, value));
            }
        }
    }

    if !attr_names.is_empty() {
        let mut latest: HashMap<String, (i64, TypedValue)> = HashMap::new();
        for scope in AttributeScope::ALL {
            for entry in attr_store
                .find(tenant_id, entity_id, scope, &attr_names)
                .await?
            {
                let Some(value) = entry.value else {
                    continue;
                };
                let newer = latest
                    .get(&entry.key)
                    .map_or(true, |(ts, _)| *ts < entry.last_update_ts);
                if newer {
                    latest.insert(entry.key, (entry.last_update_ts, value));
                }
            }
        }
        fetched.extend(
            latest
                .into_iter()
                .map(|(name, (ts, value))| (ConditionKey::attribute(name), ts, value)),
        );
    }

    Ok(fetched)
}

/// Build a snapshot for `keys` from storage
pub async fn hydrate(
    tenant_id: &TenantId,
    entity_id: &EntityId,
    keys: &HashSet<ConditionKey>,
    ts_store: &dyn TimeseriesStore,
    attr_store: &dyn AttributeStore,
) -> Result<ValueSnapshot> {
    let fetched = fetch_values(tenant_id, entity_id, keys, ts_store, attr_store).await?;
    let mut snapshot = ValueSnapshot::new(keys.clone());
    for (key, ts, value) in fetched {
        snapshot.put_value(key, ts, value);
    }
    debug!(
        "[{}] hydrated {} of {} keys",
        entity_id,
        snapshot.len(),
        keys.len()
    );
    Ok(snapshot)
}
