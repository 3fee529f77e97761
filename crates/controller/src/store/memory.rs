//! In-process record store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use certpilot_common::ObjectKey;

use super::{LabelSelector, RecordStore, Secret, StoreError};

/// Record store backed by a concurrent map.
///
/// Per-key operations are atomic; `create` on an occupied key fails with
/// [`StoreError::AlreadyExists`] even under concurrent writers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<ObjectKey, Secret>,
    version: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total successful creates and updates since construction
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Secret, StoreError> {
        self.records
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })
    }

    async fn list(&self, selector: &LabelSelector) -> Result<Vec<Secret>, StoreError> {
        let mut matched: Vec<Secret> = self
            .records
            .iter()
            .filter(|entry| selector.matches(&entry.value().metadata.labels))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by_key(Secret::key);
        trace!(count = matched.len(), "Listed records");
        Ok(matched)
    }

    async fn create(&self, mut secret: Secret) -> Result<Secret, StoreError> {
        let key = secret.key();
        match self.records.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists { key }),
            Entry::Vacant(slot) => {
                secret.metadata.resource_version = Some(self.next_version());
                slot.insert(secret.clone());
                self.writes.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Created record");
                Ok(secret)
            }
        }
    }

    async fn update(&self, mut secret: Secret) -> Result<Secret, StoreError> {
        let key = secret.key();
        let mut existing = self
            .records
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;

        let actual = existing.metadata.resource_version.unwrap_or_default();
        if let Some(expected) = secret.metadata.resource_version {
            if expected != actual {
                return Err(StoreError::Conflict {
                    key,
                    expected,
                    actual,
                });
            }
        }

        secret.metadata.resource_version = Some(self.next_version());
        *existing = secret.clone();
        self.writes.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, "Updated record");
        Ok(secret)
    }
}
