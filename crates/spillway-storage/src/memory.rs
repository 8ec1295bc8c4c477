//! In-memory storage implementation
//!
//! Suitable for testing and for dry runs where durability across process
//! restarts is not needed. Values outlive any buffering engine built on top
//! of the store, which is what the restart tests rely on.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use spillway_core::PartitionId;
use tracing::trace;

use crate::DurableStore;
use crate::error::StorageError;

/// In-memory implementation of DurableStore
///
/// Uses `DashMap` for concurrent access to per-partition records.
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    /// Map from (partition, key) to value
    records: DashMap<(PartitionId, String), Vec<u8>>,
    /// Map from partition to alarm timestamp
    alarms: DashMap<PartitionId, u64>,
    /// When set, every mutating call fails with `Unavailable`
    fail_writes: AtomicBool,
    /// Number of successful puts, for asserting write amplification in tests
    put_count: AtomicUsize,
}

impl InMemoryDurableStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (fault injection)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `put` calls so far
    pub fn put_count(&self) -> usize {
        self.put_count.load(Ordering::SeqCst)
    }

    /// Number of stored records across all partitions
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("writes disabled"));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn get(
        &self,
        partition: &PartitionId,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .records
            .get(&(partition.clone(), key.to_string()))
            .map(|v| v.value().clone()))
    }

    async fn put(
        &self,
        partition: &PartitionId,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.check_writable()?;
        trace!(partition = %partition, key, bytes = value.len(), "Put record");
        self.records
            .insert((partition.clone(), key.to_string()), value);
        self.put_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, partition: &PartitionId, key: &str) -> Result<bool, StorageError> {
        self.check_writable()?;
        Ok(self
            .records
            .remove(&(partition.clone(), key.to_string()))
            .is_some())
    }

    async fn get_alarm(&self, partition: &PartitionId) -> Result<Option<u64>, StorageError> {
        Ok(self.alarms.get(partition).map(|v| *v))
    }

    async fn set_alarm(&self, partition: &PartitionId, at_ms: u64) -> Result<(), StorageError> {
        self.check_writable()?;
        trace!(partition = %partition, at_ms, "Set alarm");
        self.alarms.insert(partition.clone(), at_ms);
        Ok(())
    }

    async fn delete_alarm(&self, partition: &PartitionId) -> Result<(), StorageError> {
        self.check_writable()?;
        self.alarms.remove(partition);
        Ok(())
    }

    async fn partitions(&self) -> Result<Vec<PartitionId>, StorageError> {
        let mut found = BTreeSet::new();
        for entry in self.records.iter() {
            found.insert(entry.key().0.clone());
        }
        for entry in self.alarms.iter() {
            found.insert(entry.key().clone());
        }
        Ok(found.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(id: &str) -> PartitionId {
        PartitionId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryDurableStore::new();
        let p = partition("p");

        assert!(store.get(&p, "k").await.unwrap().is_none());
        store.put(&p, "k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get(&p, "k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.put_count(), 1);

        assert!(store.delete(&p, "k").await.unwrap());
        assert!(!store.delete(&p, "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_alarm_replaced_not_duplicated() {
        let store = InMemoryDurableStore::new();
        let p = partition("p");

        store.set_alarm(&p, 100).await.unwrap();
        store.set_alarm(&p, 200).await.unwrap();
        assert_eq!(store.get_alarm(&p).await.unwrap(), Some(200));

        store.delete_alarm(&p).await.unwrap();
        assert!(store.get_alarm(&p).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = InMemoryDurableStore::new();
        let p = partition("p");
        store.put(&p, "k", vec![1]).await.unwrap();

        store.set_fail_writes(true);
        let err = store.put(&p, "k", vec![2]).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert!(store.set_alarm(&p, 1).await.is_err());

        // Reads still work and see the last durable value
        assert_eq!(store.get(&p, "k").await.unwrap(), Some(vec![1]));

        store.set_fail_writes(false);
        store.put(&p, "k", vec![3]).await.unwrap();
        assert_eq!(store.get(&p, "k").await.unwrap(), Some(vec![3]));
    }

    #[tokio::test]
    async fn test_partitions_lists_records_and_alarms() {
        let store = InMemoryDurableStore::new();
        store.put(&partition("b"), "k", vec![]).await.unwrap();
        store.set_alarm(&partition("a"), 5).await.unwrap();
        store.put(&partition("b"), "other", vec![]).await.unwrap();

        let partitions = store.partitions().await.unwrap();
        assert_eq!(partitions, vec![partition("a"), partition("b")]);
    }
}
