//! # Spillway Storage
//!
//! Durable per-partition storage for the Spillway buffering engine.
//!
//! Each partition owns a small key-value namespace plus a single scheduled
//! wake-up ("alarm"). The buffering engine keeps its pending events in that
//! namespace so they survive process restarts.
//!
//! ## Features
//!
//! - **DurableStore trait**: Partition-scoped get/put/delete and alarm primitives
//! - **InMemoryDurableStore**: DashMap-backed implementation for tests and dry runs
//! - **RedbDurableStore**: redb-backed implementation for production
//!
//! ## Example
//!
//! ```rust,ignore
//! use spillway_storage::{DurableStore, InMemoryDurableStore};
//! use spillway_core::PartitionId;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryDurableStore::new();
//!     let partition = PartitionId::global();
//!
//!     store.put(&partition, "buffer", b"...".to_vec()).await.unwrap();
//!     store.set_alarm(&partition, 1_700_000_000_000).await.unwrap();
//!
//!     assert!(store.get(&partition, "buffer").await.unwrap().is_some());
//!     assert_eq!(store.get_alarm(&partition).await.unwrap(), Some(1_700_000_000_000));
//! }
//! ```

pub mod error;
pub mod memory;
pub mod persistent;

// Re-exports
pub use error::StorageError;
pub use memory::InMemoryDurableStore;
pub use persistent::{RedbDurableStore, RedbStoreConfig};

use async_trait::async_trait;
use spillway_core::PartitionId;

/// Partition-scoped durable key-value storage with a single alarm per partition
///
/// A successful `put` or `delete` must be durable when it returns: the
/// buffering engine acknowledges ingests only after its write resolves.
///
/// Alarms are Unix epoch milliseconds. The store only records them; firing is
/// the scheduler's job.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read a value from the partition's namespace
    async fn get(&self, partition: &PartitionId, key: &str)
    -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a value into the partition's namespace, replacing any previous one
    async fn put(
        &self,
        partition: &PartitionId,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), StorageError>;

    /// Remove a value, returning whether it existed
    async fn delete(&self, partition: &PartitionId, key: &str) -> Result<bool, StorageError>;

    /// The partition's scheduled alarm, if any
    async fn get_alarm(&self, partition: &PartitionId) -> Result<Option<u64>, StorageError>;

    /// Record the partition's alarm, replacing any previous one
    async fn set_alarm(&self, partition: &PartitionId, at_ms: u64) -> Result<(), StorageError>;

    /// Remove the partition's alarm
    async fn delete_alarm(&self, partition: &PartitionId) -> Result<(), StorageError>;

    /// Every partition holding at least one value or an alarm
    async fn partitions(&self) -> Result<Vec<PartitionId>, StorageError>;
}
