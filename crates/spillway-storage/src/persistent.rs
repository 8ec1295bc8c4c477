//! redb-backed persistent storage
//!
//! Records live in one table keyed by `partition \0 key`; alarms live in a
//! second table keyed by partition. Partition ids never contain control
//! characters, so the separator cannot collide.
//!
//! Every mutation is its own write transaction. redb fsyncs on commit, so a
//! returned `Ok` means the write survives a crash. redb calls block, so they
//! run on tokio's blocking pool.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use spillway_core::PartitionId;
use tracing::{debug, info, instrument, trace};

use crate::DurableStore;
use crate::error::StorageError;

// Key: partition bytes ++ 0x00 ++ record key, Value: opaque record bytes
const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

// Key: partition bytes, Value: alarm timestamp (Unix ms)
const ALARMS: TableDefinition<&[u8], u64> = TableDefinition::new("alarms");

const KEY_SEPARATOR: u8 = 0;

/// Configuration for redb storage
#[derive(Debug, Clone)]
pub struct RedbStoreConfig {
    /// Path to the database file
    pub db_path: PathBuf,
}

impl Default for RedbStoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/spillway.redb"),
        }
    }
}

impl RedbStoreConfig {
    /// Place the database file inside a data directory
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: data_dir.into().join("spillway.redb"),
        }
    }
}

/// Persistent implementation of DurableStore backed by redb
#[derive(Clone)]
pub struct RedbDurableStore {
    db: Arc<Database>,
    config: RedbStoreConfig,
}

impl std::fmt::Debug for RedbDurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbDurableStore")
            .field("db_path", &self.config.db_path)
            .finish()
    }
}

impl RedbDurableStore {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbStoreConfig) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&config.db_path)?;
        info!("Opened redb database");

        let store = Self {
            db: Arc::new(db),
            config,
        };
        store.init_tables()?;
        Ok(store)
    }

    /// Create tables if they don't exist
    fn init_tables(&self) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write()?;
        write_txn.open_table(RECORDS)?;
        write_txn.open_table(ALARMS)?;
        write_txn.commit()?;

        debug!("Initialized redb tables");
        Ok(())
    }

    /// Get the configuration
    pub fn config(&self) -> &RedbStoreConfig {
        &self.config
    }

    /// Run a blocking closure against the database on the blocking pool
    async fn with_db<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StorageError::Io(format!("blocking task failed: {e}")))?
    }
}

fn record_key(partition: &PartitionId, key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(partition.as_bytes().len() + 1 + key.len());
    out.extend_from_slice(partition.as_bytes());
    out.push(KEY_SEPARATOR);
    out.extend_from_slice(key.as_bytes());
    out
}

fn partition_from_bytes(bytes: &[u8]) -> Result<PartitionId, StorageError> {
    let id = std::str::from_utf8(bytes)
        .map_err(|e| StorageError::InvalidPartition(e.to_string()))?;
    PartitionId::new(id).map_err(|e| StorageError::InvalidPartition(e.to_string()))
}

#[async_trait]
impl DurableStore for RedbDurableStore {
    async fn get(
        &self,
        partition: &PartitionId,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let full_key = record_key(partition, key);
        self.with_db(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(RECORDS)?;
            let value = table.get(full_key.as_slice())?.map(|v| v.value().to_vec());
            Ok(value)
        })
        .await
    }

    async fn put(
        &self,
        partition: &PartitionId,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), StorageError> {
        trace!(partition = %partition, key, bytes = value.len(), "Put record (redb)");
        let full_key = record_key(partition, key);
        self.with_db(move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(RECORDS)?;
                table.insert(full_key.as_slice(), value.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, partition: &PartitionId, key: &str) -> Result<bool, StorageError> {
        let full_key = record_key(partition, key);
        self.with_db(move |db| {
            let write_txn = db.begin_write()?;
            let removed = {
                let mut table = write_txn.open_table(RECORDS)?;
                table.remove(full_key.as_slice())?.is_some()
            };
            write_txn.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn get_alarm(&self, partition: &PartitionId) -> Result<Option<u64>, StorageError> {
        let key = partition.as_bytes().to_vec();
        self.with_db(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(ALARMS)?;
            let value = table.get(key.as_slice())?.map(|v| v.value());
            Ok(value)
        })
        .await
    }

    async fn set_alarm(&self, partition: &PartitionId, at_ms: u64) -> Result<(), StorageError> {
        trace!(partition = %partition, at_ms, "Set alarm (redb)");
        let key = partition.as_bytes().to_vec();
        self.with_db(move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(ALARMS)?;
                table.insert(key.as_slice(), at_ms)?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_alarm(&self, partition: &PartitionId) -> Result<(), StorageError> {
        let key = partition.as_bytes().to_vec();
        self.with_db(move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(ALARMS)?;
                table.remove(key.as_slice())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn partitions(&self) -> Result<Vec<PartitionId>, StorageError> {
        self.with_db(|db| {
            let read_txn = db.begin_read()?;
            let mut found = BTreeSet::new();

            let records = read_txn.open_table(RECORDS)?;
            for entry in records.iter()? {
                let (key, _) = entry?;
                let key = key.value();
                let end = key
                    .iter()
                    .position(|b| *b == KEY_SEPARATOR)
                    .unwrap_or(key.len());
                found.insert(partition_from_bytes(&key[..end])?);
            }

            let alarms = read_txn.open_table(ALARMS)?;
            for entry in alarms.iter()? {
                let (key, _) = entry?;
                found.insert(partition_from_bytes(key.value())?);
            }

            Ok(found.into_iter().collect())
        })
        .await
    }
}
