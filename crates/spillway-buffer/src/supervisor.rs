//! Partition table
//!
//! [`PartitionSupervisor`] owns one [`BufferCore`] per partition identity,
//! creating each lazily on first use. It is the only place buffers live, so
//! a partition always has exactly one owner within the process.
//!
//! Buffers that are empty and unused are evicted by a periodic sweep. Their
//! durable record stays behind and is rehydrated when the partition is next
//! used.

use std::sync::Arc;

use dashmap::DashMap;
use spillway_core::{Event, PartitionId};
use spillway_storage::StorageError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::BufferConfig;
use crate::buffer::{BufferCore, BufferStats, Collaborators, FlushOutcome};
use crate::error::{FlushResult, IngestResult};

/// Owner of every active partition's buffer
pub struct PartitionSupervisor {
    config: BufferConfig,
    collaborators: Collaborators,
    partitions: DashMap<PartitionId, Arc<BufferCore>>,
}

impl PartitionSupervisor {
    pub fn new(config: BufferConfig, collaborators: Collaborators) -> Self {
        for warning in config.validate() {
            warn!(%warning, "Buffer configuration warning");
        }
        Self {
            config,
            collaborators,
            partitions: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Buffer for `partition`, created on first access
    pub fn partition(&self, partition: &PartitionId) -> Arc<BufferCore> {
        if let Some(core) = self.partitions.get(partition) {
            return Arc::clone(&core);
        }
        self.partitions
            .entry(partition.clone())
            .or_insert_with(|| {
                BufferCore::new(
                    partition.clone(),
                    self.config.clone(),
                    self.collaborators.clone(),
                )
            })
            .clone()
    }

    /// Buffer for `partition` only if it is already active
    pub fn get(&self, partition: &PartitionId) -> Option<Arc<BufferCore>> {
        self.partitions.get(partition).map(|core| Arc::clone(&core))
    }

    /// Route one event to its partition's buffer
    pub async fn ingest(&self, partition: &PartitionId, event: Event) -> IngestResult<()> {
        self.partition(partition).ingest(event).await
    }

    /// Activate every partition the store holds state for
    ///
    /// Events persisted by a previous process are then flushed by their
    /// timers even if no new event arrives for them. Returns how many
    /// partitions were activated.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<usize, StorageError> {
        let stored = self.collaborators.store.partitions().await?;
        let mut activated = 0;

        for partition in stored {
            match self.partition(&partition).rehydrate().await {
                Ok(()) => activated += 1,
                Err(e) => error!(partition = %partition, error = %e, "Failed to rehydrate partition"),
            }
        }

        info!(partitions = activated, "Recovered persisted partitions");
        Ok(activated)
    }

    /// Flush every active partition, reporting each outcome
    pub async fn flush_all(&self) -> Vec<(PartitionId, FlushResult<FlushOutcome>)> {
        let mut results = Vec::new();
        for core in self.cores() {
            let outcome = core.flush().await;
            results.push((core.partition().clone(), outcome));
        }
        results
    }

    /// Stats for every active partition, ordered by partition id
    pub async fn stats(&self) -> Vec<(PartitionId, BufferStats)> {
        let mut stats = Vec::new();
        for core in self.cores() {
            stats.push((core.partition().clone(), core.stats().await));
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Stop every timer and make one last flush per partition
    ///
    /// Returns the number of partitions whose final flush failed. Their
    /// events remain in the durable store for the next process.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> usize {
        let mut failed = 0;
        for core in self.cores() {
            match core.shutdown().await {
                Ok(outcome) => {
                    info!(partition = %core.partition(), ?outcome, "Partition drained");
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        partition = %core.partition(),
                        error = %e,
                        "Final flush failed, events stay persisted"
                    );
                }
            }
        }
        failed
    }

    /// Drop every buffer that holds no events and that nothing else references
    ///
    /// The reference check runs under the map's shard lock, so a buffer
    /// handed out by [`partition`](Self::partition) is never evicted while in
    /// use. Returns how many partitions were evicted.
    pub async fn evict_idle(&self) -> usize {
        let candidates: Vec<PartitionId> = self
            .partitions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = Vec::new();
        for partition in candidates {
            let removed = self.partitions.remove_if(&partition, |_, core| {
                Arc::strong_count(core) == 1 && core.is_rehydrated() && core.is_idle()
            });
            if let Some((_, core)) = removed {
                evicted.push(core);
            }
        }

        for core in &evicted {
            core.retire().await;
            debug!(partition = %core.partition(), "Evicted idle partition");
        }
        evicted.len()
    }

    /// Run [`evict_idle`](Self::evict_idle) every `idle_sweep_interval` until `shutdown`
    ///
    /// Returns `None` when the interval is zero.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let every = self.config.idle_sweep_interval;
        if every.is_zero() {
            return None;
        }

        let supervisor = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = supervisor.evict_idle().await;
                        if evicted > 0 {
                            info!(evicted, active = supervisor.len(), "Evicted idle partitions");
                        }
                    }
                }
            }
        }))
    }

    /// Snapshot of active buffers sorted by partition, without holding map locks
    fn cores(&self) -> Vec<Arc<BufferCore>> {
        let mut cores: Vec<Arc<BufferCore>> = self
            .partitions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        cores.sort_by(|a, b| a.partition().cmp(b.partition()));
        cores
    }
}
