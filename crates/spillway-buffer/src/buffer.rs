//! Per-partition buffering state machine
//!
//! [`BufferCore`] owns one partition's pending events. All state changes go
//! through a single async mutex, so ingest and flush never observe a torn
//! buffer. The lock is released while the sink is being called: events
//! ingested during a send land behind the in-flight snapshot.
//!
//! The durable record always holds the in-flight snapshot followed by the
//! buffer. A snapshot leaves the record only once the sink confirms it.
//!
//! Every flush attempt runs on a task of its own that holds the buffer alive.
//! Callers only await its handle, so a caller that goes away mid-send never
//! leaves a snapshot stranded in flight.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::Serialize;
use spillway_core::{Clock, Event, EventError, PartitionId, Sink};
use spillway_storage::{DurableStore, StorageError};
use tokio::sync::{Mutex, OnceCell, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::BufferConfig;
use crate::error::{FlushError, FlushResult, IngestError, IngestResult};
use crate::persistence::{self, BUFFER_KEY};
use crate::policy::{self, FlushTrigger};
use crate::scheduler::{FlushTarget, Scheduler};

/// External services a buffer talks to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DurableStore>,
    /// `None` when no sink is configured; flushes then fail without touching the buffer
    pub sink: Option<Arc<dyn Sink>>,
    pub clock: Arc<dyn Clock>,
}

/// Result of a flush that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered; the sink was not called
    Empty,
    /// The sink accepted this many events
    Delivered { events: usize },
}

/// Point-in-time view of a partition's buffer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub buffered_events: usize,
    pub buffered_bytes: usize,
    pub in_flight_events: usize,
    pub consecutive_failures: u32,
    pub last_flush_ms: Option<u64>,
    pub next_deadline_ms: Option<u64>,
}

/// A buffered event and its compact JSON size
#[derive(Debug, Clone)]
struct Entry {
    event: Event,
    size: usize,
}

impl Entry {
    fn new(event: Event) -> Result<Self, EventError> {
        let size = event.encoded_len()?;
        Ok(Self { event, size })
    }
}

#[derive(Debug, Default)]
struct BufferState {
    events: VecDeque<Entry>,
    /// Sum of `size` over `events`
    bytes: usize,
    /// Snapshot handed to the sink, if an attempt is running
    in_flight: Option<Vec<Entry>>,
    last_flush_ms: Option<u64>,
    consecutive_failures: u32,
}

impl BufferState {
    /// In-flight events followed by buffered ones
    fn pending(&self) -> impl Iterator<Item = &Event> + '_ {
        self.in_flight
            .iter()
            .flatten()
            .chain(self.events.iter())
            .map(|entry| &entry.event)
    }

    fn pending_len(&self) -> usize {
        self.in_flight.as_ref().map_or(0, Vec::len) + self.events.len()
    }

    fn push(&mut self, entry: Entry) {
        self.bytes += entry.size;
        self.events.push_back(entry);
    }

    fn pop_back(&mut self) {
        if let Some(entry) = self.events.pop_back() {
            self.bytes -= entry.size;
        }
    }

    /// Move the oldest `count` buffered events into a new in-flight snapshot
    fn take_snapshot(&mut self, count: usize) -> Vec<Event> {
        let count = count.min(self.events.len());
        let entries: Vec<Entry> = self.events.drain(..count).collect();
        self.bytes -= entries.iter().map(|entry| entry.size).sum::<usize>();
        let batch = entries.iter().map(|entry| entry.event.clone()).collect();
        self.in_flight = Some(entries);
        batch
    }

    /// Put the snapshot back ahead of anything ingested since it was taken
    fn restore_snapshot(&mut self) {
        if let Some(entries) = self.in_flight.take() {
            for entry in entries.into_iter().rev() {
                self.bytes += entry.size;
                self.events.push_front(entry);
            }
        }
    }

    /// Drop a delivered snapshot, returning how many events it held
    fn confirm_snapshot(&mut self) -> usize {
        self.in_flight.take().map_or(0, |entries| entries.len())
    }
}

/// Buffering engine for a single partition
pub struct BufferCore {
    /// Handed to attempt tasks so they keep the buffer alive
    this: Weak<BufferCore>,
    partition: PartitionId,
    config: BufferConfig,
    store: Arc<dyn DurableStore>,
    sink: Option<Arc<dyn Sink>>,
    clock: Arc<dyn Clock>,
    state: Mutex<BufferState>,
    /// Rehydration barrier
    loaded: OnceCell<()>,
    /// `true` while a flush attempt is running
    in_flight: watch::Sender<bool>,
    scheduler: Arc<Scheduler>,
}

impl BufferCore {
    /// Create a buffer and start its scheduler timer
    ///
    /// Must be called inside a tokio runtime. Rehydration happens lazily on
    /// the first ingest or flush, or eagerly through [`rehydrate`](Self::rehydrate).
    pub fn new(
        partition: PartitionId,
        config: BufferConfig,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        let scheduler = Arc::new(Scheduler::new(
            partition.clone(),
            config.flush_interval,
            Arc::clone(&collaborators.store),
            Arc::clone(&collaborators.clock),
        ));

        let core = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            partition,
            config,
            store: collaborators.store,
            sink: collaborators.sink,
            clock: collaborators.clock,
            state: Mutex::new(BufferState::default()),
            loaded: OnceCell::new(),
            in_flight: watch::Sender::new(false),
            scheduler,
        });

        let target: Weak<dyn FlushTarget> = Arc::downgrade(&core) as Weak<dyn FlushTarget>;
        core.scheduler.start(target);
        core
    }

    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Load the persisted buffer once; later calls wait for or reuse that load
    ///
    /// A failed load is retried by the next caller.
    pub async fn rehydrate(&self) -> Result<(), StorageError> {
        self.loaded.get_or_try_init(|| self.load()).await?;
        Ok(())
    }

    pub fn is_rehydrated(&self) -> bool {
        self.loaded.initialized()
    }

    async fn load(&self) -> Result<(), StorageError> {
        let rehydrated = persistence::load(self.store.as_ref(), &self.partition).await?;

        let entries = rehydrated
            .events
            .into_iter()
            .map(Entry::new)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::deserialization(e.to_string()))?;
        let restored = entries.len();

        match rehydrated.alarm_ms {
            Some(at_ms) => self.scheduler.adopt(at_ms),
            None if restored > 0 => {
                self.scheduler.ensure_scheduled().await;
            }
            None => {}
        }

        // No await between filling the state and returning, so an abandoned
        // load never leaves events behind for the retry to load again
        let mut state = self.state.lock().await;
        for entry in entries {
            state.push(entry);
        }
        state.last_flush_ms = rehydrated.last_flush_ms;

        if restored > 0 {
            info!(partition = %self.partition, events = restored, "Partition rehydrated");
        }
        Ok(())
    }

    /// Buffer one event
    ///
    /// Returns only after the event is durably recorded. A size- or
    /// count-triggered flush is started in the background and does not delay
    /// the acknowledgment.
    #[instrument(skip(self, event), fields(partition = %self.partition))]
    pub async fn ingest(&self, event: Event) -> IngestResult<()> {
        self.rehydrate().await?;

        let entry = Entry::new(event).map_err(|e| IngestError::InvalidPayload(e.to_string()))?;
        let size = entry.size;

        let mut state = self.state.lock().await;

        let limit = self.config.max_pending_events;
        if state.pending_len() >= limit {
            warn!(limit, "Buffer full, refusing event");
            return Err(IngestError::BufferFull { limit });
        }

        // What is already buffered goes out first so the new event starts a fresh batch
        let size_flush = !state.events.is_empty()
            && policy::exceeds_bytes(state.bytes, size, self.config.max_buffer_bytes);

        state.push(entry);

        if let Err(e) = self.persist(&state).await {
            state.pop_back();
            error!(error = %e, "Failed to persist event, refusing it");
            return Err(IngestError::PersistenceFailed(e));
        }

        if state.in_flight.is_none() {
            let trigger = if size_flush {
                Some((state.events.len() - 1, FlushTrigger::Size))
            } else if policy::count_reached(state.events.len(), self.config.max_event_count) {
                Some((state.events.len(), FlushTrigger::Count))
            } else {
                None
            };
            // Detached: the attempt logs its own outcome
            if let Some((count, trigger)) = trigger {
                let _ = self.start_attempt(&mut state, count, trigger);
            }
        }

        trace!(
            events = state.events.len(),
            bytes = state.bytes,
            "Event buffered"
        );
        drop(state);

        self.scheduler.ensure_scheduled().await;
        Ok(())
    }

    /// Flush the buffer now
    ///
    /// Waits for any attempt already in flight, then delivers whatever is
    /// buffered. An empty buffer is a no-op that never calls the sink.
    pub async fn flush(&self) -> FlushResult<FlushOutcome> {
        self.flush_triggered(FlushTrigger::Manual).await
    }

    /// Stop the timer and make one last awaited flush
    ///
    /// Events that still fail to deliver stay in the durable store.
    pub async fn shutdown(&self) -> FlushResult<FlushOutcome> {
        self.scheduler.stop();
        self.flush_triggered(FlushTrigger::Shutdown).await
    }

    /// Wait until no flush attempt is running
    pub async fn settled(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    pub async fn stats(&self) -> BufferStats {
        let state = self.state.lock().await;
        BufferStats {
            buffered_events: state.events.len(),
            buffered_bytes: state.bytes,
            in_flight_events: state.in_flight.as_ref().map_or(0, Vec::len),
            consecutive_failures: state.consecutive_failures,
            last_flush_ms: state.last_flush_ms,
            next_deadline_ms: self.scheduler.deadline(),
        }
    }

    /// Every event not yet confirmed by the sink, in arrival order
    pub async fn pending_events(&self) -> Vec<Event> {
        let state = self.state.lock().await;
        state.pending().cloned().collect()
    }

    async fn flush_triggered(&self, trigger: FlushTrigger) -> FlushResult<FlushOutcome> {
        self.rehydrate().await.map_err(FlushError::Rehydration)?;

        let attempt = loop {
            let mut state = self.state.lock().await;
            if state.in_flight.is_none() {
                if state.events.is_empty() {
                    trace!(partition = %self.partition, %trigger, "Nothing to flush");
                    return Ok(FlushOutcome::Empty);
                }
                let count = state.events.len();
                break self.start_attempt(&mut state, count, trigger)?;
            }
            drop(state);
            self.settled().await;
        };

        attempt
            .await
            .unwrap_or_else(|e| Err(FlushError::Aborted(e.to_string())))
    }

    /// Snapshot the oldest `count` events and send them on a task of their own
    ///
    /// Must be called with no attempt in flight. Dropping the returned handle
    /// detaches the attempt; it still settles the snapshot.
    fn start_attempt(
        &self,
        state: &mut BufferState,
        count: usize,
        trigger: FlushTrigger,
    ) -> FlushResult<JoinHandle<FlushResult<FlushOutcome>>> {
        if self.sink.is_none() {
            warn!(
                partition = %self.partition,
                events = state.events.len(),
                "No sink configured, leaving buffer untouched"
            );
            return Err(FlushError::SinkUnavailable);
        }
        let Some(core) = self.this.upgrade() else {
            return Err(FlushError::Aborted("buffer is shutting down".to_string()));
        };

        let batch = state.take_snapshot(count);
        self.in_flight.send_replace(true);

        Ok(tokio::spawn(async move {
            let send = tokio::spawn({
                let core = Arc::clone(&core);
                async move { core.run_attempt(batch, trigger).await }
            });
            match send.await {
                Ok(result) => result,
                Err(e) => {
                    core.abandon_attempt().await;
                    Err(FlushError::Aborted(e.to_string()))
                }
            }
        }))
    }

    /// Put back a snapshot whose attempt task died before settling it
    async fn abandon_attempt(&self) {
        let mut state = self.state.lock().await;
        let events = state.in_flight.as_ref().map_or(0, Vec::len);
        state.restore_snapshot();
        self.in_flight.send_replace(false);
        error!(
            partition = %self.partition,
            events,
            "Flush attempt aborted, events restored to buffer"
        );
    }

    /// Whether nothing is buffered and no attempt is running
    ///
    /// Returns `false` when the state is momentarily locked.
    pub fn is_idle(&self) -> bool {
        self.state
            .try_lock()
            .is_ok_and(|state| state.events.is_empty() && state.in_flight.is_none())
    }

    /// Stop the timer and drop the pending deadline and durable alarm
    ///
    /// Used when an empty partition is evicted. Its record stays in the
    /// store and is rehydrated on next use.
    pub async fn retire(&self) {
        self.scheduler.stop();
        self.scheduler.cancel().await;
    }

    /// Send a snapshot and settle the outcome
    ///
    /// On success, events that arrived during the send and already meet a
    /// threshold are sent straight away as the next batch.
    #[instrument(skip(self, batch), fields(partition = %self.partition))]
    async fn run_attempt(
        &self,
        mut batch: Vec<Event>,
        mut trigger: FlushTrigger,
    ) -> FlushResult<FlushOutcome> {
        let mut delivered = 0;

        loop {
            let result = self.send_batch(&batch).await;
            let mut state = self.state.lock().await;

            if let Err(err) = result {
                state.restore_snapshot();
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                let failures = state.consecutive_failures;
                if let Err(e) = self.persist(&state).await {
                    warn!(error = %e, "Failed to re-persist restored buffer");
                }
                let transient = match &err {
                    FlushError::SinkSendFailed(e) => e.is_transient(),
                    _ => true,
                };
                error!(
                    error = %err,
                    %trigger,
                    events = batch.len(),
                    failures,
                    transient,
                    "Flush failed, events restored to buffer"
                );
                self.in_flight.send_replace(false);
                drop(state);

                if let Some(delay) = policy::backoff_delay(&self.config.retry, failures) {
                    let retry_at = self.clock.now_ms().saturating_add(delay.as_millis() as u64);
                    self.scheduler.pull_in(retry_at).await;
                }
                return Err(err);
            }

            let count = state.confirm_snapshot();
            delivered += count;
            state.last_flush_ms = Some(self.clock.now_ms());
            state.consecutive_failures = 0;
            if let Err(e) = self.persist(&state).await {
                // The delivered batch stays in the record and will be sent again
                warn!(error = %e, "Failed to persist buffer after flush");
            }
            info!(events = count, %trigger, "Flushed batch");

            if let Some(next) = policy::threshold_reached(state.events.len(), state.bytes, &self.config)
            {
                let count = state.events.len();
                batch = state.take_snapshot(count);
                trigger = next;
                continue;
            }

            self.in_flight.send_replace(false);
            return Ok(FlushOutcome::Delivered { events: delivered });
        }
    }

    async fn send_batch(&self, batch: &[Event]) -> FlushResult<()> {
        let Some(sink) = &self.sink else {
            return Err(FlushError::SinkUnavailable);
        };

        debug!(sink = sink.name(), events = batch.len(), "Sending batch");
        match tokio::time::timeout(self.config.sink_timeout, sink.send(&self.partition, batch)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(FlushError::SinkSendFailed(e)),
            Err(_) => Err(FlushError::SinkTimeout(self.config.sink_timeout)),
        }
    }

    async fn persist(&self, state: &BufferState) -> Result<(), StorageError> {
        let record = persistence::encode_record(state.pending(), state.last_flush_ms)?;
        self.store.put(&self.partition, BUFFER_KEY, record).await
    }
}

#[async_trait]
impl FlushTarget for BufferCore {
    async fn on_deadline(&self) {
        if let Err(e) = self.flush_triggered(FlushTrigger::Timer).await {
            debug!(partition = %self.partition, error = %e, "Timer flush did not deliver");
        }
    }
}

impl Drop for BufferCore {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}
