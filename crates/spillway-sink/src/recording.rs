//! In-memory recording sink
//!
//! Records every delivered batch. Sends can be failed on demand or held open
//! until released, which lets tests drive the flush protocol through its
//! failure and in-flight paths deterministically.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use spillway_core::{Event, PartitionId, Sink, SinkError};
use tokio::sync::watch;
use tracing::debug;

/// Sink that keeps delivered batches in memory
#[derive(Debug)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(PartitionId, Vec<Event>)>>,
    /// Number of upcoming sends that fail
    fail_next: AtomicUsize,
    /// Fail every send while set
    fail_always: AtomicBool,
    /// Sends wait while this is `true`
    gate: watch::Sender<bool>,
    /// Total send calls, successful or not
    attempts: watch::Sender<usize>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
            fail_always: AtomicBool::new(false),
            gate: watch::Sender::new(false),
            attempts: watch::Sender::new(0),
        }
    }

    /// Fail the next `count` sends
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fail every send until turned off
    pub fn set_fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    /// Hold every send open until [`release`](Self::release) is called
    pub fn hold(&self) {
        self.gate.send_replace(true);
    }

    /// Let held sends proceed
    pub fn release(&self) {
        self.gate.send_replace(false);
    }

    /// Number of send calls made so far
    pub fn attempts(&self) -> usize {
        *self.attempts.borrow()
    }

    /// Wait until at least `count` send calls have started
    pub async fn wait_for_attempts(&self, count: usize) {
        let mut rx = self.attempts.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }

    /// All successfully delivered batches, in delivery order
    pub fn batches(&self) -> Vec<(PartitionId, Vec<Event>)> {
        self.delivered.lock().clone()
    }

    /// Every delivered event, flattened in delivery order
    pub fn events(&self) -> Vec<Event> {
        self.delivered
            .lock()
            .iter()
            .flat_map(|(_, batch)| batch.iter().cloned())
            .collect()
    }

    fn should_fail(&self) -> bool {
        if self.fail_always.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, partition: &PartitionId, batch: &[Event]) -> Result<(), SinkError> {
        self.attempts.send_modify(|n| *n += 1);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|held| !*held).await;

        if self.should_fail() {
            debug!(partition = %partition, events = batch.len(), "Recording sink failing batch");
            return Err(SinkError::Transport("injected failure".to_string()));
        }

        self.delivered
            .lock()
            .push((partition.clone(), batch.to_vec()));
        Ok(())
    }
}
