//! Flush deadline scheduling
//!
//! A [`Scheduler`] keeps at most one pending deadline for its partition. The
//! deadline lives in a `watch` channel watched by a timer task, and is
//! mirrored to the durable store's alarm so a restarted process can adopt it.
//!
//! The scheduler knows nothing about buffers. When a deadline elapses it calls
//! [`FlushTarget::on_deadline`] and re-arms.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use spillway_core::{Clock, PartitionId};
use spillway_storage::DurableStore;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Whatever a deadline wakes up
#[async_trait]
pub trait FlushTarget: Send + Sync {
    /// Run a timer-triggered flush to completion
    async fn on_deadline(&self);
}

/// Per-partition deadline bookkeeping and timer
pub struct Scheduler {
    partition: PartitionId,
    interval: Duration,
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    deadline: watch::Sender<Option<u64>>,
    /// Serializes alarm writes so the store ends up with the latest deadline
    alarm_sync: Mutex<()>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        partition: PartitionId,
        interval: Duration,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            partition,
            interval,
            store,
            clock,
            deadline: watch::Sender::new(None),
            alarm_sync: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Pending deadline in Unix epoch milliseconds
    pub fn deadline(&self) -> Option<u64> {
        *self.deadline.borrow()
    }

    /// Arm `now + interval` unless a deadline is already pending
    ///
    /// Returns whether a new deadline was armed.
    pub async fn ensure_scheduled(&self) -> bool {
        let at = self.clock.now_ms().saturating_add(self.interval_ms());
        let armed = self.deadline.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(at);
            true
        });
        if armed {
            trace!(partition = %self.partition, at_ms = at, "Deadline armed");
            self.sync_alarm().await;
        }
        armed
    }

    /// Move the pending deadline earlier, never later
    ///
    /// Returns whether the deadline changed.
    pub async fn pull_in(&self, at_ms: u64) -> bool {
        let moved = self.deadline.send_if_modified(|current| match current {
            Some(existing) if *existing <= at_ms => false,
            _ => {
                *current = Some(at_ms);
                true
            }
        });
        if moved {
            debug!(partition = %self.partition, at_ms, "Deadline moved earlier");
            self.sync_alarm().await;
        }
        moved
    }

    /// Take over an alarm persisted by a previous process
    ///
    /// A deadline already in the past fires as soon as the timer sees it.
    pub fn adopt(&self, at_ms: u64) {
        debug!(partition = %self.partition, at_ms, "Adopted persisted alarm");
        self.deadline.send_replace(Some(at_ms));
    }

    /// Drop the pending deadline and the durable alarm
    pub async fn cancel(&self) {
        self.deadline.send_replace(None);
        self.sync_alarm().await;
    }

    /// Deadline elapsed: flush, then re-arm whatever the flush outcome
    ///
    /// A retry deadline set by a failed flush is kept when it is earlier
    /// than the next interval.
    pub async fn on_fire(&self, target: &dyn FlushTarget) {
        self.deadline.send_replace(None);
        target.on_deadline().await;
        let next = self.clock.now_ms().saturating_add(self.interval_ms());
        self.pull_in(next).await;
    }

    /// Start the timer task
    ///
    /// The task holds only a weak reference to its target and exits when the
    /// target is dropped or [`stop`](Self::stop) is called.
    pub fn start(self: &Arc<Self>, target: Weak<dyn FlushTarget>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run(target).await })
    }

    /// Stop the timer task, leaving any durable alarm in place
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn run(&self, target: Weak<dyn FlushTarget>) {
        let mut deadline_rx = self.deadline.subscribe();

        loop {
            let current = *deadline_rx.borrow_and_update();

            let Some(at_ms) = current else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    changed = deadline_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            };

            let wait = Duration::from_millis(at_ms.saturating_sub(self.clock.now_ms()));
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                changed = deadline_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(wait) => {
                    let Some(target) = target.upgrade() else {
                        break;
                    };
                    trace!(partition = %self.partition, at_ms, "Deadline fired");
                    self.on_fire(target.as_ref()).await;
                }
            }
        }

        debug!(partition = %self.partition, "Scheduler timer stopped");
    }

    /// Write the current deadline to the durable alarm
    async fn sync_alarm(&self) {
        let _guard = self.alarm_sync.lock().await;
        let current = self.deadline();
        let result = match current {
            Some(at_ms) => self.store.set_alarm(&self.partition, at_ms).await,
            None => self.store.delete_alarm(&self.partition).await,
        };
        if let Err(e) = result {
            warn!(partition = %self.partition, error = %e, "Failed to persist alarm");
        }
    }

    fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }
}
