//! Core traits for Spillway
//!
//! - [`Sink`]: Downstream destination for flushed batches
//! - [`Clock`]: Wall-clock time for alarm deadlines

use std::fmt::Debug;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::SinkError;
use crate::event::Event;
use crate::partition::PartitionId;

/// Downstream destination that accepts an ordered batch of events
///
/// A sink reports success only once it has durably accepted the whole batch.
/// Sinks are not assumed to be idempotent: a batch whose confirmation was
/// lost is sent again, so duplicates must be tolerated downstream.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs (e.g. "pipeline", "object-store")
    fn name(&self) -> &'static str;

    /// Deliver a batch, preserving its order
    async fn send(&self, partition: &PartitionId, batch: &[Event]) -> Result<(), SinkError>;
}

/// Wall-clock abstraction
///
/// Alarm deadlines are Unix epoch milliseconds, so the buffering engine needs
/// wall-clock time rather than a monotonic instant.
pub trait Clock: Send + Sync + Debug {
    /// Current time in Unix epoch milliseconds
    fn now_ms(&self) -> u64;
}

/// Clock anchored to the system time at construction, advanced by tokio's clock
///
/// Reading elapsed time from `tokio::time::Instant` means paused-time tests
/// see alarm timestamps move together with `tokio::time::sleep`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin_ms: u64,
    origin: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            origin_ms,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin_ms + self.origin.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// The Sink trait must stay object safe
    fn _assert_object_safe(_: &dyn Sink) {}

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_follows_tokio_time() {
        let clock = SystemClock::new();
        let before = clock.now_ms();
        tokio::time::sleep(Duration::from_secs(30)).await;
        let after = clock.now_ms();
        assert!(after - before >= 30_000);
    }
}
