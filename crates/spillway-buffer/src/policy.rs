//! Flush trigger policy
//!
//! Pure helpers deciding when a buffer should flush and how long to wait
//! after a failure. `BufferCore` applies them under its state lock.

use std::fmt;
use std::time::Duration;

use crate::config::{BufferConfig, RetryPolicy};

/// Largest exponent used for backoff doubling
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Why a flush attempt started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Buffered count reached `max_event_count`
    Count,
    /// The next event would have pushed the size past `max_buffer_bytes`
    Size,
    /// Scheduler deadline elapsed
    Timer,
    /// Explicit call to `flush`
    Manual,
    /// Final flush while shutting down
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Count => "count",
            FlushTrigger::Size => "size",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Manual => "manual",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Count trigger. A zero limit disables it.
pub fn count_reached(count: usize, max_event_count: usize) -> bool {
    max_event_count > 0 && count >= max_event_count
}

/// Whether appending `incoming` bytes would push the buffer past the ceiling
pub fn exceeds_bytes(current: usize, incoming: usize, max_buffer_bytes: usize) -> bool {
    max_buffer_bytes > 0 && current.saturating_add(incoming) > max_buffer_bytes
}

/// Threshold check on a buffer that is already populated
///
/// Used after a successful attempt: events ingested while it was in flight
/// may already meet a threshold that could not fire at the time.
pub fn threshold_reached(count: usize, bytes: usize, config: &BufferConfig) -> Option<FlushTrigger> {
    if count == 0 {
        return None;
    }
    if count_reached(count, config.max_event_count) {
        Some(FlushTrigger::Count)
    } else if config.max_buffer_bytes > 0 && bytes >= config.max_buffer_bytes {
        Some(FlushTrigger::Size)
    } else {
        None
    }
}

/// Delay before retrying after `failures` consecutive failed attempts
///
/// `None` under the passive policy or before any failure.
pub fn backoff_delay(policy: &RetryPolicy, failures: u32) -> Option<Duration> {
    match policy {
        RetryPolicy::Passive => None,
        RetryPolicy::Backoff { base, max } => {
            if failures == 0 {
                return None;
            }
            let exponent = (failures - 1).min(MAX_BACKOFF_EXPONENT);
            let delay = base.saturating_mul(2u32.pow(exponent));
            Some(delay.min(*max))
        }
    }
}
