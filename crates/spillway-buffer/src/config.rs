//! Buffer configuration
//!
//! Durations are (de)serialized as integer milliseconds so a config file can
//! say `flush_interval_ms = 30000`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default count trigger
pub const DEFAULT_MAX_EVENT_COUNT: usize = 500;
/// Default size trigger (1 MiB of compact JSON)
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1024 * 1024;
/// Default time trigger
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
/// Default bound on a single sink send
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(10);
/// Default ceiling on events held per partition, in flight included
pub const DEFAULT_MAX_PENDING_EVENTS: usize = 50_000;
/// Default cadence of the sweep that evicts empty, unused partitions
pub const DEFAULT_IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// What happens after a failed flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Retry only at the next deadline or threshold crossing
    Passive,
    /// Pull the next deadline in to `base * 2^(failures - 1)`, capped at `max`
    Backoff {
        #[serde(rename = "base_ms", with = "millis")]
        base: Duration,
        #[serde(rename = "max_ms", with = "millis")]
        max: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Backoff {
            base: Duration::from_secs(1),
            max: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Per-partition buffering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Flush as soon as this many events are buffered
    pub max_event_count: usize,
    /// Flush existing contents before an event would push the size past this
    pub max_buffer_bytes: usize,
    /// Time-based flush cadence
    #[serde(rename = "flush_interval_ms", with = "millis")]
    pub flush_interval: Duration,
    /// Upper bound on one `Sink::send`
    #[serde(rename = "sink_timeout_ms", with = "millis")]
    pub sink_timeout: Duration,
    /// Ingests are refused once this many events are pending
    pub max_pending_events: usize,
    /// Retry behavior after a failed flush
    pub retry: RetryPolicy,
    /// How often empty, unused partitions are evicted; zero keeps them forever
    #[serde(rename = "idle_sweep_interval_ms", with = "millis")]
    pub idle_sweep_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_event_count: DEFAULT_MAX_EVENT_COUNT,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            sink_timeout: DEFAULT_SINK_TIMEOUT,
            max_pending_events: DEFAULT_MAX_PENDING_EVENTS,
            retry: RetryPolicy::default(),
            idle_sweep_interval: DEFAULT_IDLE_SWEEP_INTERVAL,
        }
    }
}

impl BufferConfig {
    /// Small batches delivered quickly
    pub fn low_latency() -> Self {
        Self {
            max_event_count: 50,
            max_buffer_bytes: 256 * 1024,
            flush_interval: Duration::from_secs(2),
            sink_timeout: Duration::from_secs(2),
            max_pending_events: 10_000,
            retry: RetryPolicy::Backoff {
                base: Duration::from_millis(250),
                max: Duration::from_secs(2),
            },
            idle_sweep_interval: Duration::from_secs(60),
        }
    }

    /// Large batches, fewer sink round trips
    pub fn high_throughput() -> Self {
        Self {
            max_event_count: 5_000,
            max_buffer_bytes: 8 * 1024 * 1024,
            flush_interval: Duration::from_secs(60),
            sink_timeout: Duration::from_secs(30),
            max_pending_events: 500_000,
            retry: RetryPolicy::Backoff {
                base: Duration::from_secs(2),
                max: Duration::from_secs(60),
            },
            idle_sweep_interval: DEFAULT_IDLE_SWEEP_INTERVAL,
        }
    }

    /// Retry only on the next timer or threshold, never earlier
    pub fn passive() -> Self {
        Self {
            retry: RetryPolicy::Passive,
            ..Self::default()
        }
    }

    pub fn with_max_event_count(mut self, count: usize) -> Self {
        self.max_event_count = count;
        self
    }

    pub fn with_max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    pub fn with_max_pending_events(mut self, limit: usize) -> Self {
        self.max_pending_events = limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_idle_sweep_interval(mut self, interval: Duration) -> Self {
        self.idle_sweep_interval = interval;
        self
    }

    /// Check the configuration for settings that will misbehave
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.max_event_count == 0 {
            warnings.push(ConfigWarning::ZeroEventCount);
        }

        if self.max_buffer_bytes == 0 {
            warnings.push(ConfigWarning::ZeroBufferBytes);
        }

        if self.flush_interval.is_zero() {
            warnings.push(ConfigWarning::ZeroFlushInterval);
        }

        // A send that may outlive the interval delays every timer flush behind it
        if self.sink_timeout > self.flush_interval {
            warnings.push(ConfigWarning::SinkTimeoutExceedsInterval);
        }

        if self.max_pending_events < self.max_event_count {
            warnings.push(ConfigWarning::PendingLimitBelowEventCount);
        }

        if let RetryPolicy::Backoff { base, max } = self.retry
            && (base.is_zero() || base > max)
        {
            warnings.push(ConfigWarning::InvalidBackoff);
        }

        // One buffer and timer task per distinct partition id, never released
        if self.idle_sweep_interval.is_zero() {
            warnings.push(ConfigWarning::IdleSweepDisabled);
        }

        warnings
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Configuration warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Count trigger disabled
    ZeroEventCount,
    /// Size trigger disabled
    ZeroBufferBytes,
    /// Timer would fire continuously
    ZeroFlushInterval,
    /// Sink timeout longer than the flush interval
    SinkTimeoutExceedsInterval,
    /// Pending ceiling refuses ingests before the count trigger can fire
    PendingLimitBelowEventCount,
    /// Backoff base is zero or larger than its cap
    InvalidBackoff,
    /// Partitions are never evicted, so memory grows with distinct partition ids
    IdleSweepDisabled,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::ZeroEventCount => write!(f, "max_event_count is 0, count trigger disabled"),
            ConfigWarning::ZeroBufferBytes => {
                write!(f, "max_buffer_bytes is 0, size trigger disabled")
            }
            ConfigWarning::ZeroFlushInterval => {
                write!(f, "flush_interval is 0, timer fires continuously")
            }
            ConfigWarning::SinkTimeoutExceedsInterval => {
                write!(f, "sink_timeout exceeds flush_interval")
            }
            ConfigWarning::PendingLimitBelowEventCount => {
                write!(f, "max_pending_events is below max_event_count")
            }
            ConfigWarning::InvalidBackoff => {
                write!(f, "retry backoff base is zero or exceeds its max")
            }
            ConfigWarning::IdleSweepDisabled => {
                write!(f, "idle_sweep_interval is 0, idle partitions are never evicted")
            }
        }
    }
}

/// Serde adapter for `Duration` as integer milliseconds
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
