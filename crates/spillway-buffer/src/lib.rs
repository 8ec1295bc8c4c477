//! # Spillway Buffer
//!
//! Per-partition event buffering engine.
//!
//! Events are batched per partition and handed to a [`Sink`](spillway_core::Sink)
//! when a count, size, or time threshold is met. Every acknowledged event is
//! in the [`DurableStore`](spillway_storage::DurableStore) until the sink
//! confirms the batch containing it, so neither a restart nor a failing sink
//! loses events. Delivery is at least once.
//!
//! ## Components
//!
//! - [`BufferCore`]: Ingest/flush state machine for one partition
//! - [`Scheduler`]: At most one pending flush deadline per partition, mirrored to the store alarm
//! - [`persistence`]: Durable record codec and rehydration
//! - [`policy`]: Count, size, and backoff rules
//! - [`PartitionSupervisor`]: Lazily created buffers keyed by partition
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spillway_buffer::{BufferConfig, Collaborators, PartitionSupervisor};
//! use spillway_core::{Event, PartitionId, SystemClock};
//! use spillway_sink::RecordingSink;
//! use spillway_storage::InMemoryDurableStore;
//!
//! let supervisor = PartitionSupervisor::new(
//!     BufferConfig::default().with_max_event_count(100),
//!     Collaborators {
//!         store: Arc::new(InMemoryDurableStore::new()),
//!         sink: Some(Arc::new(RecordingSink::new())),
//!         clock: Arc::new(SystemClock::new()),
//!     },
//! );
//!
//! supervisor.recover().await?;
//! supervisor
//!     .ingest(&PartitionId::global(), Event::from_json(r#"{"ev":"click","uid":"u1"}"#)?)
//!     .await?;
//! ```

pub mod config;
pub mod buffer;
pub mod error;
pub mod persistence;
pub mod policy;
pub mod scheduler;
pub mod supervisor;

// Re-exports
pub use config::{BufferConfig, ConfigWarning, RetryPolicy};
pub use buffer::{BufferCore, BufferStats, Collaborators, FlushOutcome};
pub use error::{FlushError, FlushResult, IngestError, IngestResult};
pub use policy::FlushTrigger;
pub use scheduler::{FlushTarget, Scheduler};
pub use supervisor::PartitionSupervisor;
