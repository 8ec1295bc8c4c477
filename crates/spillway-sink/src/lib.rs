//! # Spillway Sinks
//!
//! Downstream destinations for flushed batches.
//!
//! - [`PipelineSink`]: POSTs each batch as a JSON array to an HTTP ingestion pipeline
//! - [`ObjectStoreSink`]: Writes each batch as one newline-delimited JSON object
//! - [`RecordingSink`]: Keeps batches in memory, with fault injection for tests
//!
//! All sinks implement [`spillway_core::Sink`].

pub mod object_store;
pub mod pipeline;
pub mod recording;

pub use object_store::{ObjectStoreSink, ObjectStoreSinkConfig};
pub use pipeline::{PipelineSink, PipelineSinkConfig};
pub use recording::RecordingSink;

// Re-export the trait for convenience
pub use spillway_core::{Sink, SinkError};
