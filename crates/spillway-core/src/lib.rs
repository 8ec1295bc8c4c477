//! # Spillway Core
//!
//! Core types, traits, and errors shared by every Spillway crate.
//!
//! Spillway buffers opaque events per partition and hands them to a
//! downstream sink in batches. This crate holds the vocabulary the buffering
//! engine, the storage backends, and the sinks agree on.
//!
//! ## Key Types
//!
//! - [`Event`]: An opaque JSON payload. Arrival order is implicit.
//! - [`PartitionId`]: The isolation unit owning its own buffer and flush cadence
//!
//! ## Key Traits
//!
//! - [`Sink`]: Downstream destination that accepts an ordered batch
//! - [`Clock`]: Wall-clock abstraction so alarm deadlines follow tokio's clock in tests

pub mod error;
pub mod event;
pub mod partition;
pub mod traits;

// Re-export main types
pub use error::*;
pub use event::*;
pub use partition::*;
pub use traits::*;
