//! Opaque event payloads
//!
//! The buffering engine never interprets event contents. An [`Event`] is a
//! JSON value plus whatever position it occupies in a partition's buffer.

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EventError;

/// An opaque, serializable event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Value);

impl Event {
    /// Wrap an already parsed JSON value
    pub fn new(payload: Value) -> Self {
        Self(payload)
    }

    /// Parse an event from raw JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EventError> {
        Ok(Self(serde_json::from_slice(bytes)?))
    }

    /// Parse an event from a JSON string
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        Ok(Self(serde_json::from_str(json)?))
    }

    /// Borrow the payload
    pub fn payload(&self) -> &Value {
        &self.0
    }

    /// Consume the event, returning the payload
    pub fn into_payload(self) -> Value {
        self.0
    }

    /// Compact JSON encoding of the payload
    pub fn to_json(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Size in bytes of the compact JSON encoding, without allocating it
    pub fn encoded_len(&self) -> Result<usize, EventError> {
        let mut counter = ByteCounter(0);
        serde_json::to_writer(&mut counter, &self.0)?;
        Ok(counter.0)
    }
}

impl From<Value> for Event {
    fn from(payload: Value) -> Self {
        Self::new(payload)
    }
}

/// Writer that only counts bytes
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
