//! Payload validation and partition routing
//!
//! Inbound events must be JSON objects carrying a non-empty `ev` (event name)
//! and `uid` (user id). Everything else in the payload is opaque.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use spillway_core::{GLOBAL_PARTITION, PartitionError, PartitionId};
use thiserror::Error;

/// Fields every inbound event must carry
pub const REQUIRED_FIELDS: [&str; 2] = ["ev", "uid"];

/// Why an inbound payload was refused
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Payload is not a JSON object")]
    NotObject,

    #[error("Missing or empty field: {0}")]
    MissingField(String),

    #[error("Partition field {0} is not a string or number")]
    UnroutableField(String),

    #[error("Invalid partition: {0}")]
    Partition(#[from] PartitionError),
}

/// How events are mapped to partitions
///
/// Written in config as a single string: `"global"` for one shared partition,
/// anything else names a top-level payload field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PartitionBy {
    #[default]
    Global,
    Field(String),
}

impl PartitionBy {
    /// Partition for a payload that already passed [`validate_payload`]
    pub fn route(&self, payload: &Value) -> Result<PartitionId, RoutingError> {
        match self {
            PartitionBy::Global => Ok(PartitionId::global()),
            PartitionBy::Field(field) => {
                let key = match payload.get(field) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    Some(Value::Null) | None => {
                        return Err(RoutingError::MissingField(field.clone()));
                    }
                    Some(_) => return Err(RoutingError::UnroutableField(field.clone())),
                };
                Ok(PartitionId::new(key)?)
            }
        }
    }
}

impl From<String> for PartitionBy {
    fn from(value: String) -> Self {
        if value == GLOBAL_PARTITION {
            PartitionBy::Global
        } else {
            PartitionBy::Field(value)
        }
    }
}

impl From<PartitionBy> for String {
    fn from(value: PartitionBy) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PartitionBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionBy::Global => f.write_str(GLOBAL_PARTITION),
            PartitionBy::Field(field) => f.write_str(field),
        }
    }
}

/// Check the structural contract of an inbound event
pub fn validate_payload(payload: &Value) -> Result<(), RoutingError> {
    let object = payload.as_object().ok_or(RoutingError::NotObject)?;
    for field in REQUIRED_FIELDS {
        if !object.get(field).is_some_and(is_present) {
            return Err(RoutingError::MissingField(field.to_string()));
        }
    }
    Ok(())
}

// Null, false, zero and the empty string all count as absent
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
