//! Partition identity
//!
//! A partition is the isolation unit of the buffering engine: each one has
//! its own buffer, durable record, and flush deadline. How inbound events map
//! to partitions is decided upstream; this type only guarantees the identity
//! is usable as a storage key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PartitionError;

/// Maximum length of a partition identity in bytes
pub const MAX_PARTITION_LEN: usize = 256;

/// Key used for the single shared partition
pub const GLOBAL_PARTITION: &str = "global";

/// Identity of a partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionId(String);

impl PartitionId {
    /// Create a partition id, validating it is a usable storage key
    pub fn new(id: impl Into<String>) -> Result<Self, PartitionError> {
        let id = id.into();
        if id.is_empty() {
            return Err(PartitionError::Empty);
        }
        if id.len() > MAX_PARTITION_LEN {
            return Err(PartitionError::TooLong {
                max: MAX_PARTITION_LEN,
                actual: id.len(),
            });
        }
        if id.chars().any(char::is_control) {
            return Err(PartitionError::ControlCharacter);
        }
        Ok(Self(id))
    }

    /// The fixed global partition
    pub fn global() -> Self {
        Self(GLOBAL_PARTITION.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PartitionId {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PartitionId {
    type Error = PartitionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PartitionId> for String {
    fn from(id: PartitionId) -> Self {
        id.0
    }
}
