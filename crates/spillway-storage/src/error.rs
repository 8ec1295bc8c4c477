//! Storage errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    /// redb refused an operation; `stage` names which one
    #[error("Database {stage} error: {message}")]
    Database { stage: &'static str, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored record could not be decoded
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Stored key did not decode to a partition identity
    #[error("Invalid partition key: {0}")]
    InvalidPartition(String),

    /// The store refused the write (closed, read-only, or injected fault)
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

macro_rules! from_redb {
    ($($error:ident => $stage:literal),* $(,)?) => {
        $(
            impl From<redb::$error> for StorageError {
                fn from(err: redb::$error) -> Self {
                    StorageError::Database {
                        stage: $stage,
                        message: err.to_string(),
                    }
                }
            }
        )*
    };
}

from_redb! {
    Error => "operation",
    DatabaseError => "open",
    TransactionError => "transaction",
    TableError => "table",
    StorageError => "storage",
    CommitError => "commit",
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: StorageError = io_err.into();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[test]
    fn test_redb_error_names_stage() {
        let err: StorageError = redb::StorageError::Corrupted("bad page".to_string()).into();
        assert!(matches!(err, StorageError::Database { stage: "storage", .. }));
        assert!(err.to_string().starts_with("Database storage error"));
    }

    #[test]
    fn test_unavailable_error() {
        let err = StorageError::unavailable("disk full");
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert!(err.to_string().contains("disk full"));
    }
}
