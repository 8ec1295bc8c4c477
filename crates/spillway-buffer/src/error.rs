//! Error types for spillway-buffer

use std::time::Duration;

use spillway_core::SinkError;
use spillway_storage::StorageError;
use thiserror::Error;

/// Reasons an ingest is refused
///
/// A refused event is neither buffered nor persisted.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The event is not a serializable value
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The durable write did not complete, so the event was not acknowledged
    #[error("Persistence failed: {0}")]
    PersistenceFailed(#[from] StorageError),

    /// The partition already holds its maximum number of pending events
    #[error("Buffer full: {limit} events pending")]
    BufferFull { limit: usize },
}

/// Reasons a flush attempt did not deliver
///
/// None of these lose data: the events stay buffered and durable.
#[derive(Debug, Error)]
pub enum FlushError {
    /// No sink is configured
    #[error("Sink unavailable")]
    SinkUnavailable,

    /// The sink reported a failure
    #[error("Sink send failed: {0}")]
    SinkSendFailed(#[source] SinkError),

    /// The sink did not answer within the configured timeout
    #[error("Sink send timed out after {0:?}")]
    SinkTimeout(Duration),

    /// The persisted buffer could not be read
    #[error("Rehydration failed: {0}")]
    Rehydration(#[source] StorageError),

    /// The attempt task ended without settling; its snapshot was put back
    #[error("Flush attempt aborted: {0}")]
    Aborted(String),
}

/// Result alias for ingest
pub type IngestResult<T> = Result<T, IngestError>;

/// Result alias for flush
pub type FlushResult<T> = Result<T, FlushError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_becomes_persistence_failed() {
        let err: IngestError = StorageError::unavailable("disk gone").into();
        assert!(matches!(err, IngestError::PersistenceFailed(_)));
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            IngestError::BufferFull { limit: 10 }.to_string(),
            "Buffer full: 10 events pending"
        );
        assert_eq!(FlushError::SinkUnavailable.to_string(), "Sink unavailable");
    }
}
