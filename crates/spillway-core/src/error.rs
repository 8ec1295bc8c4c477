//! Error types shared across Spillway crates

use thiserror::Error;

/// Errors produced when handling event payloads
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors produced when constructing a partition identity
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Partition id must not be empty")]
    Empty,

    #[error("Partition id exceeds {max} bytes (got {actual})")]
    TooLong { max: usize, actual: usize },

    #[error("Partition id contains a control character")]
    ControlCharacter,
}

/// Errors reported by a [`Sink`](crate::Sink) implementation
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink is not configured or cannot currently be reached
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// The sink answered but refused the batch
    #[error("Sink rejected batch with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Network-level failure talking to the sink
    #[error("Transport error: {0}")]
    Transport(String),

    /// Local I/O failure (object-store style sinks)
    #[error("I/O error: {0}")]
    Io(String),

    /// The batch could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// The send did not complete in time
    #[error("Sink send timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err.to_string())
    }
}

impl SinkError {
    /// Whether retrying the same batch later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Rejected { status, .. } => *status >= 500 || *status == 429,
            SinkError::Encode(_) => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let sink_err: SinkError = io_err.into();
        assert!(matches!(sink_err, SinkError::Io(_)));
    }

    #[test]
    fn test_transient_classification() {
        let server = SinkError::Rejected {
            status: 503,
            message: "busy".into(),
        };
        let client = SinkError::Rejected {
            status: 400,
            message: "bad".into(),
        };
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(SinkError::Transport("reset".into()).is_transient());
        assert!(!SinkError::Encode("nan".into()).is_transient());
    }
}
