//! Persisted buffer record and rehydration
//!
//! One record per partition, under [`BUFFER_KEY`], holds every event not yet
//! confirmed by the sink (in-flight snapshot first, then the buffer) plus the
//! last successful flush time. The format is private to this crate.
//!
//! postcard is not self-describing, so events are stored as compact JSON
//! strings rather than as `serde_json::Value`.

use serde::{Deserialize, Serialize};
use spillway_core::{Event, PartitionId};
use spillway_storage::{DurableStore, StorageError};
use tracing::{debug, instrument, warn};

/// Key of the buffer record inside a partition's namespace
pub const BUFFER_KEY: &str = "buffer";

/// Current record layout
const RECORD_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct BufferRecord {
    version: u8,
    events: Vec<String>,
    last_flush_ms: Option<u64>,
}

/// Buffer state recovered from the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rehydrated {
    pub events: Vec<Event>,
    pub last_flush_ms: Option<u64>,
    /// Alarm left behind by a previous process
    pub alarm_ms: Option<u64>,
}

/// Errors decoding a stored record
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Undecodable record: {0}")]
    Decode(#[from] postcard::Error),

    #[error("Unsupported record version {0}")]
    Version(u8),

    #[error("Event {index} is not valid JSON: {source}")]
    Event {
        index: usize,
        source: spillway_core::EventError,
    },
}

/// Encode pending events into a record
pub fn encode_record<'a>(
    events: impl IntoIterator<Item = &'a Event>,
    last_flush_ms: Option<u64>,
) -> Result<Vec<u8>, StorageError> {
    let events = events
        .into_iter()
        .map(|event| event.to_json())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::serialization(e.to_string()))?;

    let record = BufferRecord {
        version: RECORD_VERSION,
        events,
        last_flush_ms,
    };
    postcard::to_allocvec(&record).map_err(|e| StorageError::serialization(e.to_string()))
}

/// Decode a record, rejecting anything not written by [`encode_record`]
pub fn decode_record(bytes: &[u8]) -> Result<(Vec<Event>, Option<u64>), RecordError> {
    let record: BufferRecord = postcard::from_bytes(bytes)?;
    if record.version != RECORD_VERSION {
        return Err(RecordError::Version(record.version));
    }

    let events = record
        .events
        .iter()
        .enumerate()
        .map(|(index, json)| {
            Event::from_json(json).map_err(|source| RecordError::Event { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((events, record.last_flush_ms))
}

/// Load a partition's persisted buffer and alarm
///
/// A missing record is an empty buffer. A malformed record also recovers to
/// empty: nobody outside this crate can repair it. Store failures propagate,
/// since treating an unreadable record as empty would let the next write
/// overwrite it.
#[instrument(skip(store), fields(partition = %partition))]
pub async fn load(
    store: &dyn DurableStore,
    partition: &PartitionId,
) -> Result<Rehydrated, StorageError> {
    let alarm_ms = store.get_alarm(partition).await?;

    let Some(bytes) = store.get(partition, BUFFER_KEY).await? else {
        debug!("No persisted buffer");
        return Ok(Rehydrated {
            alarm_ms,
            ..Default::default()
        });
    };

    match decode_record(&bytes) {
        Ok((events, last_flush_ms)) => {
            debug!(events = events.len(), "Rehydrated buffer");
            Ok(Rehydrated {
                events,
                last_flush_ms,
                alarm_ms,
            })
        }
        Err(e) => {
            warn!(error = %e, bytes = bytes.len(), "Malformed persisted buffer, starting empty");
            Ok(Rehydrated {
                alarm_ms,
                ..Default::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spillway_storage::InMemoryDurableStore;

    fn events() -> Vec<Event> {
        vec![
            Event::new(json!({"ev": "a", "uid": "u1"})),
            Event::new(json!({"ev": "b", "uid": "u1", "n": 2})),
            Event::new(json!("bare string")),
        ]
    }

    #[test]
    fn test_record_preserves_order_and_flush_time() {
        let bytes = encode_record(&events(), Some(42)).unwrap();
        let (decoded, last_flush) = decode_record(&bytes).unwrap();
        assert_eq!(decoded, events());
        assert_eq!(last_flush, Some(42));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let record = BufferRecord {
            version: 9,
            events: vec![],
            last_flush_ms: None,
        };
        let bytes = postcard::to_allocvec(&record).unwrap();
        assert!(matches!(decode_record(&bytes), Err(RecordError::Version(9))));
    }

    #[test]
    fn test_bad_event_json_rejected() {
        let record = BufferRecord {
            version: RECORD_VERSION,
            events: vec!["{}".to_string(), "{nope".to_string()],
            last_flush_ms: None,
        };
        let bytes = postcard::to_allocvec(&record).unwrap();
        assert!(matches!(
            decode_record(&bytes),
            Err(RecordError::Event { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_load_missing_is_empty() {
        let store = InMemoryDurableStore::new();
        let loaded = load(&store, &PartitionId::global()).await.unwrap();
        assert_eq!(loaded, Rehydrated::default());
    }

    #[tokio::test]
    async fn test_load_malformed_recovers_to_empty() {
        let store = InMemoryDurableStore::new();
        let partition = PartitionId::global();
        store
            .put(&partition, BUFFER_KEY, vec![0xff, 0x00, 0x13, 0x37])
            .await
            .unwrap();
        store.set_alarm(&partition, 1_000).await.unwrap();

        let loaded = load(&store, &partition).await.unwrap();
        assert!(loaded.events.is_empty());
        assert_eq!(loaded.alarm_ms, Some(1_000));
    }

    #[tokio::test]
    async fn test_load_round_trips_through_store() {
        let store = InMemoryDurableStore::new();
        let partition = PartitionId::new("user-7").unwrap();
        store
            .put(&partition, BUFFER_KEY, encode_record(&events(), None).unwrap())
            .await
            .unwrap();

        let loaded = load(&store, &partition).await.unwrap();
        assert_eq!(loaded.events, events());
        assert_eq!(loaded.alarm_ms, None);
    }
}
