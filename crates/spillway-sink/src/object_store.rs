//! Object-store sink
//!
//! Each batch becomes one newline-delimited JSON object under a root
//! directory, laid out like a bucket:
//! `<root>/<partition>/<YYYY>/<MM>/<DD>/<unix_ms>-<uuid>.jsonl`.
//!
//! Objects are written to a hidden temporary file and renamed into place, so
//! a reader never observes a partial batch.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use spillway_core::{Event, PartitionId, Sink, SinkError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Configuration for the object-store sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreSinkConfig {
    /// Root directory standing in for the bucket
    pub root: PathBuf,
}

impl Default for ObjectStoreSinkConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/objects"),
        }
    }
}

/// Sink writing one JSONL object per batch
#[derive(Debug, Clone)]
pub struct ObjectStoreSink {
    config: ObjectStoreSinkConfig,
}

impl ObjectStoreSink {
    pub fn new(config: ObjectStoreSinkConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Relative object key for a batch written at `at`
    pub fn object_key(partition: &PartitionId, at: DateTime<Utc>, id: Uuid) -> PathBuf {
        let mut key = PathBuf::from(encode_segment(partition.as_str()));
        key.push(format!("{:04}", at.year()));
        key.push(format!("{:02}", at.month()));
        key.push(format!("{:02}", at.day()));
        key.push(format!("{}-{}.jsonl", at.timestamp_millis(), id));
        key
    }
}

/// Make a partition id safe to use as a single path segment
///
/// Bytes outside `[A-Za-z0-9._-]` are percent-encoded, and the dot-only
/// names `.` and `..` are encoded entirely.
fn encode_segment(raw: &str) -> String {
    let dots_only = raw.chars().all(|c| c == '.');
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        let plain = byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.');
        if plain && !(dots_only && byte == b'.') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn encode_batch(batch: &[Event]) -> Result<Vec<u8>, SinkError> {
    let mut body = Vec::new();
    for event in batch {
        serde_json::to_writer(&mut body, event).map_err(|e| SinkError::Encode(e.to_string()))?;
        body.push(b'\n');
    }
    Ok(body)
}

#[async_trait]
impl Sink for ObjectStoreSink {
    fn name(&self) -> &'static str {
        "object-store"
    }

    #[instrument(skip(self, partition, batch), fields(partition = %partition, events = batch.len()))]
    async fn send(&self, partition: &PartitionId, batch: &[Event]) -> Result<(), SinkError> {
        let body = encode_batch(batch)?;
        let id = Uuid::new_v4();
        let path = self
            .config
            .root
            .join(Self::object_key(partition, Utc::now(), id));
        let dir = path
            .parent()
            .ok_or_else(|| SinkError::Io("object key has no parent".to_string()))?;
        tokio::fs::create_dir_all(dir).await?;

        let temp_path = dir.join(format!(".{id}.tmp"));
        {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(path = %path.display(), bytes = body.len(), "Wrote batch object");
        Ok(())
    }
}
