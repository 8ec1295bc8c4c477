//! HTTP pipeline sink
//!
//! Delivers a batch as a single `POST` whose body is a JSON array of the
//! batch's events, in order. Any non-2xx response fails the whole batch.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use spillway_core::{Event, PartitionId, Sink, SinkError};
use tracing::{debug, instrument};

/// Header carrying the partition identity of a delivered batch
pub const PARTITION_HEADER: &str = "x-spillway-partition";

/// Longest response body kept in a rejection error
const MAX_ERROR_BODY: usize = 512;

/// Configuration for the HTTP pipeline sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSinkConfig {
    /// Ingestion endpoint URL
    pub endpoint: String,
    /// Optional bearer token
    pub token: Option<String>,
    /// TCP connect timeout
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Whole-request timeout
    #[serde(with = "millis")]
    pub request_timeout: Duration,
}

impl Default for PipelineSinkConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8788/ingest".to_string(),
            token: None,
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl PipelineSinkConfig {
    /// Create a config for an endpoint with default timeouts
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the whole-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Sink that POSTs batches to an HTTP ingestion pipeline
#[derive(Debug, Clone)]
pub struct PipelineSink {
    client: reqwest::Client,
    config: PipelineSinkConfig,
}

impl PipelineSink {
    /// Build the sink and its HTTP client
    pub fn new(config: PipelineSinkConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &PipelineSinkConfig {
        &self.config
    }

    fn classify(&self, err: reqwest::Error) -> SinkError {
        if err.is_timeout() {
            SinkError::Timeout(self.config.request_timeout)
        } else if err.is_connect() {
            SinkError::Unavailable(err.to_string())
        } else {
            SinkError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl Sink for PipelineSink {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    #[instrument(skip(self, partition, batch), fields(partition = %partition, events = batch.len()))]
    async fn send(&self, partition: &PartitionId, batch: &[Event]) -> Result<(), SinkError> {
        let body = serde_json::to_vec(batch).map_err(|e| SinkError::Encode(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(PARTITION_HEADER, partition.as_str())
            .body(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!(status = status.as_u16(), "Pipeline accepted batch");
        Ok(())
    }
}

/// Serde helper storing durations as integer milliseconds
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    type Received = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn spawn_pipeline(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let state = received.clone();
        let app = Router::new().route(
            "/ingest",
            post(move |headers: HeaderMap, body: String| {
                let state = state.clone();
                async move {
                    let partition = headers
                        .get(PARTITION_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    state
                        .lock()
                        .push((partition, serde_json::from_str(&body).unwrap()));
                    status
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/ingest"), received)
    }

    #[tokio::test]
    async fn test_pipeline_posts_ordered_json_array() {
        let (endpoint, received) = spawn_pipeline(StatusCode::OK).await;
        let sink = PipelineSink::new(PipelineSinkConfig::new(endpoint)).unwrap();
        let partition = PartitionId::new("user-1").unwrap();
        let batch = vec![
            Event::new(json!({"ev": "a"})),
            Event::new(json!({"ev": "b"})),
        ];

        sink.send(&partition, &batch).await.unwrap();

        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.as_deref(), Some("user-1"));
        assert_eq!(received[0].1, json!([{"ev": "a"}, {"ev": "b"}]));
    }

    #[tokio::test]
    async fn test_pipeline_rejection_is_error() {
        let (endpoint, _received) = spawn_pipeline(StatusCode::SERVICE_UNAVAILABLE).await;
        let sink = PipelineSink::new(PipelineSinkConfig::new(endpoint)).unwrap();
        let err = sink
            .send(&PartitionId::global(), &[Event::new(json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Rejected { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_pipeline_unreachable_is_error() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = PipelineSink::new(PipelineSinkConfig::new(format!("http://{addr}/ingest")))
            .unwrap();
        let result = sink
            .send(&PartitionId::global(), &[Event::new(json!({}))])
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_config_durations_as_millis() {
        let config: PipelineSinkConfig = serde_json::from_value(json!({
            "endpoint": "http://example.test/x",
            "request_timeout": 2500
        }))
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
    }
}
