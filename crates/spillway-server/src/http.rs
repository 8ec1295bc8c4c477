//! HTTP surface of the ingest server
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /events` | Validate, route, and buffer one event |
//! | `GET /healthz` | Liveness |
//! | `GET /partitions` | Buffer stats per active partition |
//! | `POST /partitions/{id}/flush` | Flush one partition now |

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use spillway_buffer::{
    BufferStats, FlushError, FlushOutcome, IngestError, PartitionSupervisor,
};
use spillway_core::{Event, EventError, PartitionError, PartitionId};
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, error, warn};

use crate::config::CorsConfig;
use crate::routing::{PartitionBy, RoutingError, validate_payload};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    supervisor: Arc<PartitionSupervisor>,
    partition_by: PartitionBy,
}

impl AppState {
    pub fn new(supervisor: Arc<PartitionSupervisor>, partition_by: PartitionBy) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                supervisor,
                partition_by,
            }),
        }
    }

    pub fn supervisor(&self) -> &Arc<PartitionSupervisor> {
        &self.inner.supervisor
    }

    pub fn partition_by(&self) -> &PartitionBy {
        &self.inner.partition_by
    }
}

/// Errors surfaced to HTTP clients
///
/// Internal failures are logged here and answered with a fixed message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] EventError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Invalid partition: {0}")]
    InvalidPartition(#[from] PartitionError),

    #[error("Unknown partition: {0}")]
    UnknownPartition(PartitionId),

    #[error(transparent)]
    Flush(#[from] FlushError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::InvalidJson(_)
            | ApiError::Routing(_)
            | ApiError::Ingest(IngestError::InvalidPayload(_)) => {
                debug!(error = %self, "Rejected event");
                (StatusCode::BAD_REQUEST, "Invalid payload".to_string())
            }
            ApiError::Ingest(IngestError::BufferFull { .. }) => {
                warn!(error = %self, "Rejected event");
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ApiError::Ingest(IngestError::PersistenceFailed(_)) => {
                error!(error = %self, "Failed to buffer event");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error buffering event".to_string(),
                )
            }
            ApiError::InvalidPartition(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::UnknownPartition(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Flush(FlushError::SinkUnavailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ApiError::Flush(FlushError::SinkSendFailed(_) | FlushError::SinkTimeout(_)) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            ApiError::Flush(FlushError::Rehydration(_) | FlushError::Aborted(_)) => {
                error!(error = %self, "Failed to flush partition");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error flushing partition".to_string(),
                )
            }
        };

        (status, message).into_response()
    }
}

/// Stats for one partition, as listed by `GET /partitions`
#[derive(Debug, Serialize)]
pub struct PartitionStatus {
    pub partition: PartitionId,
    #[serde(flatten)]
    pub stats: BufferStats,
}

/// Result of `POST /partitions/{id}/flush`
#[derive(Debug, Serialize)]
pub struct FlushReport {
    pub partition: PartitionId,
    pub delivered: usize,
}

/// Accept one event
///
/// Answers `202 Buffered` once the event is durable in its partition.
pub async fn events_handler(
    State(app_state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), ApiError> {
    let event = Event::from_slice(&body)?;
    validate_payload(event.payload())?;
    let partition = app_state.partition_by().route(event.payload())?;

    app_state.supervisor().ingest(&partition, event).await?;
    Ok((StatusCode::ACCEPTED, "Buffered"))
}

async fn method_not_allowed() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, "Only POST supported")
}

pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

pub async fn partitions_handler(State(app_state): State<AppState>) -> Json<Vec<PartitionStatus>> {
    let statuses = app_state
        .supervisor()
        .stats()
        .await
        .into_iter()
        .map(|(partition, stats)| PartitionStatus { partition, stats })
        .collect();
    Json(statuses)
}

pub async fn flush_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlushReport>, ApiError> {
    let partition = PartitionId::new(id)?;
    let core = app_state
        .supervisor()
        .get(&partition)
        .ok_or_else(|| ApiError::UnknownPartition(partition.clone()))?;

    let delivered = match core.flush().await? {
        FlushOutcome::Empty => 0,
        FlushOutcome::Delivered { events } => events,
    };
    Ok(Json(FlushReport {
        partition,
        delivered,
    }))
}

/// CORS policy for browser clients
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins = if config.allows_any() {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(%origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Build the axum router
pub fn build_router(app_state: AppState, cors: &CorsConfig) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/events", post(events_handler).fallback(method_not_allowed))
        .route("/healthz", get(health_handler))
        .route("/partitions", get(partitions_handler))
        .route("/partitions/{id}/flush", post(flush_handler))
        .layer(cors_layer(cors))
        .with_state(app_state)
}
