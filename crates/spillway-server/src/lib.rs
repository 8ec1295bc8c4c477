//! # Spillway Server
//!
//! HTTP ingest front end for the Spillway buffering engine.
//!
//! Each `POST /events` body is validated, routed to a partition, and made
//! durable in that partition's buffer before `202 Buffered` is returned.
//! Batches leave for the configured sink on the count, size, and timer
//! triggers of [`spillway_buffer::BufferCore`].
//!
//! On startup every partition found in the durable store is reactivated, so
//! events accepted by a previous process are delivered. On shutdown the
//! listener stops accepting and each partition makes one last flush.

pub mod config;
pub mod http;
pub mod routing;

pub use config::{Cli, ConfigError, CorsConfig, ServerConfig, SinkConfig, StorageConfig};
pub use http::{AppState, build_router};
pub use routing::{PartitionBy, RoutingError};

use std::sync::Arc;

use spillway_buffer::{Collaborators, PartitionSupervisor};
use spillway_core::{SinkError, SystemClock};
use spillway_storage::StorageError;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors starting or running the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open the store, build the sink, and create the partition supervisor
pub fn build_supervisor(config: &ServerConfig) -> Result<Arc<PartitionSupervisor>, ServerError> {
    let store = config.storage.open()?;
    let sink = config.sink.build()?;
    if sink.is_none() {
        warn!("No sink configured, events will accumulate until one is");
    }

    let collaborators = Collaborators {
        store,
        sink,
        clock: Arc::new(SystemClock::new()),
    };
    Ok(Arc::new(PartitionSupervisor::new(
        config.buffer.clone(),
        collaborators,
    )))
}

/// Serve on `listener` until `shutdown` is cancelled, then drain every partition
pub async fn run(
    config: ServerConfig,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let supervisor = build_supervisor(&config)?;
    supervisor.recover().await?;
    let sweeper = supervisor.spawn_idle_sweeper(shutdown.child_token());

    let app_state = AppState::new(Arc::clone(&supervisor), config.routing.partition_by.clone());
    let router = build_router(app_state, &config.cors);

    info!(
        addr = %listener.local_addr()?,
        partition_by = %config.routing.partition_by,
        "Listening"
    );
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    // The sweeper stops with the listener; let an eviction in progress finish
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    info!(partitions = supervisor.len(), "Draining partitions");
    let failed = supervisor.shutdown().await;
    if failed > 0 {
        warn!(failed, "Shut down with undelivered events still persisted");
    } else {
        info!("Shutdown complete");
    }
    Ok(())
}
