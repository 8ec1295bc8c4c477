//! Server configuration
//!
//! Loaded from a TOML file, then overridden by command-line flags.
//!
//! ```toml
//! listen = "0.0.0.0:8787"
//!
//! [buffer]
//! max_event_count = 500
//! flush_interval_ms = 30000
//!
//! [storage]
//! backend = "redb"
//! data_dir = "/var/lib/spillway"
//!
//! [sink]
//! kind = "pipeline"
//! endpoint = "https://pipeline.example.com/ingest"
//!
//! [routing]
//! partition_by = "uid"
//!
//! [cors]
//! allowed_origins = ["https://app.example.com"]
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::{Deserialize, Serialize};
use spillway_buffer::BufferConfig;
use spillway_core::{Sink, SinkError};
use spillway_logging::{ConsoleFormat, LogConfig};
use spillway_sink::{
    ObjectStoreSink, ObjectStoreSinkConfig, PipelineSink, PipelineSinkConfig, RecordingSink,
};
use spillway_storage::{
    DurableStore, InMemoryDurableStore, RedbDurableStore, RedbStoreConfig, StorageError,
};
use thiserror::Error;

use crate::routing::PartitionBy;

/// Default listen address
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8787";

/// Errors loading the server configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Command-line interface of the `spillway` binary
#[derive(Debug, Parser)]
#[command(name = "spillway", about = "Durable per-partition event buffering server")]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Store buffers in a redb database under this directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Human-readable console logs instead of JSONL
    #[arg(long)]
    pub pretty: bool,
}

/// Complete server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub buffer: BufferConfig,
    pub storage: StorageConfig,
    pub sink: SinkConfig,
    pub routing: RoutingConfig,
    pub cors: CorsConfig,
    pub logging: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8787)),
            buffer: BufferConfig::default(),
            storage: StorageConfig::default(),
            sink: SinkConfig::default(),
            routing: RoutingConfig::default(),
            cors: CorsConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a config from TOML text
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build the effective config: file (or defaults) with CLI overrides applied
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        Ok(config)
    }

    /// Apply command-line overrides
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(listen) = cli.listen {
            self.listen = listen;
        }
        if let Some(data_dir) = &cli.data_dir {
            self.storage = StorageConfig::Redb {
                data_dir: data_dir.clone(),
            };
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
        if cli.pretty {
            self.logging.console = ConsoleFormat::Pretty;
            self.logging.ansi = true;
        }
    }
}

/// Where partition buffers are persisted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Process memory; buffers do not survive a restart
    #[default]
    Memory,
    /// A redb database under `data_dir`
    Redb { data_dir: PathBuf },
}

impl StorageConfig {
    /// Open the configured store
    pub fn open(&self) -> Result<Arc<dyn DurableStore>, StorageError> {
        match self {
            StorageConfig::Memory => Ok(Arc::new(InMemoryDurableStore::new())),
            StorageConfig::Redb { data_dir } => {
                std::fs::create_dir_all(data_dir)?;
                let store = RedbDurableStore::open(RedbStoreConfig::in_dir(data_dir))?;
                Ok(Arc::new(store))
            }
        }
    }
}

/// Downstream destination for flushed batches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// No sink; events accumulate until one is configured
    #[default]
    None,
    Pipeline(PipelineSinkConfig),
    ObjectStore(ObjectStoreSinkConfig),
    /// Keep batches in process memory instead of delivering them
    DryRun,
}

impl SinkConfig {
    /// Build the configured sink
    pub fn build(&self) -> Result<Option<Arc<dyn Sink>>, SinkError> {
        let sink: Arc<dyn Sink> = match self {
            SinkConfig::None => return Ok(None),
            SinkConfig::Pipeline(config) => Arc::new(PipelineSink::new(config.clone())?),
            SinkConfig::ObjectStore(config) => Arc::new(ObjectStoreSink::new(config.clone())),
            SinkConfig::DryRun => Arc::new(RecordingSink::new()),
        };
        Ok(Some(sink))
    }
}

/// Partition routing settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub partition_by: PartitionBy,
}

/// Cross-origin settings for browser clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; `["*"]` allows any origin
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl CorsConfig {
    pub fn allows_any(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }
}
