//! JSONL logging for Spillway
//!
//! Console output is JSONL by default, one object per line, ready for a log
//! aggregator. Pretty output is for terminals. Files always get JSONL and
//! roll daily or hourly through tracing-appender.
//!
//! ```ignore
//! use spillway_logging::{InstanceContext, InstanceContextGuard, LogConfig, SpillwaySubscriberBuilder};
//!
//! let _guard = SpillwaySubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//!
//! let context = InstanceContext::new("spillway");
//! let _context = InstanceContextGuard::new(context.clone());
//! let _span = context.span().entered();
//!
//! // Carries service and instance fields
//! tracing::info!("Listening");
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleFormat, FileConfig, JsonOptions, LogConfig, LogRotation};
pub use context::{InstanceContext, InstanceContextGuard};
pub use layers::InstanceContextLayer;

use std::fs::{self, File};

use thiserror::Error;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to create rolling log file: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs the global tracing subscriber
pub struct SpillwaySubscriberBuilder {
    config: LogConfig,
    instance: Option<InstanceContext>,
}

impl SpillwaySubscriberBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
            instance: None,
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn with_console(mut self, format: ConsoleFormat) -> Self {
        self.config.console = format;
        self
    }

    /// Switch the console to colored pretty output, or back to JSONL
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.config.console = if pretty {
            ConsoleFormat::Pretty
        } else {
            ConsoleFormat::Json
        };
        self.config.ansi = pretty;
        self
    }

    pub fn with_file_output(mut self, file: FileConfig) -> Self {
        self.config.file = Some(file);
        self
    }

    /// Pin the instance context on every span instead of reading the guard's
    pub fn with_instance(mut self, context: InstanceContext) -> Self {
        self.instance = Some(context);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber, reporting setup errors on stderr
    ///
    /// Keep the returned guard alive until exit or buffered file lines are lost.
    pub fn init(self) -> Option<WorkerGuard> {
        self.try_init().unwrap_or_else(|e| {
            eprintln!("Warning: logging disabled: {e}");
            None
        })
    }

    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.config.filter_directives()))?;
        let context_layer = self
            .instance
            .clone()
            .map_or_else(InstanceContextLayer::new, InstanceContextLayer::with_context);
        let registry = Registry::default().with(filter).with(context_layer);

        let json = self.config.json;
        let ansi = self.config.ansi;

        // One arm per combination so every layer stack has a concrete type
        match (self.config.console, self.config.file.as_ref()) {
            (ConsoleFormat::Json, None) => {
                registry.with(json_layer(json, std::io::stdout)).try_init()?;
                Ok(None)
            }
            (ConsoleFormat::Json, Some(file)) => {
                let (writer, guard) = file_writer(file)?;
                registry
                    .with(json_layer(json, std::io::stdout))
                    .with(json_layer(json, writer))
                    .try_init()?;
                Ok(Some(guard))
            }
            (ConsoleFormat::Pretty, None) => {
                registry
                    .with(tracing_subscriber::fmt::layer().with_ansi(ansi))
                    .try_init()?;
                Ok(None)
            }
            (ConsoleFormat::Pretty, Some(file)) => {
                let (writer, guard) = file_writer(file)?;
                registry
                    .with(tracing_subscriber::fmt::layer().with_ansi(ansi))
                    .with(json_layer(json, writer))
                    .try_init()?;
                Ok(Some(guard))
            }
            (ConsoleFormat::Off, Some(file)) => {
                let (writer, guard) = file_writer(file)?;
                registry.with(json_layer(json, writer)).try_init()?;
                Ok(Some(guard))
            }
            (ConsoleFormat::Off, None) => {
                registry.try_init()?;
                Ok(None)
            }
        }
    }
}

impl Default for SpillwaySubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// JSONL formatting layer writing to `writer`
fn json_layer<S, W>(
    options: JsonOptions,
    writer: W,
) -> tracing_subscriber::fmt::Layer<S, JsonFields, Format<Json>, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(options.span_list)
        .flatten_event(options.flatten)
        .with_file(options.source_location)
        .with_line_number(options.source_location)
        .with_writer(writer)
}

/// Non-blocking writer for the configured log file
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;

    let rotation = match config.rotation {
        LogRotation::Never => {
            let file = File::create(config.directory.join(format!("{}.log", config.prefix)))?;
            return Ok(tracing_appender::non_blocking(file));
        }
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Hourly => Rotation::HOURLY,
    };

    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("log")
        .build(&config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// JSONL to stdout at `info`
pub fn init_default() -> Option<WorkerGuard> {
    SpillwaySubscriberBuilder::new().init()
}

pub fn init_development() -> Option<WorkerGuard> {
    SpillwaySubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Warnings only; later calls are no-ops once a subscriber is installed
pub fn init_testing() {
    let _ = SpillwaySubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
