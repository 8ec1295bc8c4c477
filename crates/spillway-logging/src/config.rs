//! Logging configuration
//!
//! Read from the `[logging]` table of the server config file:
//!
//! ```toml
//! [logging]
//! level = "info"
//! console = "pretty"
//!
//! [logging.file]
//! directory = "/var/log/spillway"
//! rotation = "hourly"
//!
//! [logging.targets]
//! spillway_buffer = "debug"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Service name used when none is configured
pub const DEFAULT_SERVICE_NAME: &str = "spillway";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base level directive; `RUST_LOG` replaces the whole filter when set
    pub level: String,

    /// Recorded on every span through the instance context
    pub service_name: String,

    pub console: ConsoleFormat,

    /// Colors for pretty console output
    pub ansi: bool,

    pub json: JsonOptions,

    /// Additional JSONL output to files
    pub file: Option<FileConfig>,

    /// Per-target levels, e.g. `spillway_buffer = "debug"`
    pub targets: BTreeMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            console: ConsoleFormat::Json,
            ansi: false,
            json: JsonOptions::default(),
            file: None,
            targets: BTreeMap::new(),
        }
    }
}

impl LogConfig {
    /// Pretty debug output on the terminal, with HTTP client internals kept quiet
    pub fn development() -> Self {
        let mut targets = BTreeMap::new();
        targets.insert("hyper".to_string(), "info".to_string());
        targets.insert("reqwest".to_string(), "info".to_string());
        Self {
            level: "debug".to_string(),
            console: ConsoleFormat::Pretty,
            ansi: true,
            targets,
            ..Default::default()
        }
    }

    /// JSONL on stdout plus daily files under `log_dir`
    pub fn production(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(FileConfig {
                directory: log_dir.into(),
                ..FileConfig::default()
            }),
            ..Default::default()
        }
    }

    /// Warnings only, uncolored so they read well in captured test output
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            console: ConsoleFormat::Pretty,
            ..Default::default()
        }
    }

    /// `EnvFilter` directives: the base level, then per-target overrides
    pub fn filter_directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.targets
                    .iter()
                    .map(|(target, level)| format!("{target}={level}")),
            )
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// What goes to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleFormat {
    Off,
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable multi-field lines
    Pretty,
}

/// Shape of JSONL records, on the console and in files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonOptions {
    /// Event fields at the top level instead of under `fields`
    pub flatten: bool,
    /// Include the list of entered spans
    pub span_list: bool,
    /// Include source file and line
    pub source_location: bool,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self {
            flatten: true,
            span_list: true,
            source_location: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File name stem; rolled files get a date suffix
    pub prefix: String,
    pub rotation: LogRotation,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: DEFAULT_SERVICE_NAME.to_string(),
            rotation: LogRotation::Daily,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    /// One `<prefix>.log`, truncated at startup
    Never,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_jsonl_console() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.console, ConsoleFormat::Json);
        assert!(config.file.is_none());
        assert_eq!(config.filter_directives(), "info");
    }

    #[test]
    fn test_development_quiets_http_internals() {
        let config = LogConfig::development();
        assert_eq!(config.console, ConsoleFormat::Pretty);
        assert!(config.ansi);
        assert_eq!(config.filter_directives(), "debug,hyper=info,reqwest=info");
    }

    #[test]
    fn test_production_adds_daily_file() {
        let config = LogConfig::production("/var/log/spillway");
        assert_eq!(config.console, ConsoleFormat::Json);
        let file = config.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("/var/log/spillway"));
        assert_eq!(file.prefix, "spillway");
        assert_eq!(file.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_filter_directives_sorted_by_target() {
        let mut config = LogConfig::testing();
        config
            .targets
            .insert("spillway_buffer".to_string(), "debug".to_string());
        config
            .targets
            .insert("axum".to_string(), "error".to_string());
        assert_eq!(
            config.filter_directives(),
            "warn,axum=error,spillway_buffer=debug"
        );
    }

    #[test]
    fn test_deserialize_partial_table() {
        let config: LogConfig = serde_json::from_value(serde_json::json!({
            "console": "off",
            "file": { "rotation": "never" },
            "json": { "source_location": true }
        }))
        .unwrap();
        assert_eq!(config.console, ConsoleFormat::Off);
        assert_eq!(config.level, "info");
        assert_eq!(config.file.unwrap().rotation, LogRotation::Never);
        assert!(config.json.source_location);
        assert!(config.json.flatten);
    }
}
