//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.plantwatch.toml` files.

use crate::batch::BatchConfig;
use crate::models::Domain;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".plantwatch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Per-domain batch thresholds.
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Primary store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Search index settings.
    #[serde(default)]
    pub index: IndexConfig,

    /// Live broadcast settings.
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default report path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "plantwatch_report.md".to_string()
}

/// Thresholds for one aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBatchConfig {
    /// Flush once this many records are buffered.
    pub max_size: usize,
    /// Flush at most this long after the first buffered record.
    pub max_time_ms: u64,
}

impl StreamBatchConfig {
    pub fn to_batch_config(self) -> BatchConfig {
        BatchConfig::new(self.max_size, Duration::from_millis(self.max_time_ms))
    }
}

/// Batch thresholds, one entry per domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default = "default_telemetry_batch")]
    pub telemetry: StreamBatchConfig,

    #[serde(default = "default_anomalies_batch")]
    pub anomalies: StreamBatchConfig,

    #[serde(default = "default_inspections_batch")]
    pub inspections: StreamBatchConfig,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            telemetry: default_telemetry_batch(),
            anomalies: default_anomalies_batch(),
            inspections: default_inspections_batch(),
        }
    }
}

impl BatchingConfig {
    pub fn for_domain(&self, domain: Domain) -> StreamBatchConfig {
        match domain {
            Domain::Telemetry => self.telemetry,
            Domain::Anomalies => self.anomalies,
            Domain::Inspections => self.inspections,
        }
    }
}

// High-rate samples: large batches, one-second latency.
fn default_telemetry_batch() -> StreamBatchConfig {
    StreamBatchConfig {
        max_size: 100,
        max_time_ms: 1000,
    }
}

// Anomalies are rare and urgent.
fn default_anomalies_batch() -> StreamBatchConfig {
    StreamBatchConfig {
        max_size: 20,
        max_time_ms: 500,
    }
}

fn default_inspections_batch() -> StreamBatchConfig {
    StreamBatchConfig {
        max_size: 50,
        max_time_ms: 2000,
    }
}

/// Primary store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the per-domain event logs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// fsync after every appended event.
    #[serde(default)]
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sync_writes: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Search index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Documents the index accepts before rejecting new ids.
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_documents: default_max_documents(),
        }
    }
}

fn default_max_documents() -> usize {
    1_000_000
}

/// Live broadcast settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Updates buffered per subscriber.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    256
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref data_dir) = args.data_dir {
            self.store.data_dir = data_dir.clone();
        }
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if args.sync_writes {
            self.store.sync_writes = true;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        for domain in Domain::ALL {
            self.batching
                .for_domain(domain)
                .to_batch_config()
                .validate()
                .with_context(|| format!("Invalid [batching.{}] section", domain))?;
        }
        if self.index.max_documents == 0 {
            anyhow::bail!("index.max_documents must be at least 1");
        }
        if self.broadcast.capacity == 0 {
            anyhow::bail!("broadcast.capacity must be at least 1");
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.batching.telemetry.max_size, 100);
        assert_eq!(config.batching.anomalies.max_time_ms, 500);
        assert_eq!(config.store.data_dir, PathBuf::from("data"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "plant_a.md"
verbose = true

[batching.telemetry]
max_size = 500
max_time_ms = 250

[store]
data_dir = "/var/lib/plantwatch"
sync_writes = true
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "plant_a.md");
        assert!(config.general.verbose);
        assert_eq!(
            config.batching.telemetry.to_batch_config(),
            BatchConfig::new(500, Duration::from_millis(250))
        );
        // Untouched sections keep their defaults.
        assert_eq!(config.batching.inspections.max_size, 50);
        assert_eq!(config.index.max_documents, 1_000_000);
        assert!(config.store.sync_writes);
    }

    #[test]
    fn test_negative_batch_size_fails_to_parse() {
        let toml_content = r#"
[batching.anomalies]
max_size = -1
max_time_ms = 100
"#;
        assert!(toml::from_str::<Config>(toml_content).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let mut config = Config::default();
        config.batching.inspections.max_time_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("batching.inspections"));
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[batching.telemetry]"));
        assert!(toml_str.contains("[store]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.batching.anomalies, default_anomalies_batch());
    }
}
