//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::query::QueryOptions;
use crate::storage::{CounterTable, EngineOptions, LogicalType};
use crate::write::PipelineOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Counter registry: every counter the engine accepts, with its type
    #[serde(default)]
    pub counters: Vec<CounterConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_partition_count")]
    pub partition_count: u32,

    #[serde(default = "default_block_size")]
    pub block_size: u32,

    #[serde(default = "default_initial_file_size")]
    pub initial_file_size: u64,

    #[serde(default = "default_file_growth_delta")]
    pub file_growth_delta: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_index_sync_interval")]
    pub index_sync_interval_secs: u64,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("meterdb").to_string_lossy().to_string())
        .unwrap_or_else(|| "./meterdb_data".to_string())
}

fn default_partition_count() -> u32 {
    5
}

fn default_block_size() -> u32 {
    120 // ten 12-byte records
}

fn default_initial_file_size() -> u64 {
    40_960 // ten 4 KB pages
}

fn default_file_growth_delta() -> u64 {
    40_960
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_index_sync_interval() -> u64 {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            partition_count: default_partition_count(),
            block_size: default_block_size(),
            initial_file_size: default_initial_file_size(),
            file_growth_delta: default_file_growth_delta(),
            cleanup_interval_secs: default_cleanup_interval(),
            index_sync_interval_secs: default_index_sync_interval(),
        }
    }
}

impl StorageConfig {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            partition_count: self.partition_count,
            block_size: self.block_size,
            initial_file_size: self.initial_file_size,
            file_growth_delta: self.file_growth_delta,
        }
    }
}

/// Write pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_writer_count")]
    pub writer_count: usize,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_ingest_channel_size")]
    pub ingest_channel_size: usize,

    #[serde(default = "default_write_channel_size")]
    pub write_channel_size: usize,
}

fn default_writer_count() -> usize {
    4
}

fn default_flush_interval() -> u64 {
    5000 // 5 seconds
}

fn default_ingest_channel_size() -> usize {
    64
}

fn default_write_channel_size() -> usize {
    256
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            writer_count: default_writer_count(),
            flush_interval_ms: default_flush_interval(),
            ingest_channel_size: default_ingest_channel_size(),
            write_channel_size: default_write_channel_size(),
        }
    }
}

impl PipelineConfig {
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            writer_count: self.writer_count,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            ingest_channel_size: self.ingest_channel_size,
            write_channel_size: self.write_channel_size,
        }
    }
}

/// Query pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_query_parser_count")]
    pub query_parser_count: usize,

    #[serde(default = "default_reader_count")]
    pub reader_count: usize,

    #[serde(default = "default_query_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_reader_channel_size")]
    pub reader_channel_size: usize,
}

fn default_query_parser_count() -> usize {
    2
}

fn default_reader_count() -> usize {
    4
}

fn default_query_timeout() -> u64 {
    30
}

fn default_reader_channel_size() -> usize {
    64
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            query_parser_count: default_query_parser_count(),
            reader_count: default_reader_count(),
            timeout_secs: default_query_timeout(),
            reader_channel_size: default_reader_channel_size(),
        }
    }
}

impl QueryConfig {
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            query_parser_count: self.query_parser_count,
            reader_count: self.reader_count,
            timeout: Duration::from_secs(self.timeout_secs),
            reader_channel_size: self.reader_channel_size,
        }
    }
}

/// Decoded-point cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: usize,
}

fn default_cache_max_entries() -> usize {
    4096
}

fn default_cache_max_bytes() -> usize {
    64 * 1024 * 1024 // 64 MB
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            max_bytes: default_cache_max_bytes(),
        }
    }
}

/// One registered counter
#[derive(Debug, Clone, Deserialize)]
pub struct CounterConfig {
    pub id: u16,
    pub data_type: LogicalType,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("meterdb").join("config.toml")),
            Some(PathBuf::from("/etc/meterdb/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = std::env::var("METERDB_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Ok(level) = std::env::var("METERDB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("METERDB_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Build the counter lookup table shared by the write and query paths.
    pub fn counter_table(&self) -> CounterTable {
        self.counters.iter().map(|c| (c.id, c.data_type)).collect()
    }

    /// Check the parameters the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.partition_count == 0 {
            return Err(ConfigError::Invalid(
                "storage.partition_count must be greater than zero".to_string(),
            ));
        }
        // Every numeric record must fit a block
        if self.storage.block_size < 12 {
            return Err(ConfigError::Invalid(
                "storage.block_size must be at least 12 bytes".to_string(),
            ));
        }
        if self.storage.file_growth_delta == 0 {
            return Err(ConfigError::Invalid(
                "storage.file_growth_delta must be greater than zero".to_string(),
            ));
        }
        if self.pipeline.writer_count == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.writer_count must be greater than zero".to_string(),
            ));
        }
        if self.pipeline.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.query.query_parser_count == 0 || self.query.reader_count == 0 {
            return Err(ConfigError::Invalid(
                "query worker counts must be greater than zero".to_string(),
            ));
        }
        if self.query.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "query.timeout_secs must be greater than zero".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for counter in &self.counters {
            if !seen.insert(counter.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate counter id {}",
                    counter.id
                )));
            }
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# meterdb Configuration
#
# Environment variables override these settings:
# - METERDB_DATA_DIR
# - METERDB_LOG_LEVEL
# - METERDB_LOG_FORMAT

[storage]
# Directory data is stored under, partitioned as <year>/<month>/<day>/<counter>
data_dir = "~/.local/share/meterdb"

# Partition files per day/counter store
partition_count = 5

# Block allocation unit (bytes); ten 12-byte records
block_size = 120

# Size partition files are created at (bytes)
initial_file_size = 40960

# Amount partition files grow by when full (bytes)
file_growth_delta = 40960

# How often idle day/counter stores are closed (seconds)
cleanup_interval_secs = 300

# How often dirty indexes are flushed to disk (seconds)
index_sync_interval_secs = 10

[pipeline]
# Writer worker tasks
writer_count = 4

# How often buffered points are flushed to the writers (ms)
flush_interval_ms = 5000

# Ingest channel bound; producers block when full
ingest_channel_size = 64

# Write channel bound between flusher and writers
write_channel_size = 256

[query]
# Query parser worker tasks; bounds queries in flight
query_parser_count = 2

# Reader worker tasks shared by all queries
reader_count = 4

# Per-query deadline (seconds)
timeout_secs = 30

# Reader request channel bound
reader_channel_size = 64

[cache]
# Decoded-point cache bounds
max_entries = 4096
max_bytes = 67108864

# Registered counters; points for unlisted counters are dropped.
# data_type: int64, float64, int32, float32 or string
[[counters]]
id = 1
data_type = "int64"

[[counters]]
id = 2
data_type = "float64"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
