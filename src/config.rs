//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files, JSON config files, and environment variable
//! overrides.

use crate::ingest::client::{self, ClientConfig};
use crate::sensors::{SensorKind, SimulatedSensor};
use crate::storage::writer::validate_filename_pattern;
use crate::storage::{LogConfig, StorageError};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Defaults to `<log_dir>/archive`
    #[serde(default)]
    pub archive_dir: Option<String>,

    #[serde(default = "default_filename_pattern")]
    pub filename_pattern: String,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_rotate_every_hours")]
    pub rotate_every_hours: f64,

    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: f64,

    #[serde(default)]
    pub rotate_after_lines: Option<u64>,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Periodic rotation check, independent of writes
    #[serde(default)]
    pub rotation_check_secs: Option<u64>,
}

fn default_log_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("sensorlog").to_string_lossy().to_string())
        .unwrap_or_else(|| "./sensor_logs".to_string())
}

fn default_filename_pattern() -> String {
    "sensors_%Y%m%d_%H%M%S.csv".to_string()
}

fn default_buffer_size() -> usize {
    100
}

fn default_rotate_every_hours() -> f64 {
    24.0
}

fn default_max_size_mb() -> f64 {
    10.0
}

fn default_retention_days() -> u32 {
    30
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            archive_dir: None,
            filename_pattern: default_filename_pattern(),
            buffer_size: default_buffer_size(),
            rotate_every_hours: default_rotate_every_hours(),
            max_size_mb: default_max_size_mb(),
            rotate_after_lines: None,
            retention_days: default_retention_days(),
            rotation_check_secs: None,
        }
    }
}

/// Ingestion server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "client::default_port")]
    pub port: u16,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_read_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            host: default_host(),
            port: client::default_port(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Local sensor poll loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_ms: default_poll_interval(),
        }
    }
}

/// One simulated sensor
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SensorConfig {
    pub id: String,
    pub kind: SensorKind,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl SensorConfig {
    pub fn new(id: &str, kind: SensorKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            enabled: true,
        }
    }

    /// Build the simulated sensor; disabled sensors start inactive
    pub fn build(&self) -> SimulatedSensor {
        let mut sensor = SimulatedSensor::new(&self.id, self.kind);
        if !self.enabled {
            sensor.stop();
        }
        sensor
    }
}

fn default_sensors() -> Vec<SensorConfig> {
    vec![
        SensorConfig::new("temp_01", SensorKind::Temperature),
        SensorConfig::new("hum_01", SensorKind::Humidity),
        SensorConfig::new("press_01", SensorKind::Pressure),
        SensorConfig::new("light_01", SensorKind::Light),
    ]
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

impl LoggingConfig {
    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` takes precedence over `level`.
    pub fn init(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(format!("sensorlog={}", self.level)))?;

        let json = self.format == "json";
        tracing_subscriber::registry()
            .with(filter)
            .with(json.then(|| fmt::layer().json()))
            .with((!json).then(fmt::layer))
            .try_init()?;
        Ok(())
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// `.json` files are parsed as JSON, everything else as TOML. A JSON file
    /// with storage keys at the top level is read as the `[storage]` section.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let parse_err = |error: String| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        };

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config = if is_json {
            let value: serde_json::Value =
                serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?;
            if value.get("log_dir").is_some() {
                let storage: StorageConfig =
                    serde_json::from_value(value).map_err(|e| parse_err(e.to_string()))?;
                Config {
                    storage,
                    ..Config::default()
                }
            } else {
                serde_json::from_value(value).map_err(|e| parse_err(e.to_string()))?
            }
        } else {
            toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?
        };

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides, then validate
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("sensorlog").join("config.toml")),
            Some(PathBuf::from("/etc/sensorlog/config.toml")),
            Some(PathBuf::from("./config.toml")),
            Some(PathBuf::from("./config.json")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                let config = Self::load_with_env(path)?;
                tracing::info!("Loaded config from {:?}", path);
                return Ok(config);
            }
        }

        tracing::info!("Using default config with environment overrides");
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let storage = &self.storage;

        if storage.log_dir.trim().is_empty() {
            return Err(invalid("storage.log_dir must not be empty"));
        }
        if storage.buffer_size == 0 {
            return Err(invalid("storage.buffer_size must be at least 1"));
        }
        if !(storage.rotate_every_hours.is_finite() && storage.rotate_every_hours > 0.0) {
            return Err(invalid("storage.rotate_every_hours must be positive"));
        }
        if !(storage.max_size_mb.is_finite() && storage.max_size_mb > 0.0) {
            return Err(invalid("storage.max_size_mb must be positive"));
        }
        if storage.rotate_after_lines == Some(0) {
            return Err(invalid("storage.rotate_after_lines must be at least 1"));
        }
        if storage.rotation_check_secs == Some(0) {
            return Err(invalid("storage.rotation_check_secs must be at least 1"));
        }
        validate_filename_pattern(&storage.filename_pattern).map_err(|e| match e {
            StorageError::Config(msg) => ConfigError::Invalid(format!("storage.{}", msg)),
            other => ConfigError::Invalid(other.to_string()),
        })?;

        if self.poller.interval_ms == 0 {
            return Err(invalid("poller.interval_ms must be at least 1"));
        }

        let mut ids = HashSet::new();
        for sensor in &self.sensors {
            if sensor.id.trim().is_empty() {
                return Err(invalid("sensor id must not be empty"));
            }
            if !ids.insert(sensor.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate sensor id {:?}",
                    sensor.id
                )));
            }
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                other
            ))),
        }
    }

    /// Engine settings derived from `[storage]`
    pub fn to_log_config(&self) -> LogConfig {
        let storage = &self.storage;
        let mut config = LogConfig::new(&storage.log_dir);

        if let Some(archive_dir) = &storage.archive_dir {
            config.archive_dir = PathBuf::from(archive_dir);
        }
        config.filename_pattern = storage.filename_pattern.clone();
        config.buffer_size = storage.buffer_size;
        config.rotate_every =
            chrono::Duration::milliseconds((storage.rotate_every_hours * 3_600_000.0) as i64);
        config.max_size_bytes = (storage.max_size_mb * 1024.0 * 1024.0) as u64;
        config.rotate_after_lines = storage.rotate_after_lines;
        config.retention_days = storage.retention_days;
        config.rotation_check = storage
            .rotation_check_secs
            .map(std::time::Duration::from_secs);
        config
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(log_dir) = std::env::var("SENSORLOG_LOG_DIR") {
            self.storage.log_dir = log_dir;
        }

        if let Ok(host) = std::env::var("SENSORLOG_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SENSORLOG_PORT") {
            match port.parse() {
                Ok(p) => {
                    self.server.port = p;
                    self.client.port = p;
                }
                Err(_) => tracing::warn!("Ignoring invalid SENSORLOG_PORT={:?}", port),
            }
        }

        if let Ok(level) = std::env::var("SENSORLOG_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SENSORLOG_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            poller: PollerConfig::default(),
            sensors: default_sensors(),
            logging: LoggingConfig::default(),
        }
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
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
    r#"# Sensorlog Configuration
#
# Environment variables override these settings:
# - SENSORLOG_LOG_DIR
# - SENSORLOG_HOST
# - SENSORLOG_PORT
# - SENSORLOG_LOG_LEVEL
# - SENSORLOG_LOG_FORMAT

[storage]
# Directory for live CSV files
log_dir = "./sensor_logs"

# Directory for compressed archives (default: <log_dir>/archive)
# archive_dir = "./sensor_logs/archive"

# strftime pattern for new files (UTC); must end with .csv
filename_pattern = "sensors_%Y%m%d_%H%M%S.csv"

# Readings held in memory before a flush
buffer_size = 100

# Rotate the active file after this many hours
rotate_every_hours = 24

# Rotate the active file once it reaches this size (MB)
max_size_mb = 10

# Rotate the active file after this many data rows
# rotate_after_lines = 100000

# Delete archives older than this many days
retention_days = 30

# Check the rotation policy on a timer, even without writes (seconds)
# rotation_check_secs = 60

[server]
# Accept readings over TCP
enabled = true
host = "0.0.0.0"
port = 5000

# Close connections that send nothing for this long (seconds)
read_timeout_secs = 30

[client]
# Target for `sensorlog-cli send`
host = "127.0.0.1"
port = 5000
timeout_ms = 5000
retries = 3
retry_delay_ms = 200

[poller]
# Sample the simulated sensors below
enabled = true
interval_ms = 1000

[[sensors]]
id = "temp_01"
kind = "temperature"

[[sensors]]
id = "hum_01"
kind = "humidity"

[[sensors]]
id = "press_01"
kind = "pressure"

[[sensors]]
id = "light_01"
kind = "light"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generated_config_parses_and_validates() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.storage.log_dir, "./sensor_logs");
        assert_eq!(config.storage.buffer_size, 100);
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.sensors.len(), 4);
        assert_eq!(config.sensors[3].kind, SensorKind::Light);
    }

    #[test]
    fn test_to_log_config() {
        let toml = r#"
            [storage]
            log_dir = "/tmp/logs"
            buffer_size = 3
            rotate_every_hours = 0.5
            max_size_mb = 1
            rotate_after_lines = 5
            retention_days = 7
            rotation_check_secs = 10
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        let log = config.to_log_config();
        assert_eq!(log.log_dir, PathBuf::from("/tmp/logs"));
        assert_eq!(log.archive_dir, PathBuf::from("/tmp/logs/archive"));
        assert_eq!(log.buffer_size, 3);
        assert_eq!(log.rotate_every, chrono::Duration::minutes(30));
        assert_eq!(log.max_size_bytes, 1024 * 1024);
        assert_eq!(log.rotate_after_lines, Some(5));
        assert_eq!(log.retention_days, 7);
        assert_eq!(log.rotation_check, Some(std::time::Duration::from_secs(10)));
    }

    #[test]
    fn test_legacy_flat_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "log_dir": "logs",
                "filename_pattern": "sensors_%Y%m%d_%H%M%S.csv",
                "buffer_size": 10,
                "rotate_every_hours": 24,
                "max_size_mb": 5,
                "rotate_after_lines": 100000,
                "retention_days": 30
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.storage.log_dir, "logs");
        assert_eq!(config.storage.buffer_size, 10);
        assert_eq!(config.storage.rotate_after_lines, Some(100_000));
        assert_eq!(config.sensors.len(), 4);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let cases = [
            "[storage]\nbuffer_size = 0",
            "[storage]\nrotate_every_hours = 0",
            "[storage]\nmax_size_mb = -1",
            "[storage]\nrotate_after_lines = 0",
            "[storage]\nfilename_pattern = \"sensors.csv\"",
            "[storage]\nfilename_pattern = \"sensors_%Y.log\"",
            "[storage]\nfilename_pattern = \"sensors_%Q.csv\"",
            "[logging]\nformat = \"xml\"",
            "[[sensors]]\nid = \"a\"\nkind = \"light\"\n[[sensors]]\nid = \"a\"\nkind = \"light\"",
        ];
        for case in cases {
            let config: Config = toml::from_str(case).unwrap();
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "accepted: {}",
                case
            );
        }
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage\nbuffer_size = ").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_disabled_sensor_starts_inactive() {
        let mut sensor = SensorConfig::new("temp_01", SensorKind::Temperature);
        sensor.enabled = false;
        assert!(!sensor.build().is_active());
    }
}
