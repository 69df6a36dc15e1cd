//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Parsed values that cannot be used to start the server
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Interface to bind (default 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port (default 3000, overridden by `PORT`)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Working directory layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Where raw uploads land before processing
    #[serde(default = "default_incoming_dir")]
    pub incoming_dir: PathBuf,
    /// Publicly served directory for transcoded artifacts
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Remove leftovers from a previous process at startup
    #[serde(default = "default_sweep_on_startup")]
    pub sweep_on_startup: bool,
}

fn default_incoming_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("public/uploads")
}

fn default_sweep_on_startup() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            incoming_dir: default_incoming_dir(),
            output_dir: default_output_dir(),
            sweep_on_startup: default_sweep_on_startup(),
        }
    }
}

/// Upload acceptance limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes (default 10 MiB)
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

/// Transcode behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TransformConfig {
    /// Upper bound on a single transcode in seconds (0 = unbounded)
    #[serde(default)]
    pub timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when neither the CLI nor `RUST_LOG` set one
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Only the listen port is overridable:
    /// - PORT -> server.port
    ///
    /// Unparsable values are ignored and the existing value is kept.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("PORT") {
            if let Ok(port) = val.trim().parse::<u16>() {
                self.server.port = port;
            }
        }
    }

    /// Check values that parse fine but cannot be served with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".to_string()));
        }
        if self.upload.max_file_bytes == 0 {
            return Err(ConfigError::Invalid(
                "upload.max_file_bytes must be greater than zero".to_string(),
            ));
        }
        if self.storage.incoming_dir == self.storage.output_dir {
            return Err(ConfigError::Invalid(format!(
                "storage.incoming_dir and storage.output_dir must differ (both are {})",
                self.storage.incoming_dir.display()
            )));
        }
        Ok(())
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a config file
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
