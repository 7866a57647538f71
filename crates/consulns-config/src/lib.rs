//! # consulns Configuration
//!
//! YAML/JSON/TOML configuration for the consulns remote backend.
//!
//! Every section has sensible defaults, so an empty file (or no file at all)
//! yields a working configuration that serves the built-in bootstrap zone.
//!
//! ```yaml
//! server:
//!   socket_path: /run/pdns/consulns.sock
//!   request_timeout_ms: 2000
//! logging:
//!   level: debug
//! zones:
//!   - name: example.com.
//!     records:
//!       - { owner: "@", type: NS, value: ns1.example.com. }
//!       - { owner: www, type: A, value: 192.0.2.1 }
//! ```

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod zones;

pub use zones::{RecordConfig, ZoneConfig};

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Zone bootstrap error: {0}")]
    Store(#[from] consulns_store::StoreError),

    #[error("File not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration for the consulns daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener and request handling.
    pub server: ServerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Zones loaded into the store at startup.
    pub zones: Vec<ZoneConfig>,
}

impl Config {
    /// Loads configuration from a file, picking the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };

        Ok(config)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;

        for (i, zone) in self.zones.iter().enumerate() {
            zone.validate()?;
            if self.zones[..i].iter().any(|z| z.name == zone.name) {
                return Err(ConfigError::InvalidValue {
                    field: format!("zones[{i}].name"),
                    message: format!("zone {} is defined twice", zone.name),
                });
            }
        }

        Ok(())
    }

    /// Returns the configured zones, or the built-in zone when none are set.
    pub fn bootstrap_zones(&self) -> Vec<ZoneConfig> {
        if self.zones.is_empty() {
            vec![ZoneConfig::builtin()]
        } else {
            self.zones.clone()
        }
    }

    /// Serializes to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Listener and request handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unix socket the DNS server connects to.
    pub socket_path: Option<PathBuf>,

    /// Per-request processing deadline in milliseconds.
    pub request_timeout_ms: u64,

    /// Longest accepted request line in bytes.
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            request_timeout_ms: 2000,
            max_frame_len: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Returns the request deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.request_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.max_frame_len == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_frame_len".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,

    /// Log format (text, json).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Thread-safe configuration holder.
pub struct ConfigHolder {
    config: ArcSwap<Config>,
    path: RwLock<Option<PathBuf>>,
}

impl ConfigHolder {
    /// Creates a new configuration holder.
    pub fn new(config: Config) -> Self {
        Self {
            config: ArcSwap::new(Arc::new(config)),
            path: RwLock::new(None),
        }
    }

    /// Creates a holder from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Config::from_file(path)?;
        config.validate()?;
        Ok(Self {
            config: ArcSwap::new(Arc::new(config)),
            path: RwLock::new(Some(path.to_path_buf())),
        })
    }

    /// Returns the current configuration.
    pub fn get(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Returns the file the configuration was loaded from.
    pub fn path(&self) -> Option<PathBuf> {
        self.path.read().clone()
    }

    /// Applies `f` to a copy of the configuration and stores the result.
    pub fn update(&self, f: impl FnOnce(&mut Config)) {
        let mut next = (*self.get()).clone();
        f(&mut next);
        self.config.store(Arc::new(next));
    }
}

impl Default for ConfigHolder {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
