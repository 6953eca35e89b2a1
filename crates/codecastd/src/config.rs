//! Relay configuration.
//!
//! Loaded from a TOML file where every field is optional, then overridden
//! by environment variables. A missing file means "all defaults"; a file
//! that exists but does not parse is a startup error.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable overriding `bind_addr`.
pub const BIND_ENV: &str = "CODECAST_BIND";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_MAX_MEMBERS_PER_ROOM: usize = 100;
const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Runtime settings for the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the WebSocket listener binds to
    pub bind_addr: SocketAddr,

    /// Joins beyond this many members are refused
    pub max_members_per_room: usize,

    /// Frames buffered per connection before it counts as a slow consumer
    pub outbound_queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_members_per_room: DEFAULT_MAX_MEMBERS_PER_ROOM,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

impl RelayConfig {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// Environment overrides are applied after the file is read.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => Self::from_file(p)?,
            Some(ref p) => {
                debug!(path = %p.display(), "No config file, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides(std::env::var(BIND_ENV).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        info!(path = %path.display(), "Loaded relay config");
        Ok(config)
    }

    /// Parses config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })
    }

    /// Applies the `CODECAST_BIND` override, if set.
    pub fn apply_env_overrides(&mut self, bind: Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = bind {
            self.bind_addr = value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: BIND_ENV,
                value,
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_members_per_room == 0 {
            return Err(ConfigError::Invalid("max_members_per_room must be at least 1"));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid("outbound_queue_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Default config location: `<config_dir>/codecast/codecastd.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("codecast").join("codecastd.toml"))
}

/// Errors raised while loading relay configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}
