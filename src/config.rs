//! Launcher configuration read from TOML.
//!
//! ```toml
//! [database]
//! path = "/var/lib/keeldb/main"
//! mem = "64MB"
//!
//! [server]
//! addr = "127.0.0.1:9999"
//! max_connections = 20
//!
//! [log]
//! filter = "info"
//! ```
//!
//! Every section and key is optional.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::server::{DEFAULT_ADDR, DEFAULT_MAX_CONNECTIONS};
use crate::storage::EngineOptions;
use crate::types::{KeelError, Result};

/// Parsed configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// `[database]`
    #[serde(default)]
    pub database: DatabaseSection,
    /// `[server]`
    #[serde(default)]
    pub server: ServerSection,
    /// `[log]`
    #[serde(default)]
    pub log: LogSection,
}

/// `[database]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseSection {
    /// Base path used when the command line names none.
    pub path: Option<PathBuf>,
    /// Page cache size such as `64MB`.
    pub mem: Option<String>,
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    /// Listen address.
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Cap on concurrent sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            max_connections: default_max_connections(),
        }
    }
}

/// `[log]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_addr() -> String {
    DEFAULT_ADDR.to_string()
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_filter() -> String {
    "info".to_string()
}

/// Problems loading or interpreting the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read, or an explicit path is missing.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// `database.mem` is not a size.
    #[error("invalid memory size '{value}'")]
    InvalidMem {
        /// Offending value.
        value: String,
    },
    /// `server.addr` is not a socket address.
    #[error("invalid server address '{value}'")]
    InvalidAddr {
        /// Offending value.
        value: String,
    },
}

impl Config {
    /// Loads `explicit`, or the default location if it exists, or defaults.
    pub fn load(explicit: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        match explicit {
            Some(path) => read_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => read_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parses configuration text.
    pub fn from_toml(path: &Path, text: &str) -> std::result::Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Engine options implied by `[database]`, with `mem` overriding the
    /// configured value when given.
    pub fn engine_options(&self, mem: Option<&str>) -> std::result::Result<EngineOptions, ConfigError> {
        let mut options = EngineOptions::default();
        if let Some(value) = mem.or(self.database.mem.as_deref()) {
            let bytes = parse_mem(value).map_err(|_| ConfigError::InvalidMem {
                value: value.to_string(),
            })?;
            options = options.cache_bytes(bytes);
        }
        Ok(options)
    }

    /// Listen address, with `addr` overriding the configured one when given.
    pub fn server_addr(&self, addr: Option<&str>) -> std::result::Result<SocketAddr, ConfigError> {
        let value = addr.unwrap_or(&self.server.addr);
        value.parse().map_err(|_| ConfigError::InvalidAddr {
            value: value.to_string(),
        })
    }
}

fn read_file(path: &Path) -> std::result::Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_toml(path, &contents)
}

/// `<config dir>/keeldb/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("keeldb").join("config.toml"))
}

/// Parses sizes like `64MB`: an integer followed by `KB`, `MB` or `GB`.
pub fn parse_mem(text: &str) -> Result<u64> {
    let text = text.trim();
    let split = text.len().checked_sub(2).filter(|&at| text.is_char_boundary(at));
    let Some(at) = split else {
        return Err(KeelError::Invalid("memory size needs a KB, MB or GB suffix"));
    };
    let (digits, unit) = text.split_at(at);
    let scale: u64 = match unit.to_ascii_uppercase().as_str() {
        "KB" => 1 << 10,
        "MB" => 1 << 20,
        "GB" => 1 << 30,
        _ => return Err(KeelError::Invalid("memory size needs a KB, MB or GB suffix")),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .ok_or(KeelError::Invalid("memory size is not a number"))
}
