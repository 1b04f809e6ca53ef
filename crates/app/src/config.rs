//! Relay configuration
//!
//! Loaded from TOML: the path given on the command line, otherwise
//! `tagwire.toml` in the platform config directory, otherwise defaults.
//! `TAGWIRE_PORT` overrides the listening port.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use tagwire_net::ServerConfig;

const CONFIG_FILE: &str = "tagwire.toml";

/// Environment variable overriding `server.port`
pub const PORT_ENV: &str = "TAGWIRE_PORT";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid port in TAGWIRE_PORT: '{0}'")]
    InvalidPort(String),
}

/// Top-level relay configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Tracing filter used when `RUST_LOG` is unset
    pub log_filter: Option<String>,
}

impl AppConfig {
    /// Resolve configuration from `path`, the default location, and the
    /// environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_port_override(std::env::var(PORT_ENV).ok().as_deref())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    fn apply_port_override(&mut self, value: Option<&str>) -> Result<(), ConfigError> {
        if let Some(value) = value {
            self.server.port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(value.to_string()))?;
        }
        Ok(())
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or("info")
    }
}

fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "onyx", "tagwire").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
