//! Configuration management for the registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (registry.toml)
//! - Environment variables (PROTO_REGISTRY__*)
//!
//! ## Example config file (registry.toml):
//! ```toml
//! [database]
//! path = "/var/lib/proto-registry/registry.db"
//! busy_timeout_ms = 5000
//!
//! [logging]
//! filter = "proto_registry=debug"
//!
//! [discovery]
//! extension = "proto"
//! ```

use config_crate::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Main configuration for the registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Source discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; defaults to the per-user data directory
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// How long a writer waits on a locked database before giving up
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// File extension of schema sources, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_log_filter() -> String {
    "proto_registry=info".to_string()
}

fn default_extension() -> String {
    "proto".to_string()
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "proto-registry", "proto-registry")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
        }
    }
}

impl DatabaseConfig {
    /// Configured path, else the user data directory, else a local dot directory
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        match project_dirs() {
            Some(dirs) => dirs.data_dir().join("registry.db"),
            None => PathBuf::from(".proto-registry").join("registry.db"),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the defaults
    pub fn load_from(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_locations = ["registry.toml", ".registry.toml", "config/registry.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(dirs) = project_dirs() {
            let xdg_config = dirs.config_dir().join("registry.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // PROTO_REGISTRY__DATABASE__PATH and friends
        builder = builder.add_source(
            Environment::with_prefix("PROTO_REGISTRY")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}
