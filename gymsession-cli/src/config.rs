//! CLI configuration handling.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use gymsession_core::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// API endpoints and timeouts.
    #[serde(flatten)]
    pub session: SessionConfig,

    /// Keep the session in the OS keyring rather than in memory.
    #[serde(default = "default_prefer_keyring")]
    pub prefer_keyring: bool,

    /// Logging level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_prefer_keyring() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            prefer_keyring: default_prefer_keyring(),
            log_level: default_log_level(),
            config_path: PathBuf::new(),
        }
    }
}

/// Load configuration from `path`, or from the default location.
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path(),
    };
    load_config_from(&config_path)
}

pub fn load_config_from(config_path: &Path) -> Result<CliConfig> {
    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };

    config.config_path = config_path.to_path_buf();
    Ok(config)
}

fn default_config_path() -> PathBuf {
    ProjectDirs::from("com", "gymsession", "gymsession")
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("gymsession.toml"))
}
