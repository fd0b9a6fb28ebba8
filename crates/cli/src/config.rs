//! Configuration management for the CLI

use anyhow::{Context, Result};
use coordinator_lib::capability::DeviceCapabilities;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Used when neither the flag, the environment nor the config file set one
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// API endpoint URL
    pub api_url: Option<String>,
    /// Capabilities file used by offline commands
    pub capabilities: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a file; a missing file gives the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Resolve the API URL, preferring an explicit value
    pub fn api_url(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Get the configuration file path
    fn config_path() -> Option<PathBuf> {
        let home = dirs_next::home_dir()?;
        Some(home.join(".config").join("capctl").join("config.json"))
    }
}

/// Load device capabilities from a JSON file, or the built-in defaults
pub fn load_capabilities(path: Option<&Path>) -> Result<DeviceCapabilities> {
    let Some(path) = path else {
        return Ok(DeviceCapabilities::default());
    };

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read capabilities file {}", path.display()))?;

    serde_json::from_str(&content).context("Failed to parse capabilities file")
}
