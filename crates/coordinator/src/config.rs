//! Daemon configuration
//!
//! Sources, later ones winning: built-in defaults, an optional TOML file
//! named by `COORDINATOR_CONFIG`, then `COORDINATOR_*` environment
//! variables with `__` separating nested keys
//! (`COORDINATOR_THERMAL__POLL_INTERVAL_MS=250`).

use anyhow::Result;
use coordinator_lib::{
    config::CoordinatorConfig, models::StreamProfile, thermal::DEFAULT_THERMAL_ZONE,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Environment variable naming the configuration file
pub const CONFIG_FILE_ENV: &str = "COORDINATOR_CONFIG";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// API server port for health, metrics and control
    pub api_port: u16,

    /// Temperature file polled for thermal state
    pub thermal_zone: String,

    /// Streams admitted at startup
    pub streams: Vec<StreamProfile>,

    #[serde(flatten)]
    pub coordinator: CoordinatorConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            api_port: 8080,
            thermal_zone: DEFAULT_THERMAL_ZONE.to_string(),
            streams: Vec::new(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the file named in the environment, if any,
    /// and from the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_FILE_ENV).ok();
        Self::load_from(path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("COORDINATOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid configuration, using defaults");
            DaemonConfig::default()
        }))
    }
}
