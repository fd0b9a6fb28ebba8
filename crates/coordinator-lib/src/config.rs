//! Coordinator configuration
//!
//! Every tunable has a default, so an empty document deserializes to a
//! working configuration.

use crate::capability::DeviceCapabilities;
use crate::events::DEFAULT_EVENT_BUFFER;
use crate::sync::{frame_period, DEFAULT_BUFFER_DEPTH, DEFAULT_NOMINAL_FRAME_RATE};
use crate::thermal::{
    MitigationPolicy, MonitorConfig, DEFAULT_HISTORY_CAPACITY, DEFAULT_PREDICTION_WINDOW,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    /// Signal source polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Consecutive read failures before the monitor is unhealthy
    pub failure_threshold: u32,
    pub history_capacity: usize,
    pub prediction_window: usize,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            failure_threshold: 5,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            prediction_window: DEFAULT_PREDICTION_WINDOW,
        }
    }
}

impl ThermalConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: self.poll_interval(),
            failure_threshold: self.failure_threshold.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Frame rate the default tolerance is derived from
    pub nominal_frame_rate: u32,
    /// Frames held per stream in frame-accurate mode
    pub buffer_depth: usize,
    /// Overrides the one-frame-period default tolerance
    pub tolerance_ms: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            nominal_frame_rate: DEFAULT_NOMINAL_FRAME_RATE,
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            tolerance_ms: None,
        }
    }
}

impl SyncConfig {
    pub fn tolerance(&self) -> Duration {
        self.tolerance_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| frame_period(self.nominal_frame_rate))
    }
}

/// Top-level configuration for a coordinator instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Label attached to structured log events
    pub device_name: String,
    pub capabilities: DeviceCapabilities,
    pub thermal: ThermalConfig,
    pub mitigation: MitigationPolicy,
    pub sync: SyncConfig,
    pub event_buffer_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            device_name: "camera0".to_string(),
            capabilities: DeviceCapabilities::default(),
            thermal: ThermalConfig::default(),
            mitigation: MitigationPolicy::default(),
            sync: SyncConfig::default(),
            event_buffer_size: DEFAULT_EVENT_BUFFER,
        }
    }
}
