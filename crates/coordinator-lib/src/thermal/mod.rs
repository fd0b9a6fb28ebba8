//! Thermal adaptation
//!
//! This module provides:
//! - The thermal severity state machine and its budget headroom
//! - A bounded history of observed states and the prediction heuristic
//! - Pure mapping from a state to an ordered mitigation plan
//! - The adapter that applies plans against the allocator and stream owner
//! - A polling monitor loop over pluggable thermal signal sources

mod adapter;
mod history;
mod monitor;
mod plan;

#[cfg(test)]
mod tests;

pub use adapter::{ThermalAdapter, TransitionReport};
pub use history::{ThermalHistory, ThermalSample, DEFAULT_HISTORY_CAPACITY};
pub use monitor::{
    MonitorConfig, StaticThermalSource, SysfsThermalSource, ThermalMonitor, ThermalSignalSource,
    DEFAULT_THERMAL_ZONE,
};
pub use plan::{
    predict_state, state_to_plan, Mitigation, MitigationAction, MitigationKind, MitigationPlan,
    MitigationPolicy, DEFAULT_PREDICTION_WINDOW,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Thermal severity reported by the platform, ordered from coolest to hottest
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ThermalState {
    #[default]
    Nominal,
    Fair,
    Serious,
    Critical,
}

impl ThermalState {
    pub const ALL: [ThermalState; 4] = [
        ThermalState::Nominal,
        ThermalState::Fair,
        ThermalState::Serious,
        ThermalState::Critical,
    ];

    /// Fraction of the hardware budget usable at this severity
    pub fn headroom(&self) -> f64 {
        match self {
            ThermalState::Nominal => 1.0,
            ThermalState::Fair => 0.7,
            ThermalState::Serious => 0.3,
            ThermalState::Critical => 0.1,
        }
    }

    /// 0 for Nominal up to 3 for Critical
    pub fn severity(&self) -> u8 {
        match self {
            ThermalState::Nominal => 0,
            ThermalState::Fair => 1,
            ThermalState::Serious => 2,
            ThermalState::Critical => 3,
        }
    }
}

impl fmt::Display for ThermalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThermalState::Nominal => write!(f, "nominal"),
            ThermalState::Fair => write!(f, "fair"),
            ThermalState::Serious => write!(f, "serious"),
            ThermalState::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for ThermalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nominal" => Ok(ThermalState::Nominal),
            "fair" => Ok(ThermalState::Fair),
            "serious" => Ok(ThermalState::Serious),
            "critical" => Ok(ThermalState::Critical),
            other => Err(format!("unknown thermal state '{other}'")),
        }
    }
}
