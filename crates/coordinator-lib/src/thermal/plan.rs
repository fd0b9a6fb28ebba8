//! Mitigation plans
//!
//! `state_to_plan` is a total, pure mapping from a thermal state to the
//! ordered list of corrective actions for that state. Applying the plan is
//! the adapter's job.

use super::{ThermalHistory, ThermalState};
use crate::models::{Feature, Priority};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of recent samples considered by [`predict_state`]
pub const DEFAULT_PREDICTION_WINDOW: usize = 10;

/// Tunable parameters of the mitigation strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MitigationPolicy {
    pub fair_frame_rate: u32,
    pub serious_frame_rate: u32,
    pub critical_frame_rate: u32,
    /// Linear scale applied to resolution at Serious
    pub resolution_scale_factor: f64,
    /// Whether Serious may step streams down a resolution class
    pub allow_resolution_reduction: bool,
    /// Largest share of any scaled dimension one stream may hold above Nominal
    pub single_stream_ceiling: f64,
}

impl Default for MitigationPolicy {
    fn default() -> Self {
        Self {
            fair_frame_rate: 24,
            serious_frame_rate: 15,
            critical_frame_rate: 10,
            resolution_scale_factor: 0.75,
            allow_resolution_reduction: true,
            single_stream_ceiling: crate::allocator::DEFAULT_SINGLE_STREAM_CEILING,
        }
    }
}

/// Action type used for supersession: a new mitigation replaces any active
/// mitigation of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationKind {
    DisableStreams,
    ReduceFrameRate,
    ReduceResolution,
    DisableFeatures,
    EnablePowerSaving,
}

impl fmt::Display for MitigationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MitigationKind::DisableStreams => "disable_streams",
            MitigationKind::ReduceFrameRate => "reduce_frame_rate",
            MitigationKind::ReduceResolution => "reduce_resolution",
            MitigationKind::DisableFeatures => "disable_features",
            MitigationKind::EnablePowerSaving => "enable_power_saving",
        };
        write!(f, "{name}")
    }
}

/// What a mitigation does, with its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MitigationAction {
    DisableStreams,
    ReduceFrameRate { target_fps: u32 },
    ReduceResolution { factor: f64 },
    DisableFeatures { features: Vec<Feature> },
    EnablePowerSaving,
}

impl MitigationAction {
    pub fn kind(&self) -> MitigationKind {
        match self {
            MitigationAction::DisableStreams => MitigationKind::DisableStreams,
            MitigationAction::ReduceFrameRate { .. } => MitigationKind::ReduceFrameRate,
            MitigationAction::ReduceResolution { .. } => MitigationKind::ReduceResolution,
            MitigationAction::DisableFeatures { .. } => MitigationKind::DisableFeatures,
            MitigationAction::EnablePowerSaving => MitigationKind::EnablePowerSaving,
        }
    }
}

/// A single corrective action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mitigation {
    pub action: MitigationAction,
    /// Only streams strictly below this priority are targeted; `None`
    /// targets every remaining stream.
    pub priority_threshold: Option<Priority>,
    pub description: String,
}

impl Mitigation {
    fn new(action: MitigationAction, threshold: Option<Priority>, description: String) -> Self {
        Self {
            action,
            priority_threshold: threshold,
            description,
        }
    }

    pub fn kind(&self) -> MitigationKind {
        self.action.kind()
    }

    /// Whether a stream of `priority` falls in this mitigation's scope
    pub fn applies_to(&self, priority: Priority) -> bool {
        match self.priority_threshold {
            Some(threshold) => priority < threshold,
            None => true,
        }
    }
}

/// Ordered mitigations generated for one state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationPlan {
    pub state: ThermalState,
    pub mitigations: Vec<Mitigation>,
}

impl MitigationPlan {
    pub fn is_empty(&self) -> bool {
        self.mitigations.is_empty()
    }

    pub fn contains_kind(&self, kind: MitigationKind) -> bool {
        self.mitigations.iter().any(|m| m.kind() == kind)
    }
}

/// Build the mitigation plan for `state`.
pub fn state_to_plan(state: ThermalState, policy: &MitigationPolicy) -> MitigationPlan {
    let mitigations = match state {
        ThermalState::Nominal => Vec::new(),
        ThermalState::Fair => vec![
            Mitigation::new(
                MitigationAction::ReduceFrameRate {
                    target_fps: policy.fair_frame_rate,
                },
                Some(Priority::High),
                format!(
                    "Cap streams below high priority at {} fps",
                    policy.fair_frame_rate
                ),
            ),
            Mitigation::new(
                MitigationAction::DisableFeatures {
                    features: vec![Feature::Hdr, Feature::LowLightBoost],
                },
                Some(Priority::High),
                "Disable HDR and low-light boost below high priority".to_string(),
            ),
        ],
        ThermalState::Serious => {
            let mut plan = vec![
                Mitigation::new(
                    MitigationAction::DisableStreams,
                    Some(Priority::High),
                    "Disable streams below high priority".to_string(),
                ),
                Mitigation::new(
                    MitigationAction::ReduceFrameRate {
                        target_fps: policy.serious_frame_rate,
                    },
                    None,
                    format!(
                        "Cap remaining streams at {} fps",
                        policy.serious_frame_rate
                    ),
                ),
            ];
            if policy.allow_resolution_reduction {
                plan.push(Mitigation::new(
                    MitigationAction::ReduceResolution {
                        factor: policy.resolution_scale_factor,
                    },
                    None,
                    format!(
                        "Scale remaining streams to {:.0}% resolution",
                        policy.resolution_scale_factor * 100.0
                    ),
                ));
            }
            plan
        }
        ThermalState::Critical => vec![
            Mitigation::new(
                MitigationAction::DisableStreams,
                Some(Priority::Essential),
                "Disable every non-essential stream".to_string(),
            ),
            Mitigation::new(
                MitigationAction::ReduceFrameRate {
                    target_fps: policy.critical_frame_rate,
                },
                None,
                format!(
                    "Cap remaining streams at {} fps",
                    policy.critical_frame_rate
                ),
            ),
            Mitigation::new(
                MitigationAction::EnablePowerSaving,
                None,
                "Enable device power saving".to_string(),
            ),
        ],
    };

    MitigationPlan { state, mitigations }
}

/// Predict the thermal state from the last `window` samples.
///
/// More than half Critical gives Critical, otherwise more than half Serious
/// gives Serious, otherwise a most recent sample of Fair gives Fair, and
/// anything else is Nominal.
pub fn predict_state(history: &ThermalHistory, window: usize) -> ThermalState {
    let majority = window / 2;
    let mut critical = 0;
    let mut serious = 0;
    let mut latest = None;

    for sample in history.recent(window) {
        match sample.state {
            ThermalState::Critical => critical += 1,
            ThermalState::Serious => serious += 1,
            _ => {}
        }
        latest = Some(sample.state);
    }

    if critical > majority {
        ThermalState::Critical
    } else if serious > majority {
        ThermalState::Serious
    } else if latest == Some(ThermalState::Fair) {
        ThermalState::Fair
    } else {
        ThermalState::Nominal
    }
}
