//! Error types for the capture coordinator
//!
//! Every failure in the core is returned as a value. None of these are
//! fatal to the process; the worst case is an empty allocation table.

use crate::models::{AllocationId, ResourceDimension};
use crate::thermal::ThermalState;

/// Errors returned by the coordination core
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinatorError {
    /// Admitting or growing the stream would exceed the thermally scaled budget.
    #[error(
        "insufficient {dimension} for stream '{stream_id}': requested {requested:.2}, available {available:.2} (budget {budget:.2})"
    )]
    InsufficientResources {
        stream_id: String,
        dimension: ResourceDimension,
        requested: f64,
        available: f64,
        budget: f64,
    },

    /// A single stream asks for more than the per-stream ceiling allowed above Nominal.
    #[error(
        "thermal constraint at {state}: stream '{stream_id}' requests {requested:.2} {dimension}, ceiling is {ceiling:.2}"
    )]
    ThermalConstraints {
        stream_id: String,
        state: ThermalState,
        dimension: ResourceDimension,
        requested: f64,
        ceiling: f64,
    },

    /// Update or lookup on an allocation id that is not live.
    #[error("allocation {0} not found")]
    AllocationNotFound(AllocationId),

    /// The requested configuration does not fit the device capabilities.
    #[error("hardware not supported: {0}")]
    HardwareNotSupported(String),

    /// A frame could not be synchronized; the stream stays configured.
    #[error("synchronization failed for stream '{stream_id}': {reason}")]
    SynchronizationFailed { stream_id: String, reason: String },

    /// The thermal signal source could not be read.
    #[error("thermal signal source error: {0}")]
    ThermalSource(String),
}

impl CoordinatorError {
    /// True for admission failures the caller can recover from by shrinking
    /// the request or waiting for headroom.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::InsufficientResources { .. }
                | CoordinatorError::ThermalConstraints { .. }
        )
    }

    /// Short machine-friendly label, used for metric labels and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::InsufficientResources { .. } => "insufficient_resources",
            CoordinatorError::ThermalConstraints { .. } => "thermal_constraints",
            CoordinatorError::AllocationNotFound(_) => "allocation_not_found",
            CoordinatorError::HardwareNotSupported(_) => "hardware_not_supported",
            CoordinatorError::SynchronizationFailed { .. } => "synchronization_failed",
            CoordinatorError::ThermalSource(_) => "thermal_source",
        }
    }
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let err = CoordinatorError::InsufficientResources {
            stream_id: "back".to_string(),
            dimension: ResourceDimension::Bandwidth,
            requested: 10.0,
            available: 5.0,
            budget: 100.0,
        };
        assert!(err.is_recoverable());
        assert_eq!(err.kind(), "insufficient_resources");

        let err = CoordinatorError::AllocationNotFound(AllocationId(7));
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "allocation 7 not found");
    }

    #[test]
    fn test_thermal_constraint_message() {
        let err = CoordinatorError::ThermalConstraints {
            stream_id: "front".to_string(),
            state: ThermalState::Fair,
            dimension: ResourceDimension::Gpu,
            requested: 50.0,
            ceiling: 40.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("fair"));
        assert!(msg.contains("gpu"));
    }
}
