//! Capture coordination library for multi-stream camera pipelines
//!
//! This crate provides the core functionality for:
//! - Device capability modelling and resource estimation
//! - Admission control against a thermally scaled budget
//! - Thermal state tracking and graduated mitigation
//! - Frame synchronization across streams
//! - Configuration validation and fallback generation
//! - Health checks and observability

pub mod allocator;
pub mod capability;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod estimate;
pub mod events;
pub mod health;
pub mod models;
pub mod observability;
pub mod owner;
pub mod sync;
pub mod thermal;
pub mod validator;

pub use allocator::ResourceAllocator;
pub use capability::{CapabilityProvider, DeviceCapabilities, StaticCapabilities};
pub use config::CoordinatorConfig;
pub use coordinator::{
    AdmissionOutcome, CaptureCoordinator, CaptureCoordinatorBuilder, CoordinatorStatus,
};
pub use error::{CoordinatorError, Result};
pub use events::{CoordinatorEvent, EventSink};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{CoordinatorMetrics, StructuredLogger};
pub use owner::StreamOwner;
pub use thermal::ThermalState;
pub use validator::{ValidationIssue, ValidationReport};
