//! Capture coordinator facade
//!
//! Composes the capability model, allocator, thermal adapter and frame
//! synchronizer behind one handle, and keeps a stream-id index over the
//! allocation table. Each component guards its own state. The index is
//! pruned lazily, since the thermal monitor evicts streams without going
//! through this handle.

use crate::allocator::ResourceAllocator;
use crate::capability::{CapabilityProvider, DeviceCapabilities, StaticCapabilities};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::events::{CoordinatorEvent, EventSink};
use crate::health::{components, HealthRegistry};
use crate::models::{Allocation, AllocationId, CaptureConfiguration, ResourceVector, StreamProfile};
use crate::observability::StructuredLogger;
use crate::owner::StreamOwner;
use crate::sync::{
    Emission, Frame, FrameSynchronizer, MonotonicClock, ReferenceClock, SyncMode, SyncStatistics,
};
use crate::thermal::{
    Mitigation, ThermalAdapter, ThermalMonitor, ThermalSignalSource, ThermalState,
    TransitionReport,
};
use crate::validator::{fallback_configuration, validate, ValidationReport};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Result of admitting a whole configuration
#[derive(Debug, Clone)]
pub struct AdmissionOutcome {
    /// Validation of the configuration as requested
    pub report: ValidationReport,
    /// Whether the fallback generator rewrote the request
    pub used_fallback: bool,
    /// Configuration that was actually admitted
    pub configuration: CaptureConfiguration,
    pub admitted: Vec<(String, AllocationId)>,
    pub rejected: Vec<(String, CoordinatorError)>,
}

impl AdmissionOutcome {
    pub fn all_admitted(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Point-in-time view of the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub thermal_state: ThermalState,
    pub thermal_headroom: f64,
    pub predicted_state: ThermalState,
    pub power_saving: bool,
    pub usage: ResourceVector,
    pub scaled_budget: ResourceVector,
    pub allocations: Vec<Allocation>,
    pub active_mitigations: Vec<Mitigation>,
    pub synchronization: SyncStatistics,
}

/// Handle over every coordination component
pub struct CaptureCoordinator {
    config: CoordinatorConfig,
    capabilities: Arc<dyn CapabilityProvider>,
    allocator: Arc<ResourceAllocator>,
    adapter: Arc<ThermalAdapter>,
    synchronizer: FrameSynchronizer,
    streams: DashMap<String, AllocationId>,
    health: HealthRegistry,
}

impl CaptureCoordinator {
    pub fn builder() -> CaptureCoordinatorBuilder {
        CaptureCoordinatorBuilder::new()
    }

    /// Register the components this handle owns with the health registry
    pub async fn register_health(&self) {
        self.health.register(components::ALLOCATOR).await;
        self.health.register(components::SYNCHRONIZER).await;
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities.capabilities()
    }

    pub fn allocator(&self) -> &Arc<ResourceAllocator> {
        &self.allocator
    }

    pub fn adapter(&self) -> &Arc<ThermalAdapter> {
        &self.adapter
    }

    pub fn synchronizer(&self) -> &FrameSynchronizer {
        &self.synchronizer
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Build a monitor polling `source` into this coordinator's adapter
    pub fn thermal_monitor(&self, source: Arc<dyn ThermalSignalSource>) -> ThermalMonitor {
        ThermalMonitor::new(source, self.adapter.clone(), self.config.thermal.monitor_config())
            .with_health(self.health.clone())
    }

    // Admission

    /// Admit a stream. Requesting a stream id that is already live updates
    /// its allocation in place and returns the same id.
    ///
    /// The index entry stays locked until the allocator has answered, so
    /// concurrent requests for one stream id admit it at most once.
    pub fn request_allocation(&self, profile: StreamProfile) -> Result<AllocationId> {
        match self.streams.entry(profile.stream_id.clone()) {
            Entry::Occupied(mut entry) => {
                let id = *entry.get();
                match self.allocator.update_allocation(id, profile.clone()) {
                    Ok(_) => Ok(id),
                    // Evicted since it was indexed
                    Err(CoordinatorError::AllocationNotFound(_)) => {
                        match self.allocator.request_allocation(profile) {
                            Ok(fresh) => {
                                entry.insert(fresh);
                                Ok(fresh)
                            }
                            Err(e) => {
                                entry.remove();
                                Err(e)
                            }
                        }
                    }
                    Err(e) => Err(e),
                }
            }
            Entry::Vacant(entry) => {
                let id = self.allocator.request_allocation(profile)?;
                entry.insert(id);
                Ok(id)
            }
        }
    }

    /// Release by allocation id. Unknown ids are a no-op.
    pub fn release_allocation(&self, id: AllocationId) -> Option<Allocation> {
        let released = self.allocator.release_allocation(id);
        if let Some(allocation) = &released {
            self.streams
                .remove_if(&allocation.profile.stream_id, |_, live| *live == id);
        }
        released
    }

    pub fn release_stream(&self, stream_id: &str) -> Option<Allocation> {
        let (_, id) = self.streams.remove(stream_id)?;
        self.allocator.release_allocation(id)
    }

    pub fn update_allocation(&self, id: AllocationId, profile: StreamProfile) -> Result<Allocation> {
        let previous = self.allocator.allocation(id)?.profile.stream_id;
        let new_id = profile.stream_id.clone();
        let updated = self.allocator.update_allocation(id, profile)?;
        if previous != new_id {
            self.streams.remove_if(&previous, |_, live| *live == id);
            self.streams.insert(new_id, id);
        }
        Ok(updated)
    }

    /// Live allocation id of a stream
    pub fn allocation_for(&self, stream_id: &str) -> Option<AllocationId> {
        let id = self.streams.get(stream_id).map(|id| *id)?;
        if self.allocator.allocation(id).is_ok() {
            Some(id)
        } else {
            // Evicted by a thermal mitigation since it was indexed
            self.streams.remove_if(stream_id, |_, live| *live == id);
            None
        }
    }

    pub fn current_usage(&self) -> ResourceVector {
        self.allocator.current_usage()
    }

    /// Validate, fall back on hard errors, then admit every stream.
    ///
    /// Per-stream admission failures are collected, not propagated; streams
    /// admitted before a failure stay admitted.
    pub fn admit_configuration(&self, requested: &CaptureConfiguration) -> AdmissionOutcome {
        let caps = self.capabilities.capabilities();
        let report = validate(requested, &caps);
        let used_fallback = !report.is_valid();
        let configuration = if used_fallback {
            let fallback = fallback_configuration(requested, &caps);
            info!(
                requested = requested.streams.len(),
                kept = fallback.streams.len(),
                errors = report.errors.len(),
                "Configuration not supported, using fallback"
            );
            fallback
        } else {
            requested.clone()
        };

        let mut admitted = Vec::new();
        let mut rejected = Vec::new();
        for profile in &configuration.streams {
            match self.request_allocation(profile.clone()) {
                Ok(id) => admitted.push((profile.stream_id.clone(), id)),
                Err(e) => {
                    warn!(stream_id = %profile.stream_id, error = %e, "Stream not admitted");
                    rejected.push((profile.stream_id.clone(), e));
                }
            }
        }

        AdmissionOutcome {
            report,
            used_fallback,
            configuration,
            admitted,
            rejected,
        }
    }

    // Thermal

    /// Push a thermal signal, as a platform notification would
    pub fn handle_thermal_signal(&self, state: ThermalState) -> Option<TransitionReport> {
        let report = self.adapter.handle_signal(state)?;
        for stream_id in &report.evicted_streams {
            self.streams.remove(stream_id);
        }
        Some(report)
    }

    pub fn current_thermal_state(&self) -> ThermalState {
        self.adapter.current_state()
    }

    pub fn thermal_headroom(&self) -> f64 {
        self.adapter.thermal_headroom()
    }

    pub fn active_mitigations(&self) -> Vec<Mitigation> {
        self.adapter.active_mitigations()
    }

    pub fn predict_thermal_state(&self, after: Duration) -> ThermalState {
        self.adapter.predict_state(after)
    }

    // Synchronization

    /// Configure synchronization. Without an explicit tolerance the
    /// configured override, or one nominal frame period, applies.
    pub fn configure_synchronization<S: AsRef<str>>(
        &self,
        stream_ids: &[S],
        mode: SyncMode,
        tolerance: Option<Duration>,
    ) -> Result<()> {
        let tolerance = tolerance.or_else(|| self.config.sync.tolerance_ms.map(Duration::from_millis));
        self.synchronizer.configure(stream_ids, mode, tolerance)
    }

    pub fn process_frame(&self, frame: Frame) -> Result<Emission> {
        self.synchronizer.process_frame(frame)
    }

    pub fn synchronization_statistics(&self) -> SyncStatistics {
        self.synchronizer.statistics()
    }

    // Validation

    pub fn validate_configuration(&self, config: &CaptureConfiguration) -> ValidationReport {
        validate(config, &self.capabilities.capabilities())
    }

    pub fn fallback_configuration(&self, config: &CaptureConfiguration) -> CaptureConfiguration {
        fallback_configuration(config, &self.capabilities.capabilities())
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            thermal_state: self.adapter.current_state(),
            thermal_headroom: self.adapter.thermal_headroom(),
            predicted_state: self.adapter.predict_state(self.config.thermal.poll_interval()),
            power_saving: self.adapter.power_saving_enabled(),
            usage: self.allocator.current_usage(),
            scaled_budget: self.allocator.scaled_budget(),
            allocations: self.allocator.allocations(),
            active_mitigations: self.adapter.active_mitigations(),
            synchronization: self.synchronizer.statistics(),
        }
    }
}

/// Builder for [`CaptureCoordinator`]
pub struct CaptureCoordinatorBuilder {
    config: CoordinatorConfig,
    capabilities: Option<Arc<dyn CapabilityProvider>>,
    owner: Option<Arc<dyn StreamOwner>>,
    clock: Option<Arc<dyn ReferenceClock>>,
    health: Option<HealthRegistry>,
}

impl CaptureCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            capabilities: None,
            owner: None,
            clock: None,
            health: None,
        }
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Capability source; defaults to the capabilities in the config
    pub fn capabilities(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.capabilities = Some(provider);
        self
    }

    /// Platform layer that carries out mitigations
    pub fn owner(mut self, owner: Arc<dyn StreamOwner>) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Synchronization reference clock; defaults to a monotonic clock
    pub fn clock(mut self, clock: Arc<dyn ReferenceClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Build the coordinator and the receiving end of its event channel
    pub fn build(
        self,
    ) -> anyhow::Result<(CaptureCoordinator, mpsc::Receiver<CoordinatorEvent>)> {
        let owner = self
            .owner
            .ok_or_else(|| anyhow::anyhow!("Stream owner is required"))?;
        let capabilities = self.capabilities.unwrap_or_else(|| {
            Arc::new(StaticCapabilities(self.config.capabilities.clone()))
                as Arc<dyn CapabilityProvider>
        });
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()) as Arc<dyn ReferenceClock>);
        let config = self.config;

        let (events, rx) = EventSink::channel(config.event_buffer_size);
        let logger = StructuredLogger::new(config.device_name.clone());

        let allocator = Arc::new(
            ResourceAllocator::new(capabilities.capabilities().hardware_budget)
                .with_single_stream_ceiling(config.mitigation.single_stream_ceiling)
                .with_logger(logger.clone()),
        );
        let adapter = Arc::new(
            ThermalAdapter::new(
                allocator.clone(),
                owner,
                config.mitigation.clone(),
                config.thermal.history_capacity,
                config.thermal.prediction_window,
                events.clone(),
            )
            .with_logger(logger),
        );
        let synchronizer = FrameSynchronizer::new(clock, events)
            .with_nominal_frame_rate(config.sync.nominal_frame_rate)
            .with_buffer_depth(config.sync.buffer_depth);

        let coordinator = CaptureCoordinator {
            config,
            capabilities,
            allocator,
            adapter,
            synchronizer,
            streams: DashMap::new(),
            health: self.health.unwrap_or_default(),
        };
        Ok((coordinator, rx))
    }
}

impl Default for CaptureCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
