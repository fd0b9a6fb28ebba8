//! Observability infrastructure for the capture coordinator
//!
//! Provides:
//! - Prometheus metrics (admissions, thermal transitions, mitigations, sync output)
//! - Structured logging of coordinator events with tracing

use crate::models::{ResourceDimension, ResourceVector};
use crate::thermal::ThermalState;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for absolute drift (in seconds)
const DRIFT_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.02, 0.033, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CoordinatorMetricsInner> = OnceLock::new();

struct CoordinatorMetricsInner {
    allocations_active: IntGauge,
    admissions_total: IntCounterVec,
    resource_usage: GaugeVec,
    thermal_state: IntGauge,
    thermal_transitions: IntCounter,
    mitigations_applied: IntCounterVec,
    mitigations_skipped: IntCounter,
    streams_evicted: IntCounter,
    synchronized_sets: IntCounter,
    frames_emitted: IntCounter,
    frames_dropped: IntCounter,
    timestamp_corrections: IntCounter,
    drift_seconds: Histogram,
    events_dropped: IntCounter,
}

impl CoordinatorMetricsInner {
    fn new() -> Self {
        Self {
            allocations_active: register_int_gauge!(
                "capture_coordinator_allocations_active",
                "Number of streams currently holding an allocation"
            )
            .expect("Failed to register allocations_active"),

            admissions_total: register_int_counter_vec!(
                "capture_coordinator_admissions_total",
                "Admission decisions by outcome",
                &["outcome"]
            )
            .expect("Failed to register admissions_total"),

            resource_usage: register_gauge_vec!(
                "capture_coordinator_resource_usage",
                "Committed resource usage per dimension",
                &["dimension"]
            )
            .expect("Failed to register resource_usage"),

            thermal_state: register_int_gauge!(
                "capture_coordinator_thermal_state",
                "Current thermal severity (0=nominal, 3=critical)"
            )
            .expect("Failed to register thermal_state"),

            thermal_transitions: register_int_counter!(
                "capture_coordinator_thermal_transitions_total",
                "Thermal state transitions observed"
            )
            .expect("Failed to register thermal_transitions"),

            mitigations_applied: register_int_counter_vec!(
                "capture_coordinator_mitigations_applied_total",
                "Mitigations applied by action",
                &["action"]
            )
            .expect("Failed to register mitigations_applied"),

            mitigations_skipped: register_int_counter!(
                "capture_coordinator_mitigations_skipped_total",
                "Mitigation targets that could not be applied"
            )
            .expect("Failed to register mitigations_skipped"),

            streams_evicted: register_int_counter!(
                "capture_coordinator_streams_evicted_total",
                "Streams released by thermal mitigation"
            )
            .expect("Failed to register streams_evicted"),

            synchronized_sets: register_int_counter!(
                "capture_coordinator_synchronized_sets_total",
                "Aligned frame sets emitted"
            )
            .expect("Failed to register synchronized_sets"),

            frames_emitted: register_int_counter!(
                "capture_coordinator_frames_emitted_total",
                "Frames emitted by the synchronizer"
            )
            .expect("Failed to register frames_emitted"),

            frames_dropped: register_int_counter!(
                "capture_coordinator_frames_dropped_total",
                "Frames dropped on buffer overflow"
            )
            .expect("Failed to register frames_dropped"),

            timestamp_corrections: register_int_counter!(
                "capture_coordinator_timestamp_corrections_total",
                "Frames whose presentation timestamp was corrected"
            )
            .expect("Failed to register timestamp_corrections"),

            drift_seconds: register_histogram!(
                "capture_coordinator_drift_seconds",
                "Absolute drift between frame timestamps and the reference clock",
                DRIFT_BUCKETS.to_vec()
            )
            .expect("Failed to register drift_seconds"),

            events_dropped: register_int_counter!(
                "capture_coordinator_events_dropped_total",
                "Notifications dropped because the consumer fell behind"
            )
            .expect("Failed to register events_dropped"),
        }
    }
}

/// Coordinator metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct CoordinatorMetrics {
    _private: (),
}

impl Default for CoordinatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CoordinatorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CoordinatorMetricsInner {
        GLOBAL_METRICS.get_or_init(CoordinatorMetricsInner::new)
    }

    pub fn record_admission(&self, outcome: &str) {
        self.inner()
            .admissions_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Refresh allocation count and per-dimension usage
    pub fn set_usage(&self, allocations: usize, usage: &ResourceVector) {
        let inner = self.inner();
        inner.allocations_active.set(allocations as i64);
        for dimension in ResourceDimension::ALL {
            inner
                .resource_usage
                .with_label_values(&[&dimension.to_string()])
                .set(usage.get(dimension));
        }
    }

    pub fn set_thermal_state(&self, state: ThermalState) {
        self.inner().thermal_state.set(state.severity() as i64);
    }

    pub fn inc_thermal_transitions(&self) {
        self.inner().thermal_transitions.inc();
    }

    pub fn inc_mitigation_applied(&self, action: &str) {
        self.inner()
            .mitigations_applied
            .with_label_values(&[action])
            .inc();
    }

    pub fn inc_mitigation_skipped(&self) {
        self.inner().mitigations_skipped.inc();
    }

    pub fn inc_streams_evicted(&self) {
        self.inner().streams_evicted.inc();
    }

    pub fn inc_synchronized_sets(&self) {
        self.inner().synchronized_sets.inc();
    }

    pub fn add_frames_emitted(&self, count: u64) {
        self.inner().frames_emitted.inc_by(count);
    }

    pub fn inc_frames_dropped(&self) {
        self.inner().frames_dropped.inc();
    }

    pub fn inc_timestamp_corrections(&self) {
        self.inner().timestamp_corrections.inc();
    }

    pub fn observe_drift(&self, drift_secs: f64) {
        self.inner().drift_seconds.observe(drift_secs.abs());
    }

    pub fn inc_events_dropped(&self) {
        self.inner().events_dropped.inc();
    }
}

/// Structured logger for coordinator events
///
/// Every record carries a stable `event` field so log pipelines can
/// filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    device: String,
}

impl StructuredLogger {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }

    pub fn log_admission_rejected(&self, stream_id: &str, reason: &str, details: &str) {
        info!(
            event = "admission_rejected",
            device = %self.device,
            stream_id = %stream_id,
            reason = %reason,
            details = %details,
            "Stream admission rejected"
        );
    }

    pub fn log_thermal_transition(&self, from: ThermalState, to: ThermalState, headroom: f64) {
        if to > from {
            warn!(
                event = "thermal_transition",
                device = %self.device,
                from = %from,
                to = %to,
                headroom = headroom,
                "Thermal state escalated"
            );
        } else {
            info!(
                event = "thermal_transition",
                device = %self.device,
                from = %from,
                to = %to,
                headroom = headroom,
                "Thermal state recovered"
            );
        }
    }

    pub fn log_stream_evicted(&self, stream_id: &str, priority: &str, state: ThermalState) {
        warn!(
            event = "stream_evicted",
            device = %self.device,
            stream_id = %stream_id,
            priority = %priority,
            state = %state,
            "Stream evicted by thermal mitigation"
        );
    }

    pub fn log_mitigation_skipped(&self, action: &str, stream_id: &str, reason: &str) {
        warn!(
            event = "mitigation_skipped",
            device = %self.device,
            action = %action,
            stream_id = %stream_id,
            reason = %reason,
            "Mitigation target skipped"
        );
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "coordinator_started",
            device = %self.device,
            version = %version,
            "Capture coordinator started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "coordinator_shutdown",
            device = %self.device,
            reason = %reason,
            "Capture coordinator shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handles_share_registry() {
        let a = CoordinatorMetrics::new();
        let b = a.clone();
        a.record_admission("accepted");
        b.record_admission("accepted");
        a.set_thermal_state(ThermalState::Serious);
        b.observe_drift(-0.012);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "capture_coordinator_admissions_total"));
    }

    #[test]
    fn test_structured_logger_does_not_panic() {
        let logger = StructuredLogger::new("test-device");
        logger.log_admission_rejected("back", "insufficient_resources", "bandwidth");
        logger.log_thermal_transition(ThermalState::Nominal, ThermalState::Critical, 0.1);
        logger.log_thermal_transition(ThermalState::Critical, ThermalState::Fair, 0.7);
        logger.log_stream_evicted("aux", "low", ThermalState::Critical);
        logger.log_mitigation_skipped("disable_streams", "gone", "allocation not found");
        logger.log_startup("0.1.0");
        logger.log_shutdown("test");
    }
}
