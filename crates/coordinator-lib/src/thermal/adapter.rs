//! Thermal adapter
//!
//! Reacts to thermal signals: records history, rescales the allocator's
//! budget and applies the mitigation plan for the new state. The state
//! lock guards the current state, the history and the active mitigation
//! set. Allocator changes are made under it; owner commands and consumer
//! notifications are queued and delivered after it is released. A
//! separate transition lock keeps plans from interleaving.

use super::plan::{predict_state, state_to_plan, Mitigation, MitigationAction, MitigationKind};
use super::{MitigationPlan, MitigationPolicy, ThermalHistory, ThermalSample, ThermalState};
use crate::allocator::ResourceAllocator;
use crate::events::{CoordinatorEvent, EventSink};
use crate::models::{Allocation, Feature, StreamProfile};
use crate::observability::{CoordinatorMetrics, StructuredLogger};
use crate::owner::{OwnerCommand, StreamOwner};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one state transition
#[derive(Debug, Clone)]
pub struct TransitionReport {
    pub from: ThermalState,
    pub to: ThermalState,
    pub plan: MitigationPlan,
    /// Streams touched by any mitigation, in first-touched order
    pub affected_streams: Vec<String>,
    pub evicted_streams: Vec<String>,
    /// Targets that could not be acted on
    pub skipped: usize,
}

#[derive(Debug)]
struct AdapterState {
    current: ThermalState,
    history: ThermalHistory,
    active: Vec<Mitigation>,
    power_saving: bool,
}

/// Accumulates the effects of one plan application
#[derive(Default)]
struct PlanOutcome {
    affected: Vec<String>,
    evicted: Vec<String>,
    skipped: usize,
    commands: Vec<(MitigationKind, OwnerCommand)>,
    events: Vec<CoordinatorEvent>,
}

impl PlanOutcome {
    fn touch(&mut self, stream_id: &str) {
        if !self.affected.iter().any(|s| s == stream_id) {
            self.affected.push(stream_id.to_string());
        }
    }

    fn command(&mut self, kind: MitigationKind, command: OwnerCommand) {
        self.commands.push((kind, command));
    }
}

/// Thermal state machine driving mitigations
pub struct ThermalAdapter {
    allocator: Arc<ResourceAllocator>,
    owner: Arc<dyn StreamOwner>,
    policy: MitigationPolicy,
    prediction_window: usize,
    transition: Mutex<()>,
    state: Mutex<AdapterState>,
    events: EventSink,
    metrics: CoordinatorMetrics,
    logger: StructuredLogger,
}

impl ThermalAdapter {
    pub fn new(
        allocator: Arc<ResourceAllocator>,
        owner: Arc<dyn StreamOwner>,
        policy: MitigationPolicy,
        history_capacity: usize,
        prediction_window: usize,
        events: EventSink,
    ) -> Self {
        let current = allocator.thermal_state();
        Self {
            allocator,
            owner,
            policy,
            prediction_window,
            transition: Mutex::new(()),
            state: Mutex::new(AdapterState {
                current,
                history: ThermalHistory::new(history_capacity),
                active: Vec::new(),
                power_saving: false,
            }),
            events,
            metrics: CoordinatorMetrics::new(),
            logger: StructuredLogger::new("thermal"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    fn lock(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Feed a pushed severity. Returns `None` when it equals the current
    /// state; such signals are not recorded.
    pub fn handle_signal(&self, signal: ThermalState) -> Option<TransitionReport> {
        self.apply_signal(signal, false)
    }

    /// Feed a polled sample. Every sample lands in the history, repeats
    /// included, so prediction sees how long a state has been held. Only a
    /// change of state triggers a transition.
    pub fn observe(&self, sample: ThermalState) -> Option<TransitionReport> {
        self.apply_signal(sample, true)
    }

    fn apply_signal(&self, signal: ThermalState, record_repeat: bool) -> Option<TransitionReport> {
        let _transition = self.transition.lock().unwrap_or_else(|e| e.into_inner());

        let (from, now, plan, mut outcome) = {
            let mut state = self.lock();
            let now = chrono::Utc::now().timestamp_millis();
            if state.current == signal {
                if record_repeat {
                    state.history.push(signal, now);
                }
                return None;
            }

            let from = state.current;
            state.current = signal;
            state.history.push(signal, now);

            self.allocator.set_thermal_state(signal);
            self.metrics.set_thermal_state(signal);
            self.metrics.inc_thermal_transitions();
            self.logger
                .log_thermal_transition(from, signal, signal.headroom());

            let plan = state_to_plan(signal, &self.policy);
            let mut outcome = PlanOutcome::default();
            outcome.events.push(CoordinatorEvent::ThermalStateChanged {
                from,
                to: signal,
                at: now,
            });

            self.apply_plan(&mut state, &plan, &mut outcome);
            (from, now, plan, outcome)
        };

        self.dispatch(&mut outcome);

        let over = self.allocator.over_committed();
        if !over.is_empty() {
            warn!(
                state = %signal,
                dimensions = ?over,
                "Usage still exceeds the scaled budget after mitigation"
            );
        }
        debug!(state = %signal, at = now, commands_skipped = outcome.skipped, "Transition applied");

        outcome.events.push(CoordinatorEvent::MitigationApplied {
            state: signal,
            mitigations: plan.mitigations.clone(),
            affected_streams: outcome.affected.clone(),
        });
        for event in outcome.events.drain(..) {
            self.events.emit(event);
        }

        Some(TransitionReport {
            from,
            to: signal,
            plan,
            affected_streams: outcome.affected,
            evicted_streams: outcome.evicted,
            skipped: outcome.skipped,
        })
    }

    fn apply_plan(&self, state: &mut AdapterState, plan: &MitigationPlan, outcome: &mut PlanOutcome) {
        for mitigation in &plan.mitigations {
            let kind = mitigation.kind();
            state.active.retain(|a| a.kind() != kind);

            let before = outcome.affected.len();
            let targets = self.execute(state, plan.state, mitigation, outcome);
            debug!(
                action = %kind,
                targets = targets,
                newly_affected = outcome.affected.len() - before,
                "Mitigation applied"
            );
            self.metrics.inc_mitigation_applied(&kind.to_string());
            state.active.push(mitigation.clone());
        }

        // Kinds the new plan does not mention no longer apply
        let retired: Vec<MitigationKind> = state
            .active
            .iter()
            .map(|a| a.kind())
            .filter(|k| !plan.contains_kind(*k))
            .collect();
        if retired.is_empty() {
            return;
        }
        state.active.retain(|a| plan.contains_kind(a.kind()));

        if retired.contains(&MitigationKind::EnablePowerSaving) && state.power_saving {
            outcome.command(
                MitigationKind::EnablePowerSaving,
                OwnerCommand::SetPowerSavingMode { enabled: false },
            );
        }
        info!(retired = ?retired, state = %plan.state, "Retired mitigations");
    }

    /// Run one mitigation against the allocator, queueing the owner
    /// commands it implies. Returns how many streams it targeted.
    fn execute(
        &self,
        state: &AdapterState,
        thermal: ThermalState,
        mitigation: &Mitigation,
        outcome: &mut PlanOutcome,
    ) -> usize {
        let kind = mitigation.kind();
        let targets: Vec<Allocation> = self
            .allocator
            .allocations()
            .into_iter()
            .filter(|a| mitigation.applies_to(a.profile.priority))
            .collect();

        match &mitigation.action {
            MitigationAction::DisableStreams => {
                let mut hit = 0;
                for allocation in targets {
                    let stream_id = allocation.profile.stream_id.clone();
                    if self.allocator.release_allocation(allocation.id).is_none() {
                        self.skip(outcome, kind, &stream_id, "allocation already released");
                        continue;
                    }

                    self.metrics.inc_streams_evicted();
                    self.logger.log_stream_evicted(
                        &stream_id,
                        &allocation.profile.priority.to_string(),
                        thermal,
                    );
                    outcome.touch(&stream_id);
                    outcome.evicted.push(stream_id.clone());
                    outcome.events.push(CoordinatorEvent::StreamEvicted {
                        stream_id: stream_id.clone(),
                        allocation_id: allocation.id,
                        priority: allocation.profile.priority,
                        state: thermal,
                    });
                    outcome.command(kind, OwnerCommand::DisableStream { stream_id });
                    hit += 1;
                }
                hit
            }
            MitigationAction::ReduceFrameRate { target_fps } => {
                let mut hit = 0;
                for allocation in targets {
                    if allocation.profile.frame_rate <= *target_fps {
                        continue;
                    }
                    let profile = StreamProfile {
                        frame_rate: *target_fps,
                        ..allocation.profile.clone()
                    };
                    if self.reprofile(outcome, kind, &allocation, profile) {
                        outcome.command(
                            kind,
                            OwnerCommand::SetFrameRate {
                                stream_id: allocation.profile.stream_id.clone(),
                                fps: *target_fps,
                            },
                        );
                        hit += 1;
                    }
                }
                hit
            }
            MitigationAction::ReduceResolution { factor } => {
                let mut hit = 0;
                for allocation in targets {
                    let reduced = allocation.profile.resolution.scaled_down(*factor);
                    if reduced >= allocation.profile.resolution {
                        continue;
                    }
                    let profile = StreamProfile {
                        resolution: reduced,
                        ..allocation.profile.clone()
                    };
                    if self.reprofile(outcome, kind, &allocation, profile) {
                        outcome.command(
                            kind,
                            OwnerCommand::SetResolution {
                                stream_id: allocation.profile.stream_id.clone(),
                                resolution: reduced,
                            },
                        );
                        hit += 1;
                    }
                }
                hit
            }
            MitigationAction::DisableFeatures { features } => {
                let mut hit = 0;
                for allocation in targets {
                    let enabled: Vec<Feature> = features
                        .iter()
                        .copied()
                        .filter(|f| allocation.profile.features.contains(*f))
                        .collect();
                    if enabled.is_empty() {
                        continue;
                    }
                    let mut profile = allocation.profile.clone();
                    for feature in &enabled {
                        profile.features.set(*feature, false);
                    }
                    if self.reprofile(outcome, kind, &allocation, profile) {
                        for feature in enabled {
                            outcome.command(
                                kind,
                                OwnerCommand::SetFeatureEnabled {
                                    stream_id: allocation.profile.stream_id.clone(),
                                    feature,
                                    enabled: false,
                                },
                            );
                        }
                        hit += 1;
                    }
                }
                hit
            }
            MitigationAction::EnablePowerSaving => {
                if !state.power_saving {
                    outcome.command(kind, OwnerCommand::SetPowerSavingMode { enabled: true });
                }
                0
            }
        }
    }

    /// Commit a reduced profile to the allocator; false if the stream is gone
    fn reprofile(
        &self,
        outcome: &mut PlanOutcome,
        kind: MitigationKind,
        allocation: &Allocation,
        profile: StreamProfile,
    ) -> bool {
        let stream_id = &allocation.profile.stream_id;
        match self.allocator.update_allocation(allocation.id, profile) {
            Ok(_) => {
                outcome.touch(stream_id);
                true
            }
            Err(e) => {
                self.skip(outcome, kind, stream_id, &e.to_string());
                false
            }
        }
    }

    /// Deliver queued owner commands. A refused command is counted as
    /// skipped; the allocator change behind it stands.
    fn dispatch(&self, outcome: &mut PlanOutcome) {
        for (kind, command) in std::mem::take(&mut outcome.commands) {
            match command.send_to(self.owner.as_ref()) {
                Ok(()) => {
                    if let OwnerCommand::SetPowerSavingMode { enabled } = command {
                        self.lock().power_saving = enabled;
                    }
                }
                Err(e) => {
                    let stream_id = command.stream_id().unwrap_or_default();
                    self.skip(outcome, kind, stream_id, &e.to_string());
                }
            }
        }
    }

    fn skip(&self, outcome: &mut PlanOutcome, kind: MitigationKind, stream_id: &str, reason: &str) {
        outcome.skipped += 1;
        self.metrics.inc_mitigation_skipped();
        self.logger
            .log_mitigation_skipped(&kind.to_string(), stream_id, reason);
    }

    pub fn current_state(&self) -> ThermalState {
        self.lock().current
    }

    /// Budget fraction available at the current state
    pub fn thermal_headroom(&self) -> f64 {
        self.current_state().headroom()
    }

    /// Mitigations in force, in application order
    pub fn active_mitigations(&self) -> Vec<Mitigation> {
        self.lock().active.clone()
    }

    pub fn power_saving_enabled(&self) -> bool {
        self.lock().power_saving
    }

    pub fn history(&self) -> Vec<ThermalSample> {
        self.lock().history.to_vec()
    }

    /// Predicted state after `after`. The heuristic only looks at the most
    /// recent samples; the horizon is informational.
    pub fn predict_state(&self, after: Duration) -> ThermalState {
        let predicted = predict_state(&self.lock().history, self.prediction_window);
        debug!(horizon_ms = after.as_millis() as u64, predicted = %predicted, "Thermal prediction");
        predicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, ResolutionClass, ResourceVector};
    use crate::owner::RecordingStreamOwner;
    use crate::thermal::{DEFAULT_HISTORY_CAPACITY, DEFAULT_PREDICTION_WINDOW};
    use std::sync::{OnceLock, Weak};

    fn allocator() -> Arc<ResourceAllocator> {
        Arc::new(ResourceAllocator::new(ResourceVector {
            bandwidth_mbps: 10_000.0,
            memory_bytes: 4 * 1024 * 1024 * 1024,
            cpu_percent: 400.0,
            gpu_percent: 400.0,
            power_mw: 10_000.0,
        }))
    }

    fn adapter_with(allocator: Arc<ResourceAllocator>, owner: Arc<dyn StreamOwner>) -> ThermalAdapter {
        ThermalAdapter::new(
            allocator,
            owner,
            MitigationPolicy::default(),
            DEFAULT_HISTORY_CAPACITY,
            DEFAULT_PREDICTION_WINDOW,
            EventSink::disabled(),
        )
    }

    fn setup() -> (Arc<ResourceAllocator>, Arc<RecordingStreamOwner>, ThermalAdapter) {
        let allocator = allocator();
        let owner = Arc::new(RecordingStreamOwner::new());
        let adapter = adapter_with(allocator.clone(), owner.clone());
        (allocator, owner, adapter)
    }

    /// Records, per call, whether the adapter state could be locked
    #[derive(Default)]
    struct LockCheckingOwner {
        adapter: OnceLock<Weak<ThermalAdapter>>,
        state_free: Mutex<Vec<bool>>,
    }

    impl LockCheckingOwner {
        fn check(&self) -> anyhow::Result<()> {
            let free = self
                .adapter
                .get()
                .and_then(Weak::upgrade)
                .map(|adapter| adapter.state.try_lock().is_ok())
                .unwrap_or(false);
            self.state_free.lock().unwrap().push(free);
            Ok(())
        }
    }

    impl StreamOwner for LockCheckingOwner {
        fn set_frame_rate(&self, _: &str, _: u32) -> anyhow::Result<()> {
            self.check()
        }

        fn set_resolution(&self, _: &str, _: ResolutionClass) -> anyhow::Result<()> {
            self.check()
        }

        fn disable_stream(&self, _: &str) -> anyhow::Result<()> {
            self.check()
        }

        fn set_feature_enabled(&self, _: &str, _: Feature, _: bool) -> anyhow::Result<()> {
            self.check()
        }

        fn set_power_saving_mode(&self, _: bool) -> anyhow::Result<()> {
            self.check()
        }
    }

    #[test]
    fn test_same_state_is_not_a_transition() {
        let (_, _, adapter) = setup();
        assert!(adapter.handle_signal(ThermalState::Nominal).is_none());
        assert!(adapter.history().is_empty());
    }

    #[test]
    fn test_transition_records_history_and_scales_budget() {
        let (allocator, _, adapter) = setup();
        let report = adapter.handle_signal(ThermalState::Serious).unwrap();

        assert_eq!(report.from, ThermalState::Nominal);
        assert_eq!(adapter.current_state(), ThermalState::Serious);
        assert_eq!(allocator.thermal_state(), ThermalState::Serious);
        assert!((adapter.thermal_headroom() - 0.3).abs() < f64::EPSILON);
        assert_eq!(adapter.history().len(), 1);
    }

    #[test]
    fn test_fair_throttles_and_strips_features() {
        let (allocator, owner, adapter) = setup();
        let low = allocator
            .request_allocation(
                StreamProfile::new("aux", Priority::Low, ResolutionClass::Hd720, 30)
                    .with_feature(Feature::Hdr),
            )
            .unwrap();
        allocator
            .request_allocation(StreamProfile::new(
                "main",
                Priority::High,
                ResolutionClass::FullHd1080,
                30,
            ))
            .unwrap();

        let report = adapter.handle_signal(ThermalState::Fair).unwrap();
        assert_eq!(report.affected_streams, vec!["aux".to_string()]);

        let aux = allocator.allocation(low).unwrap();
        assert_eq!(aux.profile.frame_rate, 24);
        assert!(!aux.profile.features.hdr);

        let commands = owner.commands();
        assert!(commands.contains(&OwnerCommand::SetFrameRate {
            stream_id: "aux".to_string(),
            fps: 24
        }));
        assert!(commands.contains(&OwnerCommand::SetFeatureEnabled {
            stream_id: "aux".to_string(),
            feature: Feature::Hdr,
            enabled: false
        }));
        assert!(!commands.iter().any(|c| matches!(
            c,
            OwnerCommand::SetFrameRate { stream_id, .. } if stream_id == "main"
        )));
    }

    #[test]
    fn test_skipped_target_is_logged_not_fatal() {
        let (allocator, owner, adapter) = setup();
        allocator
            .request_allocation(StreamProfile::new("aux", Priority::Low, ResolutionClass::Hd720, 30))
            .unwrap();
        owner.refuse("aux");

        let report = adapter.handle_signal(ThermalState::Fair).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(adapter.current_state(), ThermalState::Fair);
    }

    #[test]
    fn test_predict_through_adapter() {
        let (_, _, adapter) = setup();
        for _ in 0..3 {
            adapter.handle_signal(ThermalState::Critical);
            adapter.handle_signal(ThermalState::Serious);
        }
        adapter.handle_signal(ThermalState::Fair);
        // 3 critical, 3 serious, last fair
        assert_eq!(
            adapter.predict_state(Duration::from_secs(30)),
            ThermalState::Fair
        );
    }

    #[test]
    fn test_repeated_samples_feed_prediction() {
        let (_, _, adapter) = setup();
        assert!(adapter.observe(ThermalState::Critical).is_some());
        for _ in 0..5 {
            assert!(adapter.observe(ThermalState::Critical).is_none());
        }
        assert!(adapter.observe(ThermalState::Fair).is_some());
        for _ in 0..3 {
            adapter.observe(ThermalState::Fair);
        }

        // 6 of the last 10 samples are critical
        assert_eq!(adapter.history().len(), 10);
        assert_eq!(adapter.current_state(), ThermalState::Fair);
        assert_eq!(
            adapter.predict_state(Duration::from_secs(30)),
            ThermalState::Critical
        );
    }

    #[test]
    fn test_owner_runs_outside_state_lock() {
        let allocator = allocator();
        let owner = Arc::new(LockCheckingOwner::default());
        let adapter = Arc::new(adapter_with(allocator.clone(), owner.clone()));
        owner.adapter.set(Arc::downgrade(&adapter)).unwrap();

        allocator
            .request_allocation(StreamProfile::new("aux", Priority::Low, ResolutionClass::Hd720, 30))
            .unwrap();
        allocator
            .request_allocation(
                StreamProfile::new("main", Priority::High, ResolutionClass::FullHd1080, 30)
                    .with_feature(Feature::Hdr),
            )
            .unwrap();

        let report = adapter.handle_signal(ThermalState::Critical).unwrap();
        assert_eq!(report.skipped, 0);
        assert!(adapter.power_saving_enabled());

        let state_free = owner.state_free.lock().unwrap().clone();
        assert!(state_free.len() >= 3);
        assert!(state_free.iter().all(|free| *free));
    }
}
