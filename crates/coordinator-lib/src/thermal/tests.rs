//! Transition scenarios across the adapter, allocator and stream owner

use super::*;
use crate::allocator::ResourceAllocator;
use crate::events::{CoordinatorEvent, EventSink};
use crate::models::{Feature, Priority, ResolutionClass, ResourceVector, StreamProfile};
use crate::owner::{OwnerCommand, RecordingStreamOwner};
use std::sync::Arc;

struct Harness {
    allocator: Arc<ResourceAllocator>,
    owner: Arc<RecordingStreamOwner>,
    adapter: ThermalAdapter,
    events: tokio::sync::mpsc::Receiver<CoordinatorEvent>,
}

fn harness() -> Harness {
    let allocator = Arc::new(ResourceAllocator::new(ResourceVector {
        bandwidth_mbps: 20_000.0,
        memory_bytes: 8 * 1024 * 1024 * 1024,
        cpu_percent: 800.0,
        gpu_percent: 800.0,
        power_mw: 20_000.0,
    }));
    let owner = Arc::new(RecordingStreamOwner::new());
    let (sink, events) = EventSink::channel(64);
    let adapter = ThermalAdapter::new(
        allocator.clone(),
        owner.clone(),
        MitigationPolicy::default(),
        DEFAULT_HISTORY_CAPACITY,
        DEFAULT_PREDICTION_WINDOW,
        sink,
    );
    Harness {
        allocator,
        owner,
        adapter,
        events,
    }
}

fn admit_one_of_each(allocator: &ResourceAllocator) {
    for (id, priority) in [
        ("preview", Priority::Low),
        ("analysis", Priority::Medium),
        ("record", Priority::High),
        ("safety", Priority::Essential),
    ] {
        allocator
            .request_allocation(
                StreamProfile::new(id, priority, ResolutionClass::FullHd1080, 30)
                    .with_feature(Feature::Hdr),
            )
            .unwrap();
    }
}

fn drain(rx: &mut tokio::sync::mpsc::Receiver<CoordinatorEvent>) -> Vec<CoordinatorEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn active_kinds(adapter: &ThermalAdapter) -> Vec<MitigationKind> {
    adapter.active_mitigations().iter().map(|m| m.kind()).collect()
}

#[test]
fn test_nominal_to_critical_keeps_only_essential() {
    let mut h = harness();
    admit_one_of_each(&h.allocator);

    let report = h.adapter.handle_signal(ThermalState::Critical).unwrap();

    assert_eq!(report.evicted_streams.len(), 3);
    let remaining = h.allocator.allocations();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].profile.stream_id, "safety");
    assert_eq!(remaining[0].profile.frame_rate, 10);
    assert!(h.adapter.power_saving_enabled());

    let commands = h.owner.commands();
    for evicted in ["preview", "analysis", "record"] {
        assert!(commands.contains(&OwnerCommand::DisableStream {
            stream_id: evicted.to_string()
        }));
    }
    assert!(commands.contains(&OwnerCommand::SetPowerSavingMode { enabled: true }));

    let events = drain(&mut h.events);
    assert!(matches!(
        events.first(),
        Some(CoordinatorEvent::ThermalStateChanged {
            from: ThermalState::Nominal,
            to: ThermalState::Critical,
            ..
        })
    ));
    let evictions = events
        .iter()
        .filter(|e| matches!(e, CoordinatorEvent::StreamEvicted { .. }))
        .count();
    assert_eq!(evictions, 3);
    assert!(matches!(
        events.last(),
        Some(CoordinatorEvent::MitigationApplied { state: ThermalState::Critical, .. })
    ));
}

#[test]
fn test_same_kind_is_superseded() {
    let h = harness();
    admit_one_of_each(&h.allocator);

    h.adapter.handle_signal(ThermalState::Fair);
    assert_eq!(
        active_kinds(&h.adapter),
        vec![MitigationKind::ReduceFrameRate, MitigationKind::DisableFeatures]
    );

    h.adapter.handle_signal(ThermalState::Serious);
    assert_eq!(
        active_kinds(&h.adapter),
        vec![
            MitigationKind::DisableStreams,
            MitigationKind::ReduceFrameRate,
            MitigationKind::ReduceResolution
        ]
    );

    let frame_rate_caps: Vec<_> = h
        .adapter
        .active_mitigations()
        .into_iter()
        .filter_map(|m| match m.action {
            MitigationAction::ReduceFrameRate { target_fps } => Some(target_fps),
            _ => None,
        })
        .collect();
    assert_eq!(frame_rate_caps, vec![15]);
}

#[test]
fn test_serious_reduces_survivors() {
    let h = harness();
    admit_one_of_each(&h.allocator);

    h.adapter.handle_signal(ThermalState::Serious);

    let remaining = h.allocator.allocations();
    assert_eq!(remaining.len(), 2);
    for allocation in remaining {
        assert!(allocation.profile.priority >= Priority::High);
        assert_eq!(allocation.profile.frame_rate, 15);
        assert_eq!(allocation.profile.resolution, ResolutionClass::Hd720);
    }
}

#[test]
fn test_recovery_retires_everything() {
    let h = harness();
    admit_one_of_each(&h.allocator);

    h.adapter.handle_signal(ThermalState::Critical);
    h.owner.clear();

    let report = h.adapter.handle_signal(ThermalState::Nominal).unwrap();
    assert!(report.plan.is_empty());
    assert!(h.adapter.active_mitigations().is_empty());
    assert!(!h.adapter.power_saving_enabled());
    assert_eq!(
        h.owner.commands(),
        vec![OwnerCommand::SetPowerSavingMode { enabled: false }]
    );
    assert!((h.allocator.thermal_headroom() - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_mitigations_never_raise_usage() {
    let h = harness();
    admit_one_of_each(&h.allocator);

    let mut previous = h.allocator.current_usage();
    for state in [
        ThermalState::Fair,
        ThermalState::Serious,
        ThermalState::Critical,
    ] {
        h.adapter.handle_signal(state);
        let usage = h.allocator.current_usage();
        assert!(usage.is_reduction_of(&previous));
        previous = usage;
    }
}

#[test]
fn test_refused_eviction_still_releases() {
    let h = harness();
    admit_one_of_each(&h.allocator);
    h.owner.refuse("preview");

    let report = h.adapter.handle_signal(ThermalState::Critical).unwrap();

    assert!(report.skipped >= 1);
    assert!(report.evicted_streams.contains(&"preview".to_string()));
    assert!(!h
        .allocator
        .allocations()
        .iter()
        .any(|a| a.profile.stream_id == "preview"));
}

#[test]
fn test_admission_after_transition_uses_scaled_budget() {
    let h = harness();
    h.adapter.handle_signal(ThermalState::Critical);

    let scaled = h.allocator.scaled_budget();
    let budget = h.allocator.hardware_budget();
    assert!((scaled.bandwidth_mbps - budget.bandwidth_mbps * 0.1).abs() < 1e-6);
}
