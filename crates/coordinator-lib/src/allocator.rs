//! Admission control over the shared resource budget
//!
//! The allocator owns the allocation table. Every mutation happens under a
//! single mutex together with the current thermal state, so the budget
//! check and the insert it guards are atomic. The invariant is that, per
//! dimension, the sum of live allocations never exceeds the thermally
//! scaled budget at admission time; it is enforced by rejecting requests,
//! never by over-committing.

use crate::error::{CoordinatorError, Result};
use crate::estimate::estimate;
use crate::models::{Allocation, AllocationId, ResourceDimension, ResourceVector, StreamProfile};
use crate::observability::{CoordinatorMetrics, StructuredLogger};
use crate::thermal::ThermalState;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Default share of any dimension a single stream may take above Nominal
pub const DEFAULT_SINGLE_STREAM_CEILING: f64 = 0.8;

/// State protected by the allocator lock
#[derive(Debug, Default)]
struct AllocationTable {
    allocations: BTreeMap<AllocationId, Allocation>,
    thermal_state: ThermalState,
}

impl AllocationTable {
    fn usage(&self) -> ResourceVector {
        self.allocations.values().map(|a| a.resources).sum()
    }

    fn usage_excluding(&self, id: AllocationId) -> ResourceVector {
        self.allocations
            .values()
            .filter(|a| a.id != id)
            .map(|a| a.resources)
            .sum()
    }
}

/// Resource allocator for concurrently active streams
pub struct ResourceAllocator {
    hardware_budget: ResourceVector,
    single_stream_ceiling: f64,
    table: Mutex<AllocationTable>,
    next_id: AtomicU64,
    metrics: CoordinatorMetrics,
    logger: StructuredLogger,
}

impl ResourceAllocator {
    pub fn new(hardware_budget: ResourceVector) -> Self {
        Self {
            hardware_budget,
            single_stream_ceiling: DEFAULT_SINGLE_STREAM_CEILING,
            table: Mutex::new(AllocationTable::default()),
            next_id: AtomicU64::new(1),
            metrics: CoordinatorMetrics::new(),
            logger: StructuredLogger::new("allocator"),
        }
    }

    /// Override the per-stream ceiling applied above Nominal
    pub fn with_single_stream_ceiling(mut self, ceiling: f64) -> Self {
        self.single_stream_ceiling = ceiling.clamp(0.0, 1.0);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    fn lock(&self) -> MutexGuard<'_, AllocationTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit a stream, returning its allocation id.
    pub fn request_allocation(&self, profile: StreamProfile) -> Result<AllocationId> {
        let stream_id = profile.stream_id.clone();
        let result = self.admit(profile);

        match &result {
            Ok(id) => {
                self.metrics.record_admission("accepted");
                debug!(stream_id = %stream_id, allocation_id = %id, "Stream admitted");
            }
            Err(e) => {
                self.metrics.record_admission(e.kind());
                self.logger
                    .log_admission_rejected(&stream_id, e.kind(), &e.to_string());
            }
        }

        result
    }

    fn admit(&self, profile: StreamProfile) -> Result<AllocationId> {
        let required = estimate(&profile);

        let mut table = self.lock();
        let budget = self.budget_for(table.thermal_state);

        self.check_stream_ceiling(&profile.stream_id, &required, table.thermal_state, &budget)?;
        Self::check_budget(&profile.stream_id, &table.usage(), &required, &budget)?;

        let id = AllocationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let now = chrono::Utc::now().timestamp();
        table.allocations.insert(
            id,
            Allocation {
                id,
                profile,
                resources: required,
                created_at: now,
                updated_at: now,
            },
        );

        self.publish(&table);
        Ok(id)
    }

    /// Remove an allocation. Releasing an unknown id is a no-op.
    pub fn release_allocation(&self, id: AllocationId) -> Option<Allocation> {
        let mut table = self.lock();
        let removed = table.allocations.remove(&id);
        if let Some(allocation) = &removed {
            debug!(
                stream_id = %allocation.profile.stream_id,
                allocation_id = %id,
                "Allocation released"
            );
            self.publish(&table);
        }
        removed
    }

    /// Replace the profile of a live allocation.
    ///
    /// The new vector is checked against the budget less the allocation's
    /// current share. On rejection the allocation is unchanged. Updates that
    /// shrink every dimension always commit.
    pub fn update_allocation(&self, id: AllocationId, profile: StreamProfile) -> Result<Allocation> {
        let required = estimate(&profile);

        let mut table = self.lock();
        let current = table
            .allocations
            .get(&id)
            .ok_or(CoordinatorError::AllocationNotFound(id))?
            .resources;

        if !required.is_reduction_of(&current) {
            let budget = self.budget_for(table.thermal_state);
            self.check_stream_ceiling(&profile.stream_id, &required, table.thermal_state, &budget)?;
            Self::check_budget(&profile.stream_id, &table.usage_excluding(id), &required, &budget)?;
        }

        let updated = {
            let allocation = table
                .allocations
                .get_mut(&id)
                .ok_or(CoordinatorError::AllocationNotFound(id))?;
            allocation.profile = profile;
            allocation.resources = required;
            allocation.updated_at = chrono::Utc::now().timestamp();
            allocation.clone()
        };

        self.publish(&table);
        Ok(updated)
    }

    /// Sum of all live allocations
    pub fn current_usage(&self) -> ResourceVector {
        self.lock().usage()
    }

    pub fn allocation(&self, id: AllocationId) -> Result<Allocation> {
        self.lock()
            .allocations
            .get(&id)
            .cloned()
            .ok_or(CoordinatorError::AllocationNotFound(id))
    }

    /// Snapshot of the allocation table, ordered by id
    pub fn allocations(&self) -> Vec<Allocation> {
        self.lock().allocations.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().allocations.is_empty()
    }

    pub fn hardware_budget(&self) -> ResourceVector {
        self.hardware_budget
    }

    pub fn thermal_state(&self) -> ThermalState {
        self.lock().thermal_state
    }

    /// Record the severity that scales the budget for future admissions
    pub fn set_thermal_state(&self, state: ThermalState) {
        self.lock().thermal_state = state;
    }

    pub fn thermal_headroom(&self) -> f64 {
        self.thermal_state().headroom()
    }

    /// Budget currently available to admissions
    pub fn scaled_budget(&self) -> ResourceVector {
        self.budget_for(self.thermal_state())
    }

    /// Dimensions in which committed usage exceeds the current scaled
    /// budget. Non-empty only right after the budget shrinks.
    pub fn over_committed(&self) -> Vec<ResourceDimension> {
        let table = self.lock();
        let usage = table.usage();
        let budget = self.budget_for(table.thermal_state);
        ResourceDimension::ALL
            .iter()
            .copied()
            .filter(|d| usage.get(*d) > budget.get(*d))
            .collect()
    }

    fn budget_for(&self, state: ThermalState) -> ResourceVector {
        self.hardware_budget.scaled(state.headroom())
    }

    fn check_stream_ceiling(
        &self,
        stream_id: &str,
        required: &ResourceVector,
        state: ThermalState,
        budget: &ResourceVector,
    ) -> Result<()> {
        if state == ThermalState::Nominal {
            return Ok(());
        }

        let ceiling = budget.scaled(self.single_stream_ceiling);
        match required.first_exceeding(&ceiling) {
            Some(dimension) => Err(CoordinatorError::ThermalConstraints {
                stream_id: stream_id.to_string(),
                state,
                dimension,
                requested: required.get(dimension),
                ceiling: ceiling.get(dimension),
            }),
            None => Ok(()),
        }
    }

    fn check_budget(
        stream_id: &str,
        usage: &ResourceVector,
        required: &ResourceVector,
        budget: &ResourceVector,
    ) -> Result<()> {
        match (*usage + *required).first_exceeding(budget) {
            Some(dimension) => Err(CoordinatorError::InsufficientResources {
                stream_id: stream_id.to_string(),
                dimension,
                requested: required.get(dimension),
                available: (budget.get(dimension) - usage.get(dimension)).max(0.0),
                budget: budget.get(dimension),
            }),
            None => Ok(()),
        }
    }

    fn publish(&self, table: &AllocationTable) {
        self.metrics.set_usage(table.allocations.len(), &table.usage());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feature, Priority, ResolutionClass};

    fn budget() -> ResourceVector {
        ResourceVector {
            bandwidth_mbps: 2000.0,
            memory_bytes: 512 * 1024 * 1024,
            cpu_percent: 100.0,
            gpu_percent: 100.0,
            power_mw: 1000.0,
        }
    }

    fn stream(id: &str, priority: Priority) -> StreamProfile {
        StreamProfile::new(id, priority, ResolutionClass::FullHd1080, 30)
    }

    fn assert_within_budget(allocator: &ResourceAllocator) {
        assert!(allocator
            .current_usage()
            .fits_within(&allocator.scaled_budget()));
    }

    #[test]
    fn test_admit_and_release() {
        let allocator = ResourceAllocator::new(budget());
        let id = allocator.request_allocation(stream("back", Priority::High)).unwrap();

        assert_eq!(allocator.len(), 1);
        assert_eq!(
            allocator.current_usage(),
            estimate(&stream("back", Priority::High))
        );

        let released = allocator.release_allocation(id).unwrap();
        assert_eq!(released.profile.stream_id, "back");
        assert!(allocator.is_empty());
        assert_eq!(allocator.current_usage(), ResourceVector::default());

        // Idempotent
        assert!(allocator.release_allocation(id).is_none());
    }

    #[test]
    fn test_insufficient_resources() {
        let allocator = ResourceAllocator::new(budget());

        // 1080p30 is ~746 Mbps; two fit in 2000, a third does not
        allocator.request_allocation(stream("a", Priority::High)).unwrap();
        allocator.request_allocation(stream("b", Priority::High)).unwrap();
        let err = allocator
            .request_allocation(stream("c", Priority::High))
            .unwrap_err();

        match err {
            CoordinatorError::InsufficientResources { dimension, .. } => {
                assert_eq!(dimension, ResourceDimension::Bandwidth)
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(allocator.len(), 2);
        assert_within_budget(&allocator);
    }

    #[test]
    fn test_thermal_constraints_above_nominal() {
        let allocator = ResourceAllocator::new(budget());
        allocator.set_thermal_state(ThermalState::Fair);

        // Fair budget is 1400 Mbps, per-stream ceiling 1120; 1080p60 needs ~1493
        let heavy = StreamProfile::new("heavy", Priority::High, ResolutionClass::FullHd1080, 60);
        let err = allocator.request_allocation(heavy.clone()).unwrap_err();
        assert!(matches!(err, CoordinatorError::ThermalConstraints { .. }));

        // The same request is fine at Nominal
        allocator.set_thermal_state(ThermalState::Nominal);
        assert!(allocator.request_allocation(heavy).is_ok());
    }

    #[test]
    fn test_ceiling_distinct_from_budget() {
        let allocator = ResourceAllocator::new(budget());
        allocator.set_thermal_state(ThermalState::Fair);

        // Each ~746 Mbps is below the 1120 ceiling; the second exceeds 1400 total
        allocator.request_allocation(stream("a", Priority::High)).unwrap();
        let err = allocator
            .request_allocation(stream("b", Priority::High))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InsufficientResources { .. }));
    }

    #[test]
    fn test_update_rejected_leaves_allocation_unchanged() {
        let allocator = ResourceAllocator::new(budget());
        let a = allocator.request_allocation(stream("a", Priority::High)).unwrap();
        allocator.request_allocation(stream("b", Priority::High)).unwrap();

        let bigger = StreamProfile {
            frame_rate: 60,
            ..stream("a", Priority::High)
        };
        let err = allocator.update_allocation(a, bigger).unwrap_err();
        assert!(matches!(err, CoordinatorError::InsufficientResources { .. }));

        let current = allocator.allocation(a).unwrap();
        assert_eq!(current.profile.frame_rate, 30);
        assert_within_budget(&allocator);
    }

    #[test]
    fn test_update_uses_incremental_delta() {
        let allocator = ResourceAllocator::new(budget());
        let a = allocator.request_allocation(stream("a", Priority::High)).unwrap();

        // 1080p60 alone (~1493) fits once its own 30fps share is discounted
        let bigger = StreamProfile {
            frame_rate: 60,
            ..stream("a", Priority::High)
        };
        let updated = allocator.update_allocation(a, bigger).unwrap();
        assert_eq!(updated.profile.frame_rate, 60);
        assert_within_budget(&allocator);
    }

    #[test]
    fn test_reduction_always_commits() {
        let allocator = ResourceAllocator::new(budget());
        let a = allocator
            .request_allocation(StreamProfile::new("a", Priority::Low, ResolutionClass::FullHd1080, 60))
            .unwrap();

        // At Critical the stream is far over budget, but shrinking is allowed
        allocator.set_thermal_state(ThermalState::Critical);
        let slower = StreamProfile::new("a", Priority::Low, ResolutionClass::FullHd1080, 10);
        assert!(allocator.update_allocation(a, slower).is_ok());
    }

    #[test]
    fn test_update_unknown_allocation() {
        let allocator = ResourceAllocator::new(budget());
        let err = allocator
            .update_allocation(AllocationId(99), stream("x", Priority::Low))
            .unwrap_err();
        assert_eq!(err, CoordinatorError::AllocationNotFound(AllocationId(99)));
    }

    #[test]
    fn test_admission_is_deterministic() {
        let a = ResourceAllocator::new(budget());
        let b = ResourceAllocator::new(budget());
        let profile = stream("a", Priority::Medium).with_feature(Feature::Hdr);

        for _ in 0..3 {
            assert_eq!(
                a.request_allocation(profile.clone()).is_ok(),
                b.request_allocation(profile.clone()).is_ok()
            );
        }
        assert_eq!(a.current_usage(), b.current_usage());
    }

    #[test]
    fn test_budget_invariant_over_sequence() {
        let allocator = ResourceAllocator::new(budget());
        let mut live = Vec::new();

        for step in 0..60u32 {
            let resolution = ResolutionClass::ALL[(step % 4) as usize];
            let fps = [15, 24, 30, 60][(step % 3) as usize];
            let profile = StreamProfile::new(format!("s{step}"), Priority::Medium, resolution, fps);

            match step % 5 {
                0 | 1 | 2 => {
                    if let Ok(id) = allocator.request_allocation(profile) {
                        live.push(id);
                    }
                }
                3 => {
                    if let Some(id) = live.first().copied() {
                        let _ = allocator.update_allocation(id, profile);
                    }
                }
                _ => {
                    if let Some(id) = live.pop() {
                        allocator.release_allocation(id);
                    }
                }
            }
            assert_within_budget(&allocator);
        }
    }

    #[test]
    fn test_over_committed_after_budget_shrinks() {
        let allocator = ResourceAllocator::new(budget());
        allocator.request_allocation(stream("a", Priority::High)).unwrap();
        assert!(allocator.over_committed().is_empty());

        allocator.set_thermal_state(ThermalState::Critical);
        assert!(allocator
            .over_committed()
            .contains(&ResourceDimension::Bandwidth));
    }
}
