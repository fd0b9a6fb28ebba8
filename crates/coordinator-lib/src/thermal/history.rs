//! Bounded history of thermal observations

use super::ThermalState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of samples retained
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// One recorded thermal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermalSample {
    pub state: ThermalState,
    /// Unix milliseconds
    pub timestamp: i64,
}

/// Fixed-capacity ring of thermal samples; pushing past capacity evicts
/// the oldest sample in O(1).
#[derive(Debug, Clone)]
pub struct ThermalHistory {
    samples: VecDeque<ThermalSample>,
    capacity: usize,
}

impl ThermalHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, state: ThermalState, timestamp: i64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(ThermalSample { state, timestamp });
    }

    /// The last `n` samples, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &ThermalSample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip)
    }

    pub fn latest(&self) -> Option<&ThermalSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn to_vec(&self) -> Vec<ThermalSample> {
        self.samples.iter().copied().collect()
    }
}

impl Default for ThermalHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
