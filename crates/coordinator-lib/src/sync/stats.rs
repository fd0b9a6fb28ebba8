//! Synchronization bookkeeping and statistics

use super::SyncMode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Drift samples retained per stream
pub const DRIFT_HISTORY_CAPACITY: usize = 100;

/// Per-stream synchronization state
#[derive(Debug, Clone, Default)]
pub struct SyncPoint {
    /// Last timestamp reported by the stream, before any correction
    pub last_timestamp: Option<Duration>,
    pub frame_count: u64,
    /// Signed drift in seconds, oldest first
    drift_history: VecDeque<f64>,
    pub corrections: u64,
    pub dropped: u64,
}

impl SyncPoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_drift(&mut self, drift_secs: f64) {
        if self.drift_history.len() == DRIFT_HISTORY_CAPACITY {
            self.drift_history.pop_front();
        }
        self.drift_history.push_back(drift_secs);
    }

    pub fn drift_samples(&self) -> usize {
        self.drift_history.len()
    }

    /// Mean of |drift| over the retained history
    pub fn average_drift(&self) -> f64 {
        if self.drift_history.is_empty() {
            return 0.0;
        }
        self.drift_history.iter().map(|d| d.abs()).sum::<f64>() / self.drift_history.len() as f64
    }

    pub fn max_drift(&self) -> f64 {
        self.drift_history
            .iter()
            .map(|d| d.abs())
            .fold(0.0, f64::max)
    }

    /// Clear counters and drift, keeping the ordering anchor
    pub fn reset_statistics(&mut self) {
        self.frame_count = 0;
        self.drift_history.clear();
        self.corrections = 0;
        self.dropped = 0;
    }

    pub fn snapshot(&self) -> StreamStatistics {
        StreamStatistics {
            frames_processed: self.frame_count,
            corrections: self.corrections,
            dropped_frames: self.dropped,
            average_drift_secs: self.average_drift(),
            max_drift_secs: self.max_drift(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStatistics {
    pub frames_processed: u64,
    pub corrections: u64,
    pub dropped_frames: u64,
    pub average_drift_secs: f64,
    pub max_drift_secs: f64,
}

/// Read-only snapshot of a synchronization session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub mode: SyncMode,
    pub tolerance_ms: u64,
    pub streams: BTreeMap<String, StreamStatistics>,
    pub synchronized_sets: u64,
    pub frames_emitted: u64,
}

impl SyncStatistics {
    pub fn total_corrections(&self) -> u64 {
        self.streams.values().map(|s| s.corrections).sum()
    }

    pub fn total_dropped(&self) -> u64 {
        self.streams.values().map(|s| s.dropped_frames).sum()
    }
}
