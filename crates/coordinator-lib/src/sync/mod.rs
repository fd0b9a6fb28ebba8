//! Frame synchronization
//!
//! This module provides:
//! - An injectable monotonic reference clock anchored at configuration time
//! - Per-stream sync points with bounded drift history
//! - Drop-oldest frame buffers for frame-accurate alignment
//! - The synchronizer that corrects or aligns frames and emits them

mod buffer;
mod clock;
mod frame;
mod stats;
mod synchronizer;


pub use buffer::{FrameBuffer, DEFAULT_BUFFER_DEPTH};
pub use clock::{ManualClock, MonotonicClock, ReferenceClock};
pub use frame::{Frame, SynchronizedSet};
pub use stats::{StreamStatistics, SyncPoint, SyncStatistics, DRIFT_HISTORY_CAPACITY};
pub use synchronizer::{Emission, FrameSynchronizer};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Frame rate the default tolerance is derived from
pub const DEFAULT_NOMINAL_FRAME_RATE: u32 = 30;

/// How frames from configured streams are reconciled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Pass frames through untouched
    #[default]
    None,
    /// Correct each frame against the reference clock
    Timestamp,
    /// Buffer and emit one aligned frame per stream
    FrameAccurate,
    /// Like `Timestamp`, referenced to the audio clock when one is set
    AudioSync,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncMode::None => "none",
            SyncMode::Timestamp => "timestamp",
            SyncMode::FrameAccurate => "frame_accurate",
            SyncMode::AudioSync => "audio_sync",
        };
        write!(f, "{name}")
    }
}

/// One frame period at `frame_rate`, truncated to whole milliseconds
pub fn frame_period(frame_rate: u32) -> Duration {
    Duration::from_millis(1000 / u64::from(frame_rate.max(1)))
}
