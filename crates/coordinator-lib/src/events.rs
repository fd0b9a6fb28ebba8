//! Consumer notifications
//!
//! All notifications flow through one tagged enum on one channel. Producers
//! never wait on the consumer: a full channel drops the event and logs it,
//! so a slow consumer cannot stall capture threads.
//!
//! Half the channel is reserved for thermal notifications. Synchronized
//! sets only use the other half, so frame traffic can never crowd out a
//! transition, an eviction or a mitigation report. Single frames are not
//! published at all; `process_frame` returns them to the caller.

use crate::models::{AllocationId, Priority};
use crate::observability::CoordinatorMetrics;
use crate::sync::SynchronizedSet;
use crate::thermal::{Mitigation, ThermalState};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Default capacity of the event channel
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Everything the core reports to its consumer
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// The thermal adapter recorded a new severity
    ThermalStateChanged {
        from: ThermalState,
        to: ThermalState,
        /// Unix milliseconds
        at: i64,
    },
    /// A mitigation plan finished applying
    MitigationApplied {
        state: ThermalState,
        mitigations: Vec<Mitigation>,
        affected_streams: Vec<String>,
    },
    /// A stream was released by a thermal mitigation
    StreamEvicted {
        stream_id: String,
        allocation_id: AllocationId,
        priority: Priority,
        state: ThermalState,
    },
    /// One aligned frame per stream, sharing a presentation timestamp
    FramesSynchronized(SynchronizedSet),
}

impl CoordinatorEvent {
    /// Label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorEvent::ThermalStateChanged { .. } => "thermal_state_changed",
            CoordinatorEvent::MitigationApplied { .. } => "mitigation_applied",
            CoordinatorEvent::StreamEvicted { .. } => "stream_evicted",
            CoordinatorEvent::FramesSynchronized(_) => "frames_synchronized",
        }
    }

    /// Thermal notifications may use the reserved part of the channel
    pub fn is_thermal(&self) -> bool {
        !matches!(self, CoordinatorEvent::FramesSynchronized(_))
    }
}

/// Sending half of the event channel, cheap to clone
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<CoordinatorEvent>>,
    /// Slots only thermal notifications may fill
    reserved: usize,
}

impl EventSink {
    /// Create a bounded event channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CoordinatorEvent>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let sink = Self {
            tx: Some(tx),
            reserved: capacity / 2,
        };
        (sink, rx)
    }

    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self {
            tx: None,
            reserved: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an event without blocking.
    ///
    /// Must not be called while holding a core lock.
    pub fn emit(&self, event: CoordinatorEvent) {
        let Some(tx) = &self.tx else {
            return;
        };

        if !event.is_thermal() && tx.capacity() <= self.reserved {
            CoordinatorMetrics::new().inc_events_dropped();
            debug!(event = event.kind(), "Event channel busy, dropping frame notification");
            return;
        }

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                CoordinatorMetrics::new().inc_events_dropped();
                warn!(event = event.kind(), "Event channel full, dropping notification");
            }
            Err(TrySendError::Closed(event)) => {
                debug!(event = event.kind(), "Event consumer gone, dropping notification");
            }
        }
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::disabled()
    }
}
