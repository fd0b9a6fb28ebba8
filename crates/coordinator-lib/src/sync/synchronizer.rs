//! Frame synchronizer
//!
//! One lock guards a whole synchronization session: the sync points, the
//! frame buffers and the emission counters. Frames from different streams
//! may arrive on different threads; the readiness decision for a
//! frame-accurate set is taken under that lock so it sees every buffer at
//! once. Synchronized sets are published after the lock is released.

use super::{
    frame_period, Frame, FrameBuffer, ReferenceClock, SyncMode, SyncPoint, SyncStatistics,
    SynchronizedSet, DEFAULT_BUFFER_DEPTH, DEFAULT_NOMINAL_FRAME_RATE,
};
use crate::error::{CoordinatorError, Result};
use crate::events::{CoordinatorEvent, EventSink};
use crate::observability::CoordinatorMetrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a call to [`FrameSynchronizer::process_frame`] produced
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    /// A single frame, possibly with a corrected timestamp
    Frame(Frame),
    /// An aligned set, one frame per configured stream
    Set(SynchronizedSet),
    /// The frame was queued; nothing is ready yet
    Pending,
}

impl Emission {
    pub fn is_pending(&self) -> bool {
        matches!(self, Emission::Pending)
    }
}

struct Session {
    mode: SyncMode,
    tolerance: Duration,
    order: Vec<String>,
    points: HashMap<String, SyncPoint>,
    buffers: HashMap<String, FrameBuffer>,
    audio_clock: Option<Arc<dyn ReferenceClock>>,
    synchronized_sets: u64,
    frames_emitted: u64,
}

impl Session {
    fn empty(tolerance: Duration, audio_clock: Option<Arc<dyn ReferenceClock>>) -> Self {
        Self {
            mode: SyncMode::None,
            tolerance,
            order: Vec::new(),
            points: HashMap::new(),
            buffers: HashMap::new(),
            audio_clock,
            synchronized_sets: 0,
            frames_emitted: 0,
        }
    }

    /// Every buffer holds a frame and their oldest timestamps agree
    fn ready(&self) -> bool {
        let mut min = Duration::MAX;
        let mut max = Duration::ZERO;
        for id in &self.order {
            match self.buffers.get(id).and_then(|b| b.oldest_timestamp()) {
                Some(ts) => {
                    min = min.min(ts);
                    max = max.max(ts);
                }
                None => return false,
            }
        }
        !self.order.is_empty() && max - min <= self.tolerance
    }
}

/// Drift and alignment engine for a set of streams
pub struct FrameSynchronizer {
    clock: Arc<dyn ReferenceClock>,
    nominal_frame_rate: u32,
    buffer_depth: usize,
    session: Mutex<Session>,
    events: EventSink,
    metrics: CoordinatorMetrics,
}

impl FrameSynchronizer {
    pub fn new(clock: Arc<dyn ReferenceClock>, events: EventSink) -> Self {
        Self {
            clock,
            nominal_frame_rate: DEFAULT_NOMINAL_FRAME_RATE,
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            session: Mutex::new(Session::empty(
                frame_period(DEFAULT_NOMINAL_FRAME_RATE),
                None,
            )),
            events,
            metrics: CoordinatorMetrics::new(),
        }
    }

    /// Frame rate used to derive the default tolerance
    pub fn with_nominal_frame_rate(mut self, fps: u32) -> Self {
        self.nominal_frame_rate = fps.max(1);
        self
    }

    pub fn with_buffer_depth(mut self, depth: usize) -> Self {
        self.buffer_depth = depth.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new session over `stream_ids`.
    ///
    /// Replaces any previous session, discarding its buffered frames, and
    /// re-anchors the reference clock at zero. `tolerance` defaults to one
    /// frame period at the nominal frame rate.
    pub fn configure<S: AsRef<str>>(
        &self,
        stream_ids: &[S],
        mode: SyncMode,
        tolerance: Option<Duration>,
    ) -> Result<()> {
        let mut order: Vec<String> = Vec::with_capacity(stream_ids.len());
        for id in stream_ids {
            let id = id.as_ref();
            if order.iter().any(|o| o == id) {
                return Err(CoordinatorError::SynchronizationFailed {
                    stream_id: id.to_string(),
                    reason: "stream listed twice".to_string(),
                });
            }
            order.push(id.to_string());
        }

        let tolerance = tolerance.unwrap_or_else(|| frame_period(self.nominal_frame_rate));
        {
            let mut session = self.lock();
            let audio_clock = session.audio_clock.take();
            let mut fresh = Session::empty(tolerance, audio_clock);
            fresh.mode = mode;
            for id in &order {
                fresh.points.insert(id.clone(), SyncPoint::new());
                if mode == SyncMode::FrameAccurate {
                    fresh.buffers.insert(id.clone(), FrameBuffer::new(self.buffer_depth));
                }
            }
            fresh.order = order;
            *session = fresh;
            self.clock.reset();
        }

        info!(
            mode = %mode,
            streams = stream_ids.len(),
            tolerance_ms = tolerance.as_millis() as u64,
            "Synchronization configured"
        );
        Ok(())
    }

    /// Route one frame through the session.
    ///
    /// Frames whose timestamp goes backwards within their stream are
    /// dropped with `SynchronizationFailed`; the stream stays configured.
    pub fn process_frame(&self, frame: Frame) -> Result<Emission> {
        let emission = {
            let mut session = self.lock();
            self.process_locked(&mut session, frame)?
        };

        if let Emission::Set(set) = &emission {
            self.events
                .emit(CoordinatorEvent::FramesSynchronized(set.clone()));
        }
        Ok(emission)
    }

    fn process_locked(&self, session: &mut Session, frame: Frame) -> Result<Emission> {
        if session.mode == SyncMode::None {
            if let Some(point) = session.points.get_mut(&frame.stream_id) {
                point.last_timestamp = Some(frame.timestamp);
                point.frame_count += 1;
            }
            session.frames_emitted += 1;
            self.metrics.add_frames_emitted(1);
            return Ok(Emission::Frame(frame));
        }

        let point = session.points.get_mut(&frame.stream_id).ok_or_else(|| {
            CoordinatorError::SynchronizationFailed {
                stream_id: frame.stream_id.clone(),
                reason: "stream is not configured for synchronization".to_string(),
            }
        })?;

        if let Some(last) = point.last_timestamp {
            if frame.timestamp < last {
                point.dropped += 1;
                self.metrics.inc_frames_dropped();
                warn!(
                    stream_id = %frame.stream_id,
                    timestamp_ms = frame.timestamp.as_millis() as u64,
                    last_ms = last.as_millis() as u64,
                    "Dropping frame with timestamp earlier than its predecessor"
                );
                return Err(CoordinatorError::SynchronizationFailed {
                    stream_id: frame.stream_id,
                    reason: format!(
                        "timestamp {:?} precedes previous {:?}",
                        frame.timestamp, last
                    ),
                });
            }
        }
        point.last_timestamp = Some(frame.timestamp);
        point.frame_count += 1;

        match session.mode {
            SyncMode::Timestamp => {
                let reference = self.clock.now();
                Ok(self.correct(session, frame, reference))
            }
            SyncMode::AudioSync => {
                let reference = match &session.audio_clock {
                    Some(audio) => audio.now(),
                    None => self.clock.now(),
                };
                Ok(self.correct(session, frame, reference))
            }
            SyncMode::FrameAccurate => Ok(self.align(session, frame)),
            SyncMode::None => Ok(Emission::Frame(frame)),
        }
    }

    /// Correct a frame against `reference`, rewriting its timestamp when
    /// the drift exceeds the tolerance
    fn correct(&self, session: &mut Session, mut frame: Frame, reference: Duration) -> Emission {
        let drift = frame.timestamp.as_secs_f64() - reference.as_secs_f64();
        let tolerance = session.tolerance.as_secs_f64();

        if let Some(point) = session.points.get_mut(&frame.stream_id) {
            point.record_drift(drift);
            if drift.abs() > tolerance {
                point.corrections += 1;
                self.metrics.inc_timestamp_corrections();
                debug!(
                    stream_id = %frame.stream_id,
                    drift_ms = drift * 1000.0,
                    "Correcting frame timestamp"
                );
                frame.timestamp = reference;
            }
        }
        self.metrics.observe_drift(drift.abs());

        session.frames_emitted += 1;
        self.metrics.add_frames_emitted(1);
        Emission::Frame(frame)
    }

    fn align(&self, session: &mut Session, frame: Frame) -> Emission {
        let stream_id = frame.stream_id.clone();
        let evicted = session
            .buffers
            .entry(stream_id.clone())
            .or_insert_with(|| FrameBuffer::new(self.buffer_depth))
            .push(frame);

        if let Some(old) = evicted {
            if let Some(point) = session.points.get_mut(&stream_id) {
                point.dropped += 1;
            }
            self.metrics.inc_frames_dropped();
            debug!(
                stream_id = %stream_id,
                sequence = old.sequence,
                "Frame buffer full, dropped oldest frame"
            );
        }

        if !session.ready() {
            return Emission::Pending;
        }

        let mut frames = Vec::with_capacity(session.order.len());
        for id in &session.order {
            if let Some(f) = session.buffers.get_mut(id).and_then(|b| b.pop()) {
                frames.push(f);
            }
        }
        let timestamp = frames.first().map(|f| f.timestamp).unwrap_or_default();

        for f in &mut frames {
            let drift = f.timestamp.as_secs_f64() - timestamp.as_secs_f64();
            if let Some(point) = session.points.get_mut(&f.stream_id) {
                point.record_drift(drift);
            }
            self.metrics.observe_drift(drift.abs());
            f.timestamp = timestamp;
        }

        session.synchronized_sets += 1;
        session.frames_emitted += frames.len() as u64;
        self.metrics.inc_synchronized_sets();
        self.metrics.add_frames_emitted(frames.len() as u64);

        Emission::Set(SynchronizedSet {
            sequence: session.synchronized_sets,
            timestamp,
            frames,
        })
    }

    /// Stop synchronizing a stream. Frames already queued for it are
    /// discarded; emitted events are unaffected.
    pub fn remove_stream(&self, stream_id: &str) -> bool {
        let mut session = self.lock();
        let known = session.points.remove(stream_id).is_some();
        session.buffers.remove(stream_id);
        session.order.retain(|id| id != stream_id);
        if known {
            info!(stream_id = %stream_id, "Stream removed from synchronization");
        }
        known
    }

    /// Reference clock for `AudioSync`; `None` falls back to the internal
    /// timebase
    pub fn set_audio_clock(&self, clock: Option<Arc<dyn ReferenceClock>>) {
        self.lock().audio_clock = clock;
    }

    pub fn mode(&self) -> SyncMode {
        self.lock().mode
    }

    pub fn tolerance(&self) -> Duration {
        self.lock().tolerance
    }

    /// Configured streams, in set order
    pub fn streams(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    /// Frames currently queued for `stream_id`
    pub fn buffered(&self, stream_id: &str) -> usize {
        self.lock()
            .buffers
            .get(stream_id)
            .map(|b| b.len())
            .unwrap_or(0)
    }

    pub fn statistics(&self) -> SyncStatistics {
        let session = self.lock();
        SyncStatistics {
            mode: session.mode,
            tolerance_ms: session.tolerance.as_millis() as u64,
            streams: session
                .points
                .iter()
                .map(|(id, point)| (id.clone(), point.snapshot()))
                .collect(),
            synchronized_sets: session.synchronized_sets,
            frames_emitted: session.frames_emitted,
        }
    }

    pub fn reset_statistics(&self) {
        let mut session = self.lock();
        for point in session.points.values_mut() {
            point.reset_statistics();
        }
        session.synchronized_sets = 0;
        session.frames_emitted = 0;
    }
}
