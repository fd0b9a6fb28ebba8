//! Frames as seen by the synchronizer

use bytes::Bytes;
use std::time::Duration;

/// A captured frame. The payload is shared, never copied.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub stream_id: String,
    pub sequence: u64,
    /// Presentation timestamp relative to the synchronization anchor
    pub timestamp: Duration,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(stream_id: impl Into<String>, sequence: u64, timestamp: Duration) -> Self {
        Self {
            stream_id: stream_id.into(),
            sequence,
            timestamp,
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// One frame per configured stream, all carrying the same timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct SynchronizedSet {
    /// Monotonic set counter within a session
    pub sequence: u64,
    pub timestamp: Duration,
    /// In configured stream order
    pub frames: Vec<Frame>,
}

impl SynchronizedSet {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, stream_id: &str) -> Option<&Frame> {
        self.frames.iter().find(|f| f.stream_id == stream_id)
    }
}
