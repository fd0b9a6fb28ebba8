//! Per-stream frame buffer for frame-accurate alignment

use super::Frame;
use std::collections::VecDeque;
use std::time::Duration;

/// Default number of frames held per stream
pub const DEFAULT_BUFFER_DEPTH: usize = 5;

/// Bounded FIFO; pushing into a full buffer drops the oldest frame
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frames: VecDeque<Frame>,
    depth: usize,
}

impl FrameBuffer {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            frames: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Queue a frame, returning the frame evicted to make room
    pub fn push(&mut self, frame: Frame) -> Option<Frame> {
        let evicted = if self.frames.len() == self.depth {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn oldest_timestamp(&self) -> Option<Duration> {
        self.frames.front().map(|f| f.timestamp)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_DEPTH)
    }
}
