//! Bounded frame queue between the capture callback and the recorder.
//!
//! The cpal callback pushes fixed-size frames with a drop-oldest overflow
//! policy so it can never stall behind a slow consumer; the utterance
//! recorder pops with a short timeout instead of busy-spinning. Frames are
//! always observed in capture order.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// One fixed-size chunk of captured audio.
pub type AudioFrame = Vec<i16>;

/// Bounded FIFO of audio frames with drop-oldest overflow.
pub struct FrameQueue {
    frames: Mutex<VecDeque<AudioFrame>>,
    available: Condvar,
    capacity: usize,
}

impl FrameQueue {
    /// Create a queue holding up to `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Push a frame without blocking. If the queue is full the oldest frame
    /// is discarded — an explicit degradation, not an error.
    pub fn push(&self, frame: AudioFrame) {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() >= self.capacity {
            frames.pop_front();
        }
        frames.push_back(frame);
        drop(frames);
        self.available.notify_one();
    }

    /// Pop the oldest frame, waiting up to `timeout` if the queue is empty.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioFrame> {
        let frames = self.frames.lock().unwrap();
        let (mut frames, _) = self
            .available
            .wait_timeout_while(frames, timeout, |f| f.is_empty())
            .unwrap();
        frames.pop_front()
    }

    /// Discard all queued frames (used at trigger time so recording starts
    /// from the pre-roll snapshot, not stale queue contents).
    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}
