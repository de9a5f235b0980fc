//! Fixed-capacity ring buffer for recent audio samples.
//!
//! Holds the last few seconds of captured i16 audio so that the very start
//! of an utterance (spoken before the wake trigger fires) is not lost.
//! Written by the cpal callback, read by the wake gate and at trigger time
//! for the pre-roll snapshot; callers share it behind a `Mutex`.

/// Circular store of the most recent `capacity` samples.
pub struct RingBuffer {
    buf: Vec<i16>,
    capacity: usize,
    pos: usize,
    filled: usize,
}

impl RingBuffer {
    /// Create a ring buffer holding up to `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity.max(1)],
            capacity: capacity.max(1),
            pos: 0,
            filled: 0,
        }
    }

    /// Append samples, overwriting the oldest data once capacity is exceeded.
    ///
    /// A single push larger than capacity retains only its trailing
    /// `capacity` samples.
    pub fn push(&mut self, samples: &[i16]) {
        let n = samples.len();
        if n >= self.capacity {
            self.buf.copy_from_slice(&samples[n - self.capacity..]);
            self.pos = 0;
            self.filled = self.capacity;
            return;
        }
        if self.pos + n <= self.capacity {
            self.buf[self.pos..self.pos + n].copy_from_slice(samples);
            self.pos += n;
            if self.pos == self.capacity {
                self.pos = 0;
            }
        } else {
            let first = self.capacity - self.pos;
            self.buf[self.pos..].copy_from_slice(&samples[..first]);
            self.buf[..n - first].copy_from_slice(&samples[first..]);
            self.pos = n - first;
        }
        self.filled = (self.filled + n).min(self.capacity);
    }

    /// Return the currently-held samples in chronological order.
    ///
    /// Always a fresh copy; the most recent `min(capacity, total_pushed)`
    /// samples regardless of wrap position.
    pub fn get_all(&self) -> Vec<i16> {
        if self.filled < self.capacity {
            return self.buf[..self.filled].to_vec();
        }
        let mut out = Vec::with_capacity(self.capacity);
        out.extend_from_slice(&self.buf[self.pos..]);
        out.extend_from_slice(&self.buf[..self.pos]);
        out
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.filled
    }

    /// Reset to empty.
    pub fn clear(&mut self) {
        self.pos = 0;
        self.filled = 0;
    }
}
