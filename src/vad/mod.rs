//! Energy-based voice activity detection and utterance recording.
//!
//! The recorder drains the live frame queue after a wake trigger, using an
//! adaptive-floor silence policy: the silence threshold is relative to the
//! loudest energy seen so far in the utterance, so no environment-specific
//! absolute calibration is needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::audio::FrameQueue;

/// How long a queue pop waits before re-checking the stop flag.
const POP_TIMEOUT: Duration = Duration::from_millis(200);

/// Initial floor for the running peak energy, as a fraction of full scale.
const PEAK_FLOOR: f32 = 0.01;

/// Normalized RMS energy of an i16 chunk (0.0 .. ~1.0 of full scale).
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((sum / samples.len() as f64).sqrt() / 32768.0) as f32
}

/// A complete captured utterance: pre-roll plus recorded audio.
pub struct Utterance {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Samples captured after the trigger, excluding pre-roll.
    pub recorded_samples: usize,
}

impl Utterance {
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Duration of the recorded portion only. The pre-roll snapshot is
    /// mostly ambient audio and can span seconds on its own, so the
    /// too-short-to-transcribe check must not count it.
    pub fn recorded_secs(&self) -> f32 {
        self.recorded_samples as f32 / self.sample_rate as f32
    }
}

/// Records an utterance from the frame queue, ending on trailing silence or
/// the max-duration cap.
pub struct UtteranceRecorder {
    sample_rate: u32,
    silence_threshold: f32,
    silence_seconds: f32,
    max_utterance_seconds: f32,
}

impl UtteranceRecorder {
    pub fn new(
        sample_rate: u32,
        silence_threshold: f32,
        silence_seconds: f32,
        max_utterance_seconds: f32,
    ) -> Self {
        Self {
            sample_rate,
            silence_threshold,
            silence_seconds,
            max_utterance_seconds,
        }
    }

    /// Drain the queue until trailing silence or the max-duration cap, then
    /// return pre-roll + recorded samples. If `stop` is raised (shutdown)
    /// returns whatever was captured so far.
    ///
    /// Blocking (condvar waits); run under `spawn_blocking` from async code.
    pub fn record(&self, pre_roll: Vec<i16>, queue: &FrameQueue, stop: &AtomicBool) -> Utterance {
        let silence_samples = (self.silence_seconds * self.sample_rate as f32) as usize;
        let max_samples = (self.max_utterance_seconds * self.sample_rate as f32) as usize;

        let mut recorded: Vec<i16> = Vec::with_capacity(max_samples.min(1 << 20));
        let mut recent_peak: f32 = PEAK_FLOOR;
        let mut silence_run: usize = 0;

        while !stop.load(Ordering::Relaxed) {
            let Some(frame) = queue.pop_timeout(POP_TIMEOUT) else {
                continue;
            };
            let energy = rms(&frame);
            recent_peak = recent_peak.max(energy);
            let frame_len = frame.len();
            recorded.extend_from_slice(&frame);

            if energy < self.silence_threshold * recent_peak {
                silence_run += frame_len;
                if silence_run >= silence_samples {
                    debug!(
                        recorded = recorded.len(),
                        recent_peak, "Trailing silence, stopping recording"
                    );
                    break;
                }
            } else {
                silence_run = 0;
            }

            if recorded.len() >= max_samples {
                debug!(recorded = recorded.len(), "Max utterance length reached");
                break;
            }
        }

        let recorded_samples = recorded.len();
        let mut samples = pre_roll;
        samples.extend_from_slice(&recorded);
        Utterance {
            samples,
            sample_rate: self.sample_rate,
            recorded_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;
    const FRAME: usize = 1_600; // 100 ms

    fn frame(amplitude: i16) -> Vec<i16> {
        vec![amplitude; FRAME]
    }

    fn fill(queue: &FrameQueue, loud: usize, quiet: usize) {
        for _ in 0..loud {
            queue.push(frame(8_000));
        }
        for _ in 0..quiet {
            queue.push(frame(10));
        }
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[]), 0.0);
        assert!(rms(&[0; 100]) < 1e-6);
    }

    #[test]
    fn stops_after_trailing_silence() {
        let queue = FrameQueue::new(64);
        // 1 s of speech, then plenty of near-silence; 0.5 s silence window.
        fill(&queue, 10, 20);
        let rec = UtteranceRecorder::new(RATE, 0.08, 0.5, 15.0);
        let stop = AtomicBool::new(false);
        let utt = rec.record(Vec::new(), &queue, &stop);
        // 1.0 s loud + 0.5 s silence, within one frame.
        let expected = 16_000 + 8_000;
        assert!(
            utt.samples.len().abs_diff(expected) <= FRAME,
            "got {} samples, expected ~{expected}",
            utt.samples.len()
        );
    }

    #[test]
    fn stops_at_max_duration_when_never_silent() {
        let queue = FrameQueue::new(64);
        fill(&queue, 30, 0);
        let rec = UtteranceRecorder::new(RATE, 0.08, 0.5, 2.0);
        let stop = AtomicBool::new(false);
        let utt = rec.record(Vec::new(), &queue, &stop);
        assert_eq!(utt.samples.len(), 2 * RATE as usize);
    }

    #[test]
    fn external_stop_returns_capture_so_far() {
        let queue = FrameQueue::new(8);
        let rec = UtteranceRecorder::new(RATE, 0.08, 0.5, 15.0);
        let stop = AtomicBool::new(true);
        let utt = rec.record(vec![1, 2, 3], &queue, &stop);
        assert_eq!(utt.samples, vec![1, 2, 3]);
        assert_eq!(utt.recorded_samples, 0);
    }

    #[test]
    fn recorded_duration_excludes_pre_roll() {
        // A 0.1 s silent blip on top of a 2 s pre-roll: total duration is
        // dominated by the pre-roll, but the recorded portion stays short
        // enough for the caller's noise gate to discard it.
        let queue = FrameQueue::new(8);
        queue.push(frame(10));
        let rec = UtteranceRecorder::new(RATE, 0.08, 0.05, 15.0);
        let stop = AtomicBool::new(false);
        let pre_roll = vec![0i16; 2 * RATE as usize];
        let utt = rec.record(pre_roll, &queue, &stop);
        assert!(utt.duration_secs() > 2.0);
        assert!(utt.recorded_secs() < 0.3, "recorded {}", utt.recorded_secs());
    }

    #[test]
    fn pre_roll_precedes_recorded_audio() {
        let queue = FrameQueue::new(64);
        fill(&queue, 2, 10);
        let rec = UtteranceRecorder::new(RATE, 0.08, 0.3, 15.0);
        let stop = AtomicBool::new(false);
        let pre_roll = vec![42; 100];
        let utt = rec.record(pre_roll, &queue, &stop);
        assert_eq!(&utt.samples[..100], &[42; 100][..]);
        assert!(utt.samples.len() > 100);
    }
}
