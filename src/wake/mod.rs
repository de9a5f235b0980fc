//! Wake trigger detection.
//!
//! A `WakeEngine` is the classifier capability: given a window of samples it
//! returns either a boolean verdict per native-length frame (engines that
//! require exact frame sizes) or a confidence score compared against the
//! configured threshold. Engine-specific framing stays inside the gate: the
//! window is sliced into consecutive native-length chunks and an undersized
//! remainder is discarded; for scored engines only the final sub-window's
//! score is compared to the threshold.
//!
//! A manual trigger (blocking prompt on stdin) substitutes for a classifier
//! when none is available or configured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use tracing::{debug, info};

use crate::audio::RingBuffer;
use crate::vad::rms;

/// One classifier verdict for a frame or window.
pub enum Verdict {
    /// Threshold-free engines: did this exact frame contain the wake sound?
    Triggered(bool),
    /// Score-based engines: confidence in 0..1, compared to the threshold.
    Score(f32),
}

/// Wake classifier capability.
pub trait WakeEngine: Send {
    /// Native frame length in samples, if the engine requires exact-size
    /// frames. `None` means the engine accepts the whole window.
    fn frame_length(&self) -> Option<usize> {
        None
    }

    fn evaluate(&mut self, frame: &[i16]) -> Verdict;
}

/// Model-free scored engine: confidence proportional to signal energy.
///
/// Crude but dependency-free — a loud, close-to-the-mic phrase (or clap)
/// trips it. Real classifier models plug in through the same trait.
pub struct EnergyWake {
    /// Normalized RMS treated as full confidence.
    reference: f32,
}

impl EnergyWake {
    pub fn new() -> Self {
        Self { reference: 0.25 }
    }
}

impl WakeEngine for EnergyWake {
    fn evaluate(&mut self, frame: &[i16]) -> Verdict {
        Verdict::Score((rms(frame) / self.reference).min(1.0))
    }
}

/// Available wake trigger mechanisms.
pub enum WakeAdapter {
    Energy(EnergyWake),
    /// Press-Enter-to-record; no classifier involved.
    Manual,
}

impl WakeAdapter {
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }

    fn engine_mut(&mut self) -> Option<&mut dyn WakeEngine> {
        match self {
            Self::Energy(e) => Some(e),
            Self::Manual => None,
        }
    }
}

/// Create a wake adapter from config values.
///
/// `engine` is one of: "" (auto: energy), "energy", "manual". Anything else
/// is a startup-time fatal error — the loop cannot run without a trigger.
pub fn create_wake_adapter(engine: &str, force_manual: bool) -> anyhow::Result<WakeAdapter> {
    if force_manual {
        return Ok(WakeAdapter::Manual);
    }
    match engine {
        "" | "energy" => Ok(WakeAdapter::Energy(EnergyWake::new())),
        "manual" => Ok(WakeAdapter::Manual),
        other => bail!("Unknown wake engine: {other}"),
    }
}

/// Polls recent audio against the wake engine and reports triggers.
pub struct WakeGate {
    adapter: WakeAdapter,
    threshold: f32,
    window_samples: usize,
    poll_interval: Duration,
}

impl WakeGate {
    pub fn new(adapter: WakeAdapter, threshold: f32, window_samples: usize, sample_rate: u32) -> Self {
        let poll_interval =
            Duration::from_secs_f64(window_samples as f64 / sample_rate.max(1) as f64);
        Self {
            adapter,
            threshold,
            window_samples,
            poll_interval,
        }
    }

    /// Block until the wake trigger fires. Returns `false` on shutdown or
    /// closed stdin (manual mode) instead of a trigger.
    pub async fn wait_for_trigger(
        &mut self,
        ring: &Arc<Mutex<RingBuffer>>,
        shutdown: &Arc<AtomicBool>,
    ) -> bool {
        if self.adapter.is_manual() {
            println!("Press Enter to record...");
            return tokio::task::spawn_blocking(|| {
                let mut line = String::new();
                matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0)
            })
            .await
            .unwrap_or(false);
        }

        loop {
            if shutdown.load(Ordering::Relaxed) {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
            if self.poll(ring) {
                return true;
            }
        }
    }

    /// Resolve when a wake trigger arrives while a reply is streaming.
    /// Never resolves in manual mode (stdin offers no side channel to poll).
    pub async fn watch_for_barge_in(&mut self, ring: &Arc<Mutex<RingBuffer>>) {
        if self.adapter.is_manual() {
            std::future::pending::<()>().await;
        }
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if self.poll(ring) {
                return;
            }
        }
    }

    /// One non-blocking wake check against the latest window in the ring.
    /// Always `false` in manual mode.
    pub fn poll(&mut self, ring: &Arc<Mutex<RingBuffer>>) -> bool {
        let Some(engine) = self.adapter.engine_mut() else {
            return false;
        };
        let window = {
            let ring = ring.lock().unwrap();
            let all = ring.get_all();
            if all.len() < self.window_samples {
                return false;
            }
            all[all.len() - self.window_samples..].to_vec()
        };
        let triggered = window_triggers(engine, self.threshold, &window);
        if triggered {
            info!("Wake trigger detected");
        }
        triggered
    }
}

/// Evaluate one window, slicing to the engine's native frame length.
fn window_triggers(engine: &mut dyn WakeEngine, threshold: f32, window: &[i16]) -> bool {
    let frame_len = engine.frame_length().unwrap_or(window.len()).max(1);
    let mut last_score: Option<f32> = None;
    for chunk in window.chunks_exact(frame_len) {
        match engine.evaluate(chunk) {
            Verdict::Triggered(true) => return true,
            Verdict::Triggered(false) => {}
            Verdict::Score(score) => last_score = Some(score),
        }
    }
    match last_score {
        Some(score) => {
            debug!(score, threshold, "Wake score");
            score >= threshold
        }
        None => false,
    }
}
