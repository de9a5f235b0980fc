//! voice-node: an always-on voice interaction loop.
//!
//! Captures microphone audio continuously, waits for a wake trigger,
//! records one silence-bounded utterance, transcribes it, streams a reply
//! from a chat-completions backend, and writes sentence-sized speech
//! segments to a named pipe for an external text-to-speech reader.

mod audio;
mod config;
mod dialogue;
mod orchestrator;
mod speak;
mod stt;
mod vad;
mod wake;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;
use tracing_subscriber::EnvFilter;

use audio::{FrameQueue, PipelineStateMachine, RingBuffer};
use config::Config;
use orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if std::env::args().any(|a| a == "--list-devices") {
        for name in audio::capture::list_devices() {
            println!("{name}");
        }
        return Ok(());
    }

    let config = config::load_config();
    info!(
        backend = %config.backend_url,
        model = %config.model,
        sample_rate = config.sample_rate,
        "Starting voice node"
    );

    let adapter =
        wake::create_wake_adapter(&config.wake_engine, Config::manual_trigger_requested())?;
    let gate = wake::WakeGate::new(
        adapter,
        config.wake_threshold,
        config.frame_samples,
        config.sample_rate,
    );
    let stt = stt::create_stt_engine(
        &config.whisper_cmd,
        config.stt_endpoint.as_deref(),
        config.stt_api_key.as_deref(),
    );

    let ring = Arc::new(Mutex::new(RingBuffer::new(config.ring_capacity())));
    let queue = Arc::new(FrameQueue::new(config.frame_queue_frames));
    let state = PipelineStateMachine::new();
    let shutdown = Arc::new(AtomicBool::new(false));

    // The cpal stream is not Send; it lives here on the main task for the
    // lifetime of the loop.
    let _capture = audio::start_capture(
        Arc::clone(&ring),
        Arc::clone(&queue),
        config.sample_rate,
        config.frame_samples,
        config.input_device.as_deref(),
    )?;

    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                shutdown.store(true, Ordering::Relaxed);
            }
        });
    }

    let mut orchestrator = Orchestrator::new(config, ring, queue, gate, stt, state, shutdown);
    orchestrator.run().await
}
