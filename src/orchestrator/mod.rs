//! The dialogue-turn orchestrator.
//!
//! Binds capture, wake gate, recorder, transcription, dialogue, and the
//! speech sink into the repeating cycle: idle → wake → record → transcribe
//! → converse → idle. While a reply streams, the wake gate keeps being
//! polled; a new trigger cancels the in-flight turn (barge-in) and goes
//! straight back to recording. Per-turn faults log and return to idle;
//! they never terminate the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audio::{FrameQueue, PipelineStateMachine, RingBuffer};
use crate::config::Config;
use crate::dialogue::stream::DialogueClient;
use crate::dialogue::{build_request_messages, ConversationState, TurnCancellation};
use crate::speak::SpeechSink;
use crate::stt::{write_wav, SttAdapter};
use crate::vad::{Utterance, UtteranceRecorder};
use crate::wake::WakeGate;

/// How long a cancelled turn may take to drain before it is aborted, so a
/// stalled backend cannot delay the barge-in recording.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Orchestrator {
    config: Config,
    ring: Arc<Mutex<RingBuffer>>,
    queue: Arc<FrameQueue>,
    gate: WakeGate,
    recorder: Arc<UtteranceRecorder>,
    stt: Option<Arc<SttAdapter>>,
    dialogue: DialogueClient,
    sink: SpeechSink,
    history: ConversationState,
    state: Arc<PipelineStateMachine>,
    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        ring: Arc<Mutex<RingBuffer>>,
        queue: Arc<FrameQueue>,
        gate: WakeGate,
        stt: Option<SttAdapter>,
        state: Arc<PipelineStateMachine>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let recorder = Arc::new(UtteranceRecorder::new(
            config.sample_rate,
            config.vad_silence_threshold,
            config.vad_silence_seconds,
            config.max_utterance_seconds,
        ));
        let dialogue = DialogueClient::new(&config.backend_url, &config.model, &config.agent_id);
        let sink = SpeechSink::new(config.tts_fifo_path(), config.tts_interrupt_signal.clone());
        let history = ConversationState::new(config.history_turns);
        Self {
            config,
            ring,
            queue,
            gate,
            recorder,
            stt: stt.map(Arc::new),
            dialogue,
            sink,
            history,
            state,
            shutdown,
        }
    }

    /// Run the interaction loop until shutdown.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        // Set after a barge-in: skip waiting for a trigger, the new
        // utterance is already under way.
        let mut barged_in = false;

        while !self.shutdown.load(Ordering::Relaxed) {
            if !barged_in {
                self.state.start_listening();
                if !self
                    .gate
                    .wait_for_trigger(&self.ring, &self.shutdown)
                    .await
                {
                    break; // shutdown, or stdin closed in manual mode
                }
            }
            barged_in = false;
            self.state.start_recording();

            let pre_roll = self.ring.lock().unwrap().get_all();
            self.queue.clear();
            info!(pre_roll = pre_roll.len(), "Recording utterance");

            let utterance = {
                let recorder = Arc::clone(&self.recorder);
                let queue = Arc::clone(&self.queue);
                let stop = Arc::clone(&self.shutdown);
                tokio::task::spawn_blocking(move || recorder.record(pre_roll, &queue, &stop))
                    .await
                    .context("Recorder task failed")?
            };

            if utterance.recorded_secs() < self.config.min_utterance_seconds {
                info!(
                    recorded = utterance.recorded_secs(),
                    total = utterance.duration_secs(),
                    "Utterance too short, ignoring"
                );
                self.state.reset();
                continue;
            }

            self.state.start_transcribing();
            let Some(stt) = &self.stt else {
                info!("No transcriber configured; discarding utterance");
                self.state.reset();
                continue;
            };
            let transcript = match transcribe_utterance(stt, &utterance).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Transcription failed: {e:#}");
                    self.state.reset();
                    continue;
                }
            };
            let transcript = if self.config.strip_wake_phrase {
                strip_wake_phrase(&transcript, &self.config.wake_phrase)
            } else {
                transcript.trim().to_string()
            };
            if transcript.is_empty() {
                info!("No transcript (or wake phrase only), back to listening");
                self.state.reset();
                continue;
            }
            info!(user = %transcript, "Transcript");
            self.history.push_user(transcript);

            self.state.start_conversing();
            let cancel = TurnCancellation::new();
            let messages = build_request_messages(&self.config.system_prompt, &self.history);
            let dialogue = self.dialogue.clone();
            let turn_sink = self.sink.clone();
            let turn_cancel = cancel.clone();
            let mut turn = tokio::spawn(async move {
                dialogue
                    .stream_turn(&messages, turn_cancel, |segment| turn_sink.speak(segment))
                    .await
            });

            let gate = &mut self.gate;
            let ring = &self.ring;
            let finished = tokio::select! {
                res = &mut turn => Some(res),
                _ = gate.watch_for_barge_in(ring) => None,
            };
            let result = match finished {
                Some(res) => res,
                None => {
                    info!("Barge-in: new wake trigger, cancelling reply");
                    cancel.raise();
                    self.sink.interrupt();
                    barged_in = true;
                    drain_cancelled_turn(&mut turn, DRAIN_TIMEOUT).await
                }
            };

            let reply = match result {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    warn!("Dialogue turn failed: {e:#}");
                    String::new()
                }
                Err(e) => {
                    warn!("Dialogue task panicked: {e}");
                    String::new()
                }
            };

            if !reply.is_empty() {
                // A cancelled turn keeps its partial reply: what was already
                // spoken is conversation context.
                info!(
                    chars = reply.len(),
                    cancelled = cancel.is_raised(),
                    "Assistant reply recorded"
                );
                self.history.push_assistant(reply);
            } else if cancel.is_raised() {
                info!("Turn cancelled before any reply");
            } else {
                info!("No reply from backend");
            }

            if !barged_in {
                self.state.reset();
            }
        }

        info!("Orchestrator loop exiting");
        Ok(())
    }
}

/// Await a cancelled turn's result, but only for `drain_timeout`: the read
/// stops at the next line or read-timeout, and if even that does not come,
/// the task is aborted and the reply treated as empty.
async fn drain_cancelled_turn(
    turn: &mut JoinHandle<anyhow::Result<String>>,
    drain_timeout: Duration,
) -> Result<anyhow::Result<String>, JoinError> {
    match tokio::time::timeout(drain_timeout, &mut *turn).await {
        Ok(res) => res,
        Err(_) => {
            warn!("Cancelled turn did not drain in time; aborting task");
            turn.abort();
            Ok(Ok(String::new()))
        }
    }
}

/// Write the utterance to a temp WAV, transcribe it, clean up.
async fn transcribe_utterance(stt: &SttAdapter, utterance: &Utterance) -> anyhow::Result<String> {
    let wav_path = std::env::temp_dir().join(format!("voice-node-{}.wav", Uuid::new_v4()));
    write_wav(&wav_path, &utterance.samples, utterance.sample_rate)?;
    let result = stt.transcribe(&wav_path).await;
    let _ = std::fs::remove_file(&wav_path);
    result
}

/// Remove the wake phrase (and common variants) from the transcript head,
/// so "hey assistant, what time is it" becomes "what time is it".
fn strip_wake_phrase(text: &str, wake_phrase: &str) -> String {
    let text = text.trim();
    let phrase = wake_phrase.trim();

    let mut candidates = vec![phrase];
    if let Some(bare) = strip_prefix_ci(phrase, "hey ") {
        candidates.push(bare);
    }
    candidates.retain(|c| !c.is_empty());

    for prefix in candidates {
        if let Some(rest) = strip_prefix_ci(text, prefix) {
            return rest.trim_start_matches([' ', ',']).to_string();
        }
    }
    text.to_string()
}

/// Case-insensitive prefix strip, character by character, so the remainder
/// is always sliced on a char boundary of the original text (lowercasing
/// can change a character's byte length).
fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut rest = text.char_indices();
    let mut pre = prefix.chars();
    loop {
        let Some(p) = pre.next() else {
            return Some(match rest.next() {
                Some((i, _)) => &text[i..],
                None => "",
            });
        };
        let (_, c) = rest.next()?;
        if !c.to_lowercase().eq(p.to_lowercase()) {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::stream::TurnConsumer;
    use crate::dialogue::Role;

    #[test]
    fn strips_wake_phrase_and_variants() {
        assert_eq!(
            strip_wake_phrase("Hey Assistant, what time is it", "hey assistant"),
            "what time is it"
        );
        assert_eq!(
            strip_wake_phrase("assistant what time is it", "hey assistant"),
            "what time is it"
        );
        assert_eq!(
            strip_wake_phrase("what time is it", "hey assistant"),
            "what time is it"
        );
    }

    #[test]
    fn wake_phrase_only_strips_to_empty() {
        assert_eq!(strip_wake_phrase("  Hey assistant  ", "hey assistant"), "");
    }

    #[test]
    fn non_ascii_wake_phrase_strips_on_char_boundaries() {
        // Mixed-case accented phrases must never slice mid-character.
        assert_eq!(
            strip_wake_phrase("ÉCOUTE, quelle heure est-il", "écoute"),
            "quelle heure est-il"
        );
        assert_eq!(
            strip_wake_phrase("İstanbul what time is it", "İstanbul"),
            "what time is it"
        );
        // A near-miss accented prefix leaves the text untouched.
        assert_eq!(strip_wake_phrase("écoutez bien", "écoute bien"), "écoutez bien");
    }

    #[tokio::test]
    async fn stalled_turn_drain_is_bounded() {
        let mut turn: tokio::task::JoinHandle<anyhow::Result<String>> =
            tokio::spawn(async {
                std::future::pending::<()>().await;
                Ok(String::new())
            });
        let res = drain_cancelled_turn(&mut turn, Duration::from_millis(50)).await;
        assert_eq!(res.unwrap().unwrap(), "");
    }

    #[tokio::test]
    async fn finished_turn_result_passes_through_drain() {
        let mut turn = tokio::spawn(async { anyhow::Ok("partial reply.".to_string()) });
        let res = drain_cancelled_turn(&mut turn, Duration::from_secs(1)).await;
        assert_eq!(res.unwrap().unwrap(), "partial reply.");
    }

    #[test]
    fn turn_over_scripted_deltas_updates_history_and_sink() {
        // Mocked transcript in, mocked streamed reply out: the turn yields
        // exactly one spoken segment and one user + one assistant entry.
        let mut history = ConversationState::new(20);
        history.push_user("what time is it");

        let mut spoken = Vec::new();
        let cancel = TurnCancellation::new();
        let mut consumer = TurnConsumer::new(cancel, |s: &str| spoken.push(s.to_string()));
        for part in ["It is", " noon."] {
            let line = format!(
                r#"data: {{"choices":[{{"delta":{{"content":{}}}}}]}}"#,
                serde_json::to_string(part).unwrap()
            );
            assert!(consumer.feed_line(&line));
        }
        assert!(!consumer.feed_line("data: [DONE]"));
        let reply = consumer.finish();
        assert!(!reply.is_empty());
        history.push_assistant(reply);

        assert_eq!(spoken, vec!["It is noon."]);
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[0].role, Role::User);
        assert_eq!(history.turns()[1].role, Role::Assistant);
        assert_eq!(history.turns()[1].content, "It is noon.");
    }
}
