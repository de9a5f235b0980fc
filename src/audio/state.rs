//! Atomic pipeline state machine.
//!
//! Thread-safe tracking of the dialogue cycle using `AtomicU8`. The
//! orchestrator drives the transitions; other tasks (the barge-in watcher,
//! log consumers) only read it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Dialogue cycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    /// Not doing anything; microphone still feeds the ring buffer.
    Idle = 0,
    /// Polling the wake gate for a trigger.
    Listening = 1,
    /// Draining the frame queue into an utterance.
    Recording = 2,
    /// Utterance handed to the transcriber.
    Transcribing = 3,
    /// Streaming a reply from the dialogue backend.
    Conversing = 4,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Listening,
            2 => Self::Recording,
            3 => Self::Transcribing,
            4 => Self::Conversing,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Recording => write!(f, "recording"),
            Self::Transcribing => write!(f, "transcribing"),
            Self::Conversing => write!(f, "conversing"),
        }
    }
}

/// Thread-safe pipeline state, shareable via `Arc`.
#[derive(Debug)]
pub struct PipelineStateMachine {
    state: AtomicU8,
}

impl PipelineStateMachine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(PipelineState::Idle as u8),
        })
    }

    /// Current state.
    pub fn current(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition from Idle to Listening.
    pub fn start_listening(&self) -> bool {
        self.transition(PipelineState::Idle, PipelineState::Listening)
    }

    /// Transition to Recording. Allowed from Listening (wake trigger) or
    /// Conversing (barge-in proceeds straight to the new utterance).
    pub fn start_recording(&self) -> bool {
        self.transition(PipelineState::Listening, PipelineState::Recording)
            || self.transition(PipelineState::Conversing, PipelineState::Recording)
    }

    /// Transition from Recording to Transcribing.
    pub fn start_transcribing(&self) -> bool {
        self.transition(PipelineState::Recording, PipelineState::Transcribing)
    }

    /// Transition from Transcribing to Conversing.
    pub fn start_conversing(&self) -> bool {
        self.transition(PipelineState::Transcribing, PipelineState::Conversing)
    }

    /// Force back to Idle (turn complete, per-turn fault, or shutdown).
    pub fn reset(&self) {
        self.state.store(PipelineState::Idle as u8, Ordering::Release);
    }

    fn transition(&self, from: PipelineState, to: PipelineState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for PipelineStateMachine {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(PipelineState::Idle as u8),
        }
    }
}
