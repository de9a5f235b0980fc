//! Conversation history, streaming dialogue turns, and reply segmentation.

pub mod segment;
pub mod stream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// How many trailing history entries each request carries. Retention is
/// larger (config `history_turns`); the request window keeps context small.
pub const REQUEST_WINDOW_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Bounded recency window of conversation turns.
///
/// Owned by the orchestrator and mutated only between turns; the oldest
/// entries are evicted first once `max_turns` is exceeded.
pub struct ConversationState {
    turns: Vec<ChatMessage>,
    max_turns: usize,
}

impl ConversationState {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns: max_turns.max(2),
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::assistant(content));
    }

    fn push(&mut self, msg: ChatMessage) {
        self.turns.push(msg);
        if self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(..excess);
        }
    }

    /// The trailing `n` turns, oldest first.
    pub fn window(&self, n: usize) -> &[ChatMessage] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }
}

/// Build the message list for one request: system instruction, trailing
/// history window (which already ends with the new user turn).
pub fn build_request_messages(
    system_prompt: &str,
    history: &ConversationState,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(REQUEST_WINDOW_TURNS + 1);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend_from_slice(history.window(REQUEST_WINDOW_TURNS));
    messages
}

/// Single-use cooperative cancellation signal scoped to one dialogue turn.
///
/// Once raised, no further speech segment from that turn reaches the sink
/// and the stream read stops at the next line boundary.
#[derive(Clone, Default)]
pub struct TurnCancellation {
    raised: Arc<AtomicBool>,
}

impl TurnCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_evicts_oldest_first() {
        let mut state = ConversationState::new(4);
        for i in 0..6 {
            state.push_user(format!("u{i}"));
        }
        assert_eq!(state.len(), 4);
        assert_eq!(state.turns()[0].content, "u2");
        assert_eq!(state.turns()[3].content, "u5");
    }

    #[test]
    fn request_messages_start_with_system_and_end_with_user() {
        let mut state = ConversationState::new(20);
        for i in 0..15 {
            state.push_user(format!("q{i}"));
            state.push_assistant(format!("a{i}"));
        }
        state.push_user("latest");
        let messages = build_request_messages("be brief", &state);
        assert_eq!(messages.len(), 1 + REQUEST_WINDOW_TURNS);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages.last().unwrap().content, "latest");
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }

    #[test]
    fn cancellation_is_sticky() {
        let cancel = TurnCancellation::new();
        assert!(!cancel.is_raised());
        let clone = cancel.clone();
        clone.raise();
        assert!(cancel.is_raised());
    }
}
