//! Configuration: an immutable snapshot loaded once at startup.
//!
//! Read from `~/.voice-node/config.json` with per-field defaults, then
//! overridden by environment variables. Parse failures log a warning and
//! fall back to defaults rather than aborting.

pub mod paths;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use paths::get_data_dir;

/// Hard cap on a system prompt loaded from file; keeps voice context small.
const PROMPT_FILE_MAX_CHARS: usize = 1_500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dialogue backend base URL (chat-completions style).
    pub backend_url: String,
    pub agent_id: String,
    pub model: String,

    pub sample_rate: u32,
    pub frame_samples: usize,
    pub ring_buffer_seconds: f32,
    pub frame_queue_frames: usize,
    /// Input device name; `None` uses the system default.
    pub input_device: Option<String>,

    /// "" (auto), "energy", or "manual".
    pub wake_engine: String,
    pub wake_threshold: f32,
    pub wake_phrase: String,
    pub strip_wake_phrase: bool,

    pub vad_silence_threshold: f32,
    pub vad_silence_seconds: f32,
    pub max_utterance_seconds: f32,
    pub min_utterance_seconds: f32,

    /// External transcriber command; the WAV path is appended.
    pub whisper_cmd: String,
    pub stt_endpoint: Option<String>,
    pub stt_api_key: Option<String>,

    pub system_prompt: String,
    /// Optional file whose contents replace `system_prompt` (truncated).
    pub system_prompt_file: String,
    pub history_turns: usize,

    /// Named pipe for spoken output; empty means `<data dir>/tts_pipe`.
    pub tts_fifo: String,
    pub tts_interrupt_signal: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:18789".to_string(),
            agent_id: "main".to_string(),
            model: "assistant:main".to_string(),
            sample_rate: 16_000,
            frame_samples: 1_280,
            ring_buffer_seconds: 2.0,
            frame_queue_frames: 200,
            input_device: None,
            wake_engine: String::new(),
            wake_threshold: 0.5,
            wake_phrase: "hey assistant".to_string(),
            strip_wake_phrase: true,
            vad_silence_threshold: 0.08,
            vad_silence_seconds: 0.7,
            max_utterance_seconds: 15.0,
            min_utterance_seconds: 0.3,
            whisper_cmd: String::new(),
            stt_endpoint: None,
            stt_api_key: None,
            system_prompt: "You are a concise voice assistant. Reply in short, spoken \
                            sentences. Avoid lists and markdown."
                .to_string(),
            system_prompt_file: String::new(),
            history_turns: 20,
            tts_fifo: String::new(),
            tts_interrupt_signal: "__STOP__".to_string(),
        }
    }
}

impl Config {
    /// Ring buffer capacity in samples.
    pub fn ring_capacity(&self) -> usize {
        (self.ring_buffer_seconds * self.sample_rate as f32) as usize
    }

    /// Resolved spoken-output pipe path.
    pub fn tts_fifo_path(&self) -> PathBuf {
        if self.tts_fifo.is_empty() {
            get_data_dir().join("tts_pipe")
        } else {
            PathBuf::from(&self.tts_fifo)
        }
    }

    /// Whether the manual (press-Enter) trigger was requested via env.
    pub fn manual_trigger_requested() -> bool {
        matches!(
            std::env::var("VOICE_NODE_MANUAL_TRIGGER").as_deref(),
            Ok("1") | Ok("true") | Ok("yes")
        )
    }
}

/// Path to config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.json")
}

/// Load the startup config snapshot: file, env overrides, prompt file.
pub fn load_config() -> Config {
    let mut config: Config = read_json_file(&get_config_path()).unwrap_or_default();

    if let Ok(url) = std::env::var("VOICE_NODE_BACKEND_URL") {
        config.backend_url = url.trim_end_matches('/').to_string();
    }
    if let Ok(fifo) = std::env::var("VOICE_NODE_TTS_FIFO") {
        config.tts_fifo = fifo;
    }
    if let Ok(cmd) = std::env::var("VOICE_NODE_WHISPER_CMD") {
        config.whisper_cmd = cmd;
    }

    apply_prompt_file(&mut config);
    config
}

/// Replace the system prompt with the prompt file contents, truncated.
fn apply_prompt_file(config: &mut Config) {
    let file = config.system_prompt_file.trim();
    if file.is_empty() {
        return;
    }
    let path = PathBuf::from(shellexpand_home(file));
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            config.system_prompt = if contents.chars().count() > PROMPT_FILE_MAX_CHARS {
                contents.chars().take(PROMPT_FILE_MAX_CHARS).collect()
            } else {
                contents
            };
        }
        Err(e) => warn!("Could not read system_prompt_file {}: {e}", path.display()),
    }
}

/// Expand a leading `~/` to the home directory.
fn shellexpand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = Config::default();
        assert_eq!(c.sample_rate, 16_000);
        assert_eq!(c.ring_capacity(), 32_000);
        assert_eq!(c.history_turns, 20);
        assert!(c.strip_wake_phrase);
    }

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let c: Config =
            serde_json::from_str(r#"{"wake_threshold": 0.9, "wake_engine": "manual"}"#).unwrap();
        assert_eq!(c.wake_threshold, 0.9);
        assert_eq!(c.wake_engine, "manual");
        assert_eq!(c.sample_rate, 16_000);
        assert_eq!(c.backend_url, "http://127.0.0.1:18789");
    }

    #[test]
    fn prompt_file_contents_replace_prompt_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let prompt_path = dir.path().join("soul.md");
        std::fs::write(&prompt_path, "p".repeat(2_000)).unwrap();
        let mut c = Config {
            system_prompt_file: prompt_path.to_string_lossy().into_owned(),
            ..Config::default()
        };
        apply_prompt_file(&mut c);
        assert_eq!(c.system_prompt.chars().count(), PROMPT_FILE_MAX_CHARS);
    }

    #[test]
    fn missing_prompt_file_keeps_default_prompt() {
        let mut c = Config {
            system_prompt_file: "/nonexistent/prompt.md".to_string(),
            ..Config::default()
        };
        let before = c.system_prompt.clone();
        apply_prompt_file(&mut c);
        assert_eq!(c.system_prompt, before);
    }

    #[test]
    fn fifo_path_defaults_into_data_dir() {
        let c = Config::default();
        assert!(c.tts_fifo_path().ends_with("tts_pipe"));
        let c = Config {
            tts_fifo: "/tmp/pipe".to_string(),
            ..Config::default()
        };
        assert_eq!(c.tts_fifo_path(), PathBuf::from("/tmp/pipe"));
    }
}
