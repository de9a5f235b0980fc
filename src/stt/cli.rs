//! STT via an external whisper-cli style subprocess.
//!
//! The configured command (e.g. `whisper-cli -m model.bin -l en -otxt -f`)
//! is run with the WAV path appended. Some builds write the transcript to a
//! `<wav>.txt` sidecar instead of stdout; the sidecar wins when present.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::process::Command;
use tracing::debug;

use super::{clip_transcript, SttEngine};

/// How long a single transcription run may take.
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(60);

/// External transcriber subprocess.
pub struct WhisperCli {
    command: Vec<String>,
}

impl WhisperCli {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.split_whitespace().map(str::to_string).collect(),
        }
    }
}

impl SttEngine for WhisperCli {
    async fn transcribe(&self, wav_path: &Path) -> anyhow::Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .context("Empty whisper command")?;

        debug!(program, ?wav_path, "Running STT subprocess");
        let output = tokio::time::timeout(
            TRANSCRIBE_TIMEOUT,
            Command::new(program).args(args).arg(wav_path).output(),
        )
        .await
        .context("STT subprocess timed out")?
        .context("Failed to run STT subprocess")?;

        if !output.status.success() {
            bail!(
                "STT subprocess exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        // Prefer the sidecar transcript when the tool wrote one.
        let sidecar = wav_path.with_extension("wav.txt");
        if sidecar.is_file() {
            let text = tokio::fs::read_to_string(&sidecar).await.unwrap_or_default();
            let _ = tokio::fs::remove_file(&sidecar).await;
            return Ok(clip_transcript(text.trim()));
        }

        Ok(parse_stdout(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extract a transcript from whisper-cli stdout: the first non-empty line
/// that is not a `[timestamp]` line, else the trimmed whole output.
fn parse_stdout(stdout: &str) -> String {
    for line in stdout.lines() {
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('[') {
            return clip_transcript(line);
        }
    }
    clip_transcript(stdout.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdout_skips_timestamp_lines() {
        let out = "[00:00:00 --> 00:00:02]\n  what time is it\n";
        assert_eq!(parse_stdout(out), "what time is it");
    }

    #[test]
    fn stdout_empty_yields_empty_transcript() {
        assert_eq!(parse_stdout(""), "");
        assert_eq!(parse_stdout("   \n  \n"), "");
    }

    #[test]
    fn stdout_falls_back_to_whole_output() {
        assert_eq!(parse_stdout("  hello world  "), "hello world");
    }
}
