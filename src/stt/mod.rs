//! Speech-to-Text adapters.
//!
//! Provides a common `SttEngine` trait with implementations for:
//! - An external whisper-cli style subprocess
//! - An OpenAI-compatible transcription endpoint (cloud)
//!
//! Transcription is best-effort: a missing transcriber degrades the loop to
//! a no-op per turn (the orchestrator discards the utterance), it is not a
//! per-turn error.

pub mod cli;
pub mod cloud;

use std::path::Path;

use tracing::warn;

/// Longest transcript we will forward to the dialogue backend.
const MAX_TRANSCRIPT_CHARS: usize = 2_000;

/// Common trait for all STT engines.
#[allow(async_fn_in_trait)]
pub trait SttEngine: Send + Sync {
    /// Transcribe a 16-bit PCM WAV file to text. An empty string means
    /// "no transcript", not an error.
    async fn transcribe(&self, wav_path: &Path) -> anyhow::Result<String>;
}

/// Enum-dispatch wrapper over all STT backends.
///
/// This avoids dyn-compatibility issues with async trait methods.
pub enum SttAdapter {
    Cli(cli::WhisperCli),
    Cloud(cloud::CloudStt),
}

impl SttAdapter {
    /// Transcribe audio using the underlying engine.
    pub async fn transcribe(&self, wav_path: &Path) -> anyhow::Result<String> {
        match self {
            Self::Cli(e) => e.transcribe(wav_path).await,
            Self::Cloud(e) => e.transcribe(wav_path).await,
        }
    }
}

/// Create an STT engine from config values, if any is configured.
///
/// Precedence mirrors the config surface: an explicit whisper command wins,
/// then a cloud endpoint. `None` means transcription is unavailable.
pub fn create_stt_engine(
    whisper_cmd: &str,
    endpoint: Option<&str>,
    api_key: Option<&str>,
) -> Option<SttAdapter> {
    if !whisper_cmd.trim().is_empty() {
        return Some(SttAdapter::Cli(cli::WhisperCli::new(whisper_cmd)));
    }
    if let Some(url) = endpoint {
        if !url.trim().is_empty() {
            return Some(SttAdapter::Cloud(cloud::CloudStt::new(
                url,
                api_key.map(|s| s.to_string()),
            )));
        }
    }
    warn!("No STT engine configured; utterances will be discarded");
    None
}

/// Clip a transcript to the forwarding limit.
pub(crate) fn clip_transcript(text: &str) -> String {
    if text.chars().count() <= MAX_TRANSCRIPT_CHARS {
        return text.to_string();
    }
    text.chars().take(MAX_TRANSCRIPT_CHARS).collect()
}

/// Encode i16 audio samples as 16-bit PCM WAV bytes (mono).
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let num_samples = samples.len() as u32;
    let bytes_per_sample: u16 = 2;
    let num_channels: u16 = 1;
    let data_size = num_samples * bytes_per_sample as u32;
    let file_size = 36 + data_size; // RIFF header is 44 bytes total, minus 8 for RIFF+size

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt sub-chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // sub-chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buf.extend_from_slice(&num_channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    let byte_rate = sample_rate * num_channels as u32 * bytes_per_sample as u32;
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    let block_align = num_channels * bytes_per_sample;
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&(bytes_per_sample * 8).to_le_bytes()); // bits per sample

    // data sub-chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

/// Write samples to `path` as a WAV file.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> anyhow::Result<()> {
    std::fs::write(path, encode_wav(samples, sample_rate))?;
    Ok(())
}
