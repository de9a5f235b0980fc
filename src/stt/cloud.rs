//! Cloud STT adapter (OpenAI-compatible transcription endpoint).

use std::path::Path;

use reqwest::multipart;
use tracing::debug;

use super::{clip_transcript, SttEngine};

/// OpenAI-compatible transcription endpoint.
pub struct CloudStt {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl CloudStt {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

impl SttEngine for CloudStt {
    async fn transcribe(&self, wav_path: &Path) -> anyhow::Result<String> {
        let wav = tokio::fs::read(wav_path).await?;
        debug!(
            bytes = wav.len(),
            endpoint = %self.endpoint,
            "Sending audio to STT endpoint"
        );

        let file_part = multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;

        let form = multipart::Form::new()
            .text("model", "whisper-1")
            .part("file", file_part);

        let mut req = self.client.post(&self.endpoint).multipart(form);

        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("STT API error {}: {}", status, body);
        }

        let json: serde_json::Value = resp.json().await?;
        let text = json["text"].as_str().unwrap_or("").trim();

        Ok(clip_transcript(text))
    }
}
