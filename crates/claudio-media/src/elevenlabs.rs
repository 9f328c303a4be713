use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use crate::error::{MediaError, Result};
use crate::markdown::strip_for_speech;
use crate::provider::{truncate_for_tts, validate_stt_input, SttProvider, TtsProvider};

pub struct ElevenLabsProvider {
    http: Client,
    api_key: String,
    stt_model: String,
}

impl ElevenLabsProvider {
    pub fn new(api_key: String, stt_model: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            stt_model,
        }
    }
}

#[async_trait]
impl SttProvider for ElevenLabsProvider {
    async fn transcribe(&self, audio_bytes: &[u8], format: &str) -> Result<String> {
        validate_stt_input(audio_bytes, format)?;

        let part = reqwest::multipart::Part::bytes(audio_bytes.to_vec())
            .file_name(format!("audio.{format}"));
        let form = reqwest::multipart::Form::new()
            .text("model_id", self.stt_model.clone())
            .part("file", part);

        let resp = self
            .http
            .post("https://api.elevenlabs.io/v1/speech-to-text")
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
        if !status.is_success() {
            return Err(MediaError::ProviderError {
                status: status.as_u16(),
                body: body.to_string(),
            });
        }
        body["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| MediaError::ProviderError {
                status: status.as_u16(),
                body: "missing text field in STT response".to_string(),
            })
    }
}

pub struct ElevenLabsTts {
    http: Client,
    api_key: String,
}

impl ElevenLabsTts {
    pub fn new(api_key: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsTts {
    async fn synthesize(&self, text: &str, voice: &str, model: &str) -> Result<Vec<u8>> {
        let stripped = strip_for_speech(text);
        let (capped, was_truncated) = truncate_for_tts(&stripped);
        if was_truncated {
            info!(voice, model, "TTS input truncated to provider character cap");
        }

        let resp = self
            .http
            .post(format!("https://api.elevenlabs.io/v1/text-to-speech/{voice}"))
            .header("xi-api-key", &self.api_key)
            .json(&json!({"text": capped, "model_id": model}))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MediaError::ProviderError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}
