use async_trait::async_trait;

use crate::error::Result;

const MAX_STT_BYTES: usize = 20 * 1024 * 1024;
const TTS_TEXT_CAP: usize = 5000;

/// Speech-to-text: upload an audio blob, get text back.
#[async_trait]
pub trait SttProvider: Send + Sync {
    async fn transcribe(&self, audio_bytes: &[u8], format: &str) -> Result<String>;
}

/// Text-to-speech: send text, get an audio blob back.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str, model: &str) -> Result<Vec<u8>>;
}

/// Reject audio that's empty, oversized, or whose declared format contains
/// characters that have no business in a format identifier (defense against
/// header/parameter injection into the multipart request).
pub fn validate_stt_input(audio_bytes: &[u8], format: &str) -> Result<()> {
    use crate::error::MediaError;

    if audio_bytes.is_empty() {
        return Err(MediaError::InvalidAudio("empty audio".to_string()));
    }
    if audio_bytes.len() > MAX_STT_BYTES {
        return Err(MediaError::InvalidAudio("audio exceeds 20MB cap".to_string()));
    }
    if !format.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(MediaError::InvalidAudio(format!("unsafe format field: {format}")));
    }
    Ok(())
}

/// Truncate TTS input to the provider's stated character cap; callers log
/// at INFO when truncation actually happens.
pub fn truncate_for_tts(text: &str) -> (String, bool) {
    if text.chars().count() <= TTS_TEXT_CAP {
        (text.to_string(), false)
    } else {
        let truncated: String = text.chars().take(TTS_TEXT_CAP).collect();
        (truncated, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_audio() {
        assert!(validate_stt_input(&[], "ogg").is_err());
    }

    #[test]
    fn rejects_oversized_audio() {
        let big = vec![0u8; MAX_STT_BYTES + 1];
        assert!(validate_stt_input(&big, "ogg").is_err());
    }

    #[test]
    fn rejects_format_metacharacters() {
        assert!(validate_stt_input(b"data", "ogg; rm -rf").is_err());
    }

    #[test]
    fn accepts_valid_input() {
        assert!(validate_stt_input(b"data", "ogg").is_ok());
    }

    #[test]
    fn truncate_leaves_short_text_untouched() {
        let (out, truncated) = truncate_for_tts("short");
        assert_eq!(out, "short");
        assert!(!truncated);
    }

    #[test]
    fn truncate_caps_long_text() {
        let long = "a".repeat(TTS_TEXT_CAP + 100);
        let (out, truncated) = truncate_for_tts(&long);
        assert_eq!(out.chars().count(), TTS_TEXT_CAP);
        assert!(truncated);
    }
}
