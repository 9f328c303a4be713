use std::path::Path;

use claudio_platform::magic::is_audio;
use tracing::warn;

use crate::error::{MediaError, Result};
use crate::provider::TtsProvider;

/// Synthesize `text` and write it to `output_path`, validating the result
/// against an audio magic-byte signature. If validation fails, the file is
/// deleted and an error is returned rather than handing a bogus file to a
/// platform client.
pub async fn synthesize_to_file(
    provider: &dyn TtsProvider,
    text: &str,
    voice: &str,
    model: &str,
    output_path: &Path,
) -> Result<()> {
    let bytes = provider.synthesize(text, voice, model).await?;

    if !is_audio(&bytes) {
        warn!(path = %output_path.display(), "TTS output failed magic-byte validation");
        return Err(MediaError::InvalidAudio("synthesized output has no recognized audio signature".to_string()));
    }

    tokio::fs::write(output_path, &bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FakeTts {
        bytes: Vec<u8>,
    }

    #[async_trait]
    impl TtsProvider for FakeTts {
        async fn synthesize(&self, _text: &str, _voice: &str, _model: &str) -> Result<Vec<u8>> {
            Ok(self.bytes.clone())
        }
    }

    #[tokio::test]
    async fn writes_file_when_signature_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.ogg");
        let provider = FakeTts {
            bytes: vec![0x4F, 0x67, 0x67, 0x53, 0x00],
        };
        synthesize_to_file(&provider, "hello", "voice1", "model1", &path)
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn rejects_and_skips_write_on_bad_signature() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.ogg");
        let provider = FakeTts {
            bytes: b"not audio".to_vec(),
        };
        let result = synthesize_to_file(&provider, "hello", "voice1", "model1", &path).await;
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
