use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// File-content validator run against a freshly downloaded file before it's
/// trusted; on failure the caller deletes the file.
pub type Validator = fn(&[u8]) -> bool;

/// The one polymorphic contract every chat platform integration implements.
/// Alexa doesn't — it's receive-only and replies via a JSON envelope built
/// directly in the dispatcher, not through this trait.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Send `text` to `target`, chunking to the platform's limit. Returns
    /// `true` if the message was ultimately delivered by any fallback path.
    async fn send_message(&self, target: &str, text: &str, reply_to: Option<&str>) -> bool;

    /// Upload and send a voice note (OGG/Opus by convention).
    async fn send_voice(&self, target: &str, file: &Path, reply_to: Option<&str>) -> bool;

    /// Upload and send a generic audio file.
    async fn send_audio(&self, target: &str, file: &Path, reply_to: Option<&str>) -> bool;

    /// Resolve `file_id` to a URL and download it to `output_path`, applying
    /// the platform's size cap and path-safety checks. If `validate` is
    /// given and it returns false on the downloaded bytes, the file is
    /// deleted and this returns `false`.
    async fn download_file(
        &self,
        file_id: &str,
        output_path: &Path,
        validate: Option<Validator>,
    ) -> Result<bool>;

    /// Fire-and-forget: never surfaces an error to the caller.
    async fn set_reaction(&self, target: &str, message_id: &str, emoji: &str);

    /// Fire-and-forget typing indicator.
    async fn send_typing(&self, target: &str);

    /// Fire-and-forget read receipt.
    async fn mark_read(&self, target: &str, message_id: &str);
}

/// Validate a platform-returned file path before using it to build a
/// download URL: no traversal, and restricted to a safe character set.
pub fn is_safe_file_path(path: &str) -> bool {
    if path.contains("..") || path.is_empty() {
        return false;
    }
    path.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b'_' | b'.' | b'-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_traversal() {
        assert!(!is_safe_file_path("../../etc/passwd"));
        assert!(!is_safe_file_path("foo/../bar"));
    }

    #[test]
    fn rejects_unsafe_characters() {
        assert!(!is_safe_file_path("foo;rm -rf /"));
        assert!(!is_safe_file_path(""));
    }

    #[test]
    fn accepts_normal_path() {
        assert!(is_safe_file_path("photos/file_123.jpg"));
    }
}
