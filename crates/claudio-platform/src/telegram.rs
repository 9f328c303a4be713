use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info, warn};

use crate::chunk::split_chunks;
use crate::client::{is_safe_file_path, PlatformClient, Validator};
use crate::error::{PlatformError, Result};
use crate::retry::with_retries;

const CHUNK_LIMIT: usize = 4096;
const MAX_DOWNLOAD_BYTES: u64 = 20 * 1024 * 1024;

pub struct TelegramClient {
    http: Client,
    bot_token: String,
}

impl TelegramClient {
    pub fn new(bot_token: String) -> Self {
        Self {
            http: Client::new(),
            bot_token,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        with_retries(method, || async {
            let resp = self.http.post(self.api_url(method)).json(&body).send().await?;
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if status.is_success() {
                serde_json::from_str(&text).map_err(|_| PlatformError::ApiError {
                    status: status.as_u16(),
                    body: text,
                })
            } else {
                Err(PlatformError::ApiError {
                    status: status.as_u16(),
                    body: text,
                })
            }
        })
        .await
    }

    async fn send_text_chunk(&self, chat_id: &str, text: &str, reply_to: Option<&str>) -> bool {
        let attempts: [serde_json::Value; 3] = [
            {
                let mut body = json!({"chat_id": chat_id, "text": text, "parse_mode": "MarkdownV2"});
                if let Some(r) = reply_to {
                    body["reply_to_message_id"] = json!(r);
                }
                body
            },
            {
                let mut body = json!({"chat_id": chat_id, "text": text});
                if let Some(r) = reply_to {
                    body["reply_to_message_id"] = json!(r);
                }
                body
            },
            json!({"chat_id": chat_id, "text": text}),
        ];

        for (idx, body) in attempts.into_iter().enumerate() {
            match self.call("sendMessage", body).await {
                Ok(_) => return true,
                Err(err) => warn!(attempt = idx, error = %err, "sendMessage attempt failed"),
            }
        }
        error!(chat_id, "all sendMessage fallbacks exhausted for chunk");
        false
    }
}

#[async_trait]
impl PlatformClient for TelegramClient {
    async fn send_message(&self, target: &str, text: &str, reply_to: Option<&str>) -> bool {
        let chunks = split_chunks(text, CHUNK_LIMIT);
        let mut all_ok = true;
        for (i, chunk) in chunks.iter().enumerate() {
            let reply = if i == 0 { reply_to } else { None };
            if !self.send_text_chunk(target, chunk, reply).await {
                all_ok = false;
            }
        }
        all_ok
    }

    async fn send_voice(&self, target: &str, file: &Path, reply_to: Option<&str>) -> bool {
        self.upload_media(target, file, reply_to, "sendVoice", "voice").await
    }

    async fn send_audio(&self, target: &str, file: &Path, reply_to: Option<&str>) -> bool {
        self.upload_media(target, file, reply_to, "sendAudio", "audio").await
    }

    async fn download_file(
        &self,
        file_id: &str,
        output_path: &Path,
        validate: Option<Validator>,
    ) -> Result<bool> {
        let info = self.call("getFile", json!({"file_id": file_id})).await?;
        let file_path = info["result"]["file_path"]
            .as_str()
            .ok_or_else(|| PlatformError::InvalidDownload("missing file_path".to_string()))?;

        if !is_safe_file_path(file_path) {
            return Err(PlatformError::InvalidDownload(format!(
                "unsafe file_path: {file_path}"
            )));
        }

        let url = format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.bot_token, file_path
        );
        if !url.starts_with("https://") {
            return Err(PlatformError::InvalidDownload("non-HTTPS download URL".to_string()));
        }

        let bytes = with_retries("download_file", || async {
            let resp = self.http.get(&url).send().await?;
            if !resp.status().is_success() {
                return Err(PlatformError::ApiError {
                    status: resp.status().as_u16(),
                    body: String::new(),
                });
            }
            Ok(resp.bytes().await?)
        })
        .await?;

        if bytes.is_empty() || bytes.len() as u64 > MAX_DOWNLOAD_BYTES {
            return Err(PlatformError::InvalidDownload("empty or oversized body".to_string()));
        }

        if let Some(validate_fn) = validate {
            if !validate_fn(&bytes) {
                return Ok(false);
            }
        }

        tokio::fs::write(output_path, &bytes).await?;
        set_owner_only(output_path).await;
        Ok(true)
    }

    async fn set_reaction(&self, target: &str, message_id: &str, emoji: &str) {
        let body = json!({
            "chat_id": target,
            "message_id": message_id,
            "reaction": [{"type": "emoji", "emoji": emoji}],
        });
        let _ = self.call("setMessageReaction", body).await;
    }

    async fn send_typing(&self, target: &str) {
        let body = json!({"chat_id": target, "action": "typing"});
        let _ = self.call("sendChatAction", body).await;
    }

    async fn mark_read(&self, _target: &str, _message_id: &str) {
        // Telegram has no explicit read-receipt API for bots; no-op.
    }
}

impl TelegramClient {
    async fn upload_media(
        &self,
        target: &str,
        file: &Path,
        reply_to: Option<&str>,
        method: &str,
        field: &str,
    ) -> bool {
        let Ok(bytes) = tokio::fs::read(file).await else {
            error!(path = %file.display(), "failed to read media file for upload");
            return false;
        };
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", target.to_string())
            .part(field.to_string(), part);
        if let Some(r) = reply_to {
            form = form.text("reply_to_message_id", r.to_string());
        }

        // reqwest::multipart::Form isn't Clone, so it can't be rebuilt per
        // attempt inside the generic retry loop; media upload gets a single
        // attempt rather than the 4-retry policy.
        match self.http.post(self.api_url(method)).multipart(form).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                error!(method, status = %resp.status(), "media upload failed");
                false
            }
            Err(err) => {
                error!(method, error = %err, "media upload transport error");
                false
            }
        }
    }
}

#[cfg(unix)]
async fn set_owner_only(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = tokio::fs::metadata(path).await {
        let mut perms = meta.permissions();
        perms.set_mode(0o600);
        let _ = tokio::fs::set_permissions(path, perms).await;
    }
}

#[cfg(not(unix))]
async fn set_owner_only(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_embeds_token() {
        let client = TelegramClient::new("123:ABC".to_string());
        assert_eq!(
            client.api_url("sendMessage"),
            "https://api.telegram.org/bot123:ABC/sendMessage"
        );
    }
}
