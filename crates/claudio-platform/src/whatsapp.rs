use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{error, warn};

use crate::chunk::split_chunks;
use crate::client::{is_safe_file_path, PlatformClient, Validator};
use crate::error::{PlatformError, Result};
use crate::retry::with_retries;

const CHUNK_LIMIT: usize = 4096;
const MAX_DOWNLOAD_BYTES: u64 = 16 * 1024 * 1024;

pub struct WhatsAppClient {
    http: Client,
    phone_number_id: String,
    access_token: String,
}

impl WhatsAppClient {
    pub fn new(phone_number_id: String, access_token: String) -> Self {
        Self {
            http: Client::new(),
            phone_number_id,
            access_token,
        }
    }

    fn graph_url(&self, path: &str) -> String {
        format!("https://graph.facebook.com/v19.0/{path}")
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        with_retries(path, || async {
            let resp = self
                .http
                .post(self.graph_url(path))
                .bearer_auth(&self.access_token)
                .json(&body)
                .send()
                .await?;
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

    async fn send_text_chunk(&self, target: &str, text: &str, reply_to: Option<&str>) -> bool {
        let attempts = [
            json!({
                "messaging_product": "whatsapp",
                "to": target,
                "context": reply_to.map(|r| json!({"message_id": r})),
                "text": {"body": text, "preview_url": false},
            }),
            json!({
                "messaging_product": "whatsapp",
                "to": target,
                "text": {"body": text},
            }),
        ];

        for (idx, body) in attempts.into_iter().enumerate() {
            let path = format!("{}/messages", self.phone_number_id);
            match self.post(&path, body).await {
                Ok(_) => return true,
                Err(err) => warn!(attempt = idx, error = %err, "whatsapp send attempt failed"),
            }
        }
        error!(target, "all whatsapp send fallbacks exhausted for chunk");
        false
    }

    /// Two-step flow: upload the binary to the media endpoint, then send a
    /// message referencing the returned media id.
    async fn upload_then_send(&self, target: &str, file: &Path, kind: &str) -> bool {
        let Ok(bytes) = tokio::fs::read(file).await else {
            error!(path = %file.display(), "failed to read media file for upload");
            return false;
        };
        let mime = if kind == "audio" { "audio/ogg" } else { "audio/ogg" };
        let part = reqwest::multipart::Part::bytes(bytes).mime_str(mime).ok();
        let Some(part) = part else {
            return false;
        };
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .part("file", part);

        let upload_path = format!("{}/media", self.phone_number_id);
        let media_id = match self
            .http
            .post(self.graph_url(&upload_path))
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                let json: serde_json::Value = match resp.json().await {
                    Ok(j) => j,
                    Err(_) => return false,
                };
                match json["id"].as_str() {
                    Some(id) => id.to_string(),
                    None => return false,
                }
            }
            _ => return false,
        };

        let body = json!({
            "messaging_product": "whatsapp",
            "to": target,
            "type": kind,
            (kind): {"id": media_id},
        });
        let path = format!("{}/messages", self.phone_number_id);
        self.post(&path, body).await.is_ok()
    }
}

#[async_trait]
impl PlatformClient for WhatsAppClient {
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

    async fn send_voice(&self, target: &str, file: &Path, _reply_to: Option<&str>) -> bool {
        self.upload_then_send(target, file, "audio").await
    }

    async fn send_audio(&self, target: &str, file: &Path, _reply_to: Option<&str>) -> bool {
        self.upload_then_send(target, file, "audio").await
    }

    async fn download_file(
        &self,
        file_id: &str,
        output_path: &Path,
        validate: Option<Validator>,
    ) -> Result<bool> {
        let info = with_retries("get_media_url", || async {
            let resp = self
                .http
                .get(self.graph_url(file_id))
                .bearer_auth(&self.access_token)
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(PlatformError::ApiError {
                    status: resp.status().as_u16(),
                    body: String::new(),
                });
            }
            resp.json::<serde_json::Value>()
                .await
                .map_err(PlatformError::Http)
        })
        .await?;

        let url = info["url"]
            .as_str()
            .ok_or_else(|| PlatformError::InvalidDownload("missing media url".to_string()))?;
        if !url.starts_with("https://") {
            return Err(PlatformError::InvalidDownload("non-HTTPS download URL".to_string()));
        }
        if let Some(path_part) = url.splitn(4, '/').nth(3) {
            if !is_safe_file_path(path_part) {
                return Err(PlatformError::InvalidDownload("unsafe media path".to_string()));
            }
        }

        let bytes = with_retries("download_media", || async {
            let resp = self
                .http
                .get(url)
                .bearer_auth(&self.access_token)
                .send()
                .await?;
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
            "messaging_product": "whatsapp",
            "to": target,
            "type": "reaction",
            "reaction": {"message_id": message_id, "emoji": emoji},
        });
        let path = format!("{}/messages", self.phone_number_id);
        let _ = self.post(&path, body).await;
    }

    async fn send_typing(&self, _target: &str) {
        // WhatsApp Cloud API has no standalone typing-indicator endpoint; no-op.
    }

    async fn mark_read(&self, _target: &str, message_id: &str) {
        let body = json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": message_id,
        });
        let path = format!("{}/messages", self.phone_number_id);
        let _ = self.post(&path, body).await;
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
    fn graph_url_is_well_formed() {
        let client = WhatsAppClient::new("123".to_string(), "token".to_string());
        assert_eq!(client.graph_url("123/messages"), "https://graph.facebook.com/v19.0/123/messages");
    }
}
