//! Client side of claudio-memory's ping-pong protocol. Every call degrades
//! gracefully: a connection failure, a malformed response, or an `"ok":false`
//! reply is logged and treated as "no memories available" rather than failing
//! the turn — per the pipeline's "best-effort, never fatal" rule.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, warn};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MemoryClient {
    socket_path: std::path::PathBuf,
}

impl MemoryClient {
    pub fn new(socket_path: impl Into<std::path::PathBuf>) -> Self {
        Self { socket_path: socket_path.into() }
    }

    /// `retrieve`: returns the formatted memory block to fold into the
    /// prompt, or `None` if the engine is unreachable or found nothing.
    pub async fn retrieve(&self, bot_id: &str, query: &str, top_k: usize) -> Option<String> {
        let request = serde_json::json!({
            "command": "retrieve",
            "bot_id": bot_id,
            "query": query,
            "top_k": top_k,
        });
        let response = self.call(&request).await?;
        response.as_str().map(|s| s.to_string())
    }

    /// `consolidate`: fire-and-forget from the caller's point of view — the
    /// pipeline spawns this and does not await its result on the hot path.
    pub async fn consolidate(&self, bot_id: &str, turns: &[(String, String)]) {
        let turns: Vec<Value> = turns
            .iter()
            .map(|(role, content)| serde_json::json!({"role": role, "content": content}))
            .collect();
        let request = serde_json::json!({
            "command": "consolidate",
            "bot_id": bot_id,
            "turns": turns,
        });
        let _ = self.call(&request).await;
    }

    pub async fn reconsolidate(&self, bot_id: &str) {
        let request = serde_json::json!({"command": "reconsolidate", "bot_id": bot_id});
        let _ = self.call(&request).await;
    }

    pub async fn ping(&self) -> bool {
        self.call(&serde_json::json!({"command": "ping"})).await.is_some()
    }

    async fn call(&self, request: &Value) -> Option<Value> {
        match tokio::time::timeout(CALL_TIMEOUT, self.call_inner(request)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                debug!(error = %err, "memory engine call failed, proceeding without memories");
                None
            }
            Err(_) => {
                warn!(path = %self.socket_path.display(), "memory engine call timed out");
                None
            }
        }
    }

    async fn call_inner(&self, request: &Value) -> std::io::Result<Value> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut payload = serde_json::to_vec(request)?;
        payload.push(b'\n');
        write_half.write_all(&payload).await?;

        let mut line = String::new();
        BufReader::new(read_half).read_line(&mut line).await?;

        let response: Value = serde_json::from_str(line.trim())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if response.get("ok").and_then(Value::as_bool) != Some(true) {
            let message = response.get("error").and_then(Value::as_str).unwrap_or("unknown error");
            return Err(std::io::Error::new(std::io::ErrorKind::Other, message.to_string()));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// True when a socket file exists at `path` — used to skip memory calls
/// entirely on bots that never started the engine, rather than paying a
/// connect-refused round trip on every message.
pub fn socket_present(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retrieve_degrades_to_none_when_socket_missing() {
        let client = MemoryClient::new("/nonexistent/claudio-memory-test.sock");
        let result = client.retrieve("bot1", "what do you know about me", 5).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn ping_is_false_when_socket_missing() {
        let client = MemoryClient::new("/nonexistent/claudio-memory-test.sock");
        assert!(!client.ping().await);
    }

    #[test]
    fn socket_present_reflects_filesystem_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.sock");
        assert!(!socket_present(&path));
        std::fs::write(&path, b"").unwrap();
        assert!(socket_present(&path));
    }
}
