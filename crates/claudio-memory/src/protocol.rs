//! UDS ping-pong protocol for the memory engine. Newline-delimited JSON:
//! one request object in, one response object out, per line. Each bot gets
//! its own on-disk database, opened lazily on first use and cached for the
//! life of the daemon.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::db;
use crate::embedding::Embedder;
use crate::llm::ConsolidationExtractor;
use crate::manager::{format_memories, MemoryManager};
use crate::types::{MemoryKind, Turn};

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
enum Request {
    Ping,
    Retrieve {
        bot_id: String,
        query: String,
        #[serde(default = "default_top_k")]
        top_k: usize,
    },
    Consolidate {
        bot_id: String,
        #[serde(default)]
        turns: Vec<Turn>,
        #[serde(rename = "_timeout", default)]
        timeout_secs: Option<u64>,
    },
    Reconsolidate {
        bot_id: String,
    },
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Serialize)]
struct Response {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Response {
    fn ok() -> Self {
        Self { ok: true, result: None, error: None }
    }

    fn ok_with(result: serde_json::Value) -> Self {
        Self { ok: true, result: Some(result), error: None }
    }

    fn err(message: impl Into<String>) -> Self {
        Self { ok: false, result: None, error: Some(message.into()) }
    }
}

/// Shared daemon state: one [`MemoryManager`] per bot, opened lazily against
/// `<bots_dir>/<bot_id>/memory.db`, plus the embedder and LLM extractor every
/// manager is built with.
pub struct MemoryDaemon {
    bots_dir: PathBuf,
    managers: AsyncMutex<HashMap<String, Arc<MemoryManager>>>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn ConsolidationExtractor>,
}

impl MemoryDaemon {
    pub fn new(bots_dir: PathBuf, embedder: Arc<dyn Embedder>, extractor: Arc<dyn ConsolidationExtractor>) -> Self {
        Self {
            bots_dir,
            managers: AsyncMutex::new(HashMap::new()),
            embedder,
            extractor,
        }
    }

    async fn manager_for(&self, bot_id: &str) -> crate::error::Result<Arc<MemoryManager>> {
        let mut managers = self.managers.lock().await;
        if let Some(existing) = managers.get(bot_id) {
            return Ok(existing.clone());
        }

        let db_path = self.bots_dir.join(bot_id).join("memory.db");
        let conn = db::open(&db_path)?;
        let manager = Arc::new(MemoryManager::new(conn, self.embedder.clone())?);
        managers.insert(bot_id.to_string(), manager.clone());
        Ok(manager)
    }

    /// Accept connections on `listener` until the process is terminated.
    /// Each connection is handled on its own task so a slow consolidate call
    /// on one bot never blocks a ping from another.
    pub async fn serve(self: Arc<Self>, listener: UnixListener) {
        loop {
            let (stream, _addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    error!(error = %err, "failed to accept memory socket connection");
                    continue;
                }
            };
            let daemon = self.clone();
            tokio::spawn(async move {
                if let Err(err) = daemon.handle_connection(stream).await {
                    warn!(error = %err, "memory protocol connection ended with an error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: UnixStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = self.dispatch(&line).await;
            let mut payload = serde_json::to_vec(&response).unwrap_or_else(|_| b"{\"ok\":false}".to_vec());
            payload.push(b'\n');
            write_half.write_all(&payload).await?;
        }
        Ok(())
    }

    async fn dispatch(&self, line: &str) -> Response {
        let request: Request = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(err) => {
                debug!(error = %err, "malformed memory protocol request");
                return Response::err(format!("malformed request: {err}"));
            }
        };

        match request {
            Request::Ping => Response::ok(),
            Request::Retrieve { bot_id, query, top_k } => self.handle_retrieve(&bot_id, &query, top_k).await,
            Request::Consolidate { bot_id, turns, timeout_secs } => {
                self.handle_consolidate(&bot_id, turns, timeout_secs).await
            }
            Request::Reconsolidate { bot_id } => self.handle_reconsolidate(&bot_id).await,
        }
    }

    async fn handle_retrieve(&self, bot_id: &str, query: &str, top_k: usize) -> Response {
        let manager = match self.manager_for(bot_id).await {
            Ok(m) => m,
            Err(err) => return Response::err(err.to_string()),
        };
        let query = query.to_string();
        let kinds = [MemoryKind::Episodic, MemoryKind::Semantic, MemoryKind::Procedural];
        let result = tokio::task::spawn_blocking(move || manager.retrieve(&query, top_k, &kinds)).await;

        match result {
            Ok(Ok(memories)) => Response::ok_with(serde_json::json!(format_memories(&memories))),
            Ok(Err(err)) => Response::err(err.to_string()),
            Err(join_err) => Response::err(format!("retrieve task panicked: {join_err}")),
        }
    }

    async fn handle_consolidate(&self, bot_id: &str, turns: Vec<Turn>, timeout_secs: Option<u64>) -> Response {
        let manager = match self.manager_for(bot_id).await {
            Ok(m) => m,
            Err(err) => return Response::err(err.to_string()),
        };
        let extractor = self.extractor.clone();
        let work = tokio::task::spawn_blocking(move || manager.consolidate(extractor.as_ref(), &turns));

        let timeout = std::time::Duration::from_secs(timeout_secs.unwrap_or(120));
        match tokio::time::timeout(timeout, work).await {
            Ok(Ok(Ok(report))) => {
                info!(bot_id, stored = report.stored, skipped = report.skipped_duplicate, "consolidation complete");
                Response::ok_with(serde_json::to_value(report).unwrap_or(serde_json::Value::Null))
            }
            Ok(Ok(Err(err))) => Response::err(err.to_string()),
            Ok(Err(join_err)) => Response::err(format!("consolidate task panicked: {join_err}")),
            Err(_) => Response::err("consolidate timed out"),
        }
    }

    async fn handle_reconsolidate(&self, bot_id: &str) -> Response {
        let manager = match self.manager_for(bot_id).await {
            Ok(m) => m,
            Err(err) => return Response::err(err.to_string()),
        };
        let extractor = self.extractor.clone();
        let result = tokio::task::spawn_blocking(move || manager.reconsolidate(extractor.as_ref())).await;

        match result {
            Ok(Ok(report)) => Response::ok_with(serde_json::to_value(report).unwrap_or(serde_json::Value::Null)),
            Ok(Err(err)) => Response::err(err.to_string()),
            Err(join_err) => Response::err(format!("reconsolidate task panicked: {join_err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_request_parses_without_fields() {
        let req: Request = serde_json::from_str(r#"{"command":"ping"}"#).unwrap();
        assert!(matches!(req, Request::Ping));
    }

    #[test]
    fn retrieve_request_defaults_top_k() {
        let req: Request = serde_json::from_str(r#"{"command":"retrieve","bot_id":"b1","query":"hi"}"#).unwrap();
        match req {
            Request::Retrieve { top_k, .. } => assert_eq!(top_k, 5),
            _ => panic!("expected Retrieve"),
        }
    }

    #[test]
    fn response_omits_null_fields_when_serialized() {
        let resp = Response::ok();
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);
    }
}
