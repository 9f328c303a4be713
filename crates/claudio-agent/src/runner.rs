//! Invokes the external AI CLI as a subprocess and translates its on-disk
//! side channels (stdout, notifier log, tool log) into an [`AgentResponse`].

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use claudio_core::filelog;
use claudio_core::Model;
use serde::Serialize;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{AgentError, Result};

const RUN_TIMEOUT: Duration = Duration::from_secs(600);
const TERM_GRACE: Duration = Duration::from_secs(5);
const KILL_GRACE: Duration = Duration::from_secs(5);
/// Above this, a turn is slow enough to be worth flagging to the health
/// controller rather than just `claude`'s own wall-clock variance.
const PREFLIGHT_WARN_THRESHOLD: Duration = Duration::from_secs(30);
const COMPONENT: &str = "agent";

/// Everything the runner needs to invoke the CLI for one turn.
pub struct AgentRequest {
    pub model: Model,
    /// Per-bot CLAUDE.md contents, passed via `--append-system-prompt`.
    pub system_prompt_extra: String,
    /// Fully assembled prompt text, piped via stdin (`-p -`).
    pub prompt: String,
    /// CSV tool authorisation list passed to `--tools`/`--allowedTools`.
    pub allowed_tools: Vec<String>,
    /// MCP server descriptor written to the MCP config temp file.
    pub mcp_servers: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AgentResponse {
    pub reply: String,
    pub notifications: Vec<String>,
    pub tool_uses: Vec<String>,
    pub usage: Option<TokenUsage>,
}

#[derive(Serialize)]
struct McpConfigFile {
    #[serde(rename = "mcpServers")]
    mcp_servers: serde_json::Value,
}

#[derive(serde::Deserialize)]
struct CliUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

#[derive(serde::Deserialize)]
struct CliOutput {
    result: String,
    #[serde(default)]
    usage: Option<CliUsage>,
    #[serde(default)]
    total_cost_usd: f64,
    #[serde(default)]
    duration_ms: u64,
}

/// Runs the AI CLI subprocess per invocation, in its own process group so
/// the escalating timeout can kill the whole tree with one `killpg`.
pub struct AgentRunner {
    cli_path: PathBuf,
    /// `claudio.log`, for the one case this emits to it directly: a slow
    /// CLI turn, which the health controller's log scan watches for.
    log_file: Option<PathBuf>,
}

impl AgentRunner {
    pub fn new(cli_path: impl Into<PathBuf>) -> Self {
        Self { cli_path: cli_path.into(), log_file: None }
    }

    pub fn with_log_file(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = Some(log_file.into());
        self
    }

    pub async fn run(&self, req: &AgentRequest) -> Result<AgentResponse> {
        let mcp_config = write_temp_json(&McpConfigFile { mcp_servers: req.mcp_servers.clone() })?;
        let notifier_log = new_restricted_temp_file()?;
        let tool_log = new_restricted_temp_file()?;
        let prompt_file = write_temp_text(&req.prompt)?;
        let stdout_file = new_restricted_temp_file()?;
        let stderr_file = new_restricted_temp_file()?;

        let mut cmd = Command::new(&self.cli_path);
        cmd.arg("--disable-slash-commands")
            .arg("--mcp-config")
            .arg(mcp_config.path())
            .arg("--model")
            .arg(req.model.to_string())
            .arg("--no-chrome")
            .arg("--no-session-persistence")
            .arg("--output-format")
            .arg("json")
            .arg("--tools")
            .arg(req.allowed_tools.join(","));
        for tool in &req.allowed_tools {
            cmd.arg("--allowedTools").arg(tool);
        }
        cmd.arg("-p").arg("-");
        if !req.system_prompt_extra.is_empty() {
            cmd.arg("--append-system-prompt").arg(&req.system_prompt_extra);
        }
        if req.model != Model::Haiku {
            cmd.arg("--fallback-model").arg("haiku");
        }

        cmd.env("CLAUDIO_NOTIFIER_LOG", notifier_log.path())
            .env("CLAUDIO_TOOL_LOG", tool_log.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout_file.reopen().map_err(AgentError::Workspace)?))
            .stderr(Stdio::from(stderr_file.reopen().map_err(AgentError::Workspace)?));

        // Fresh process group: children spawned by the CLI cannot escape a
        // `killpg` aimed at this subprocess.
        cmd.process_group(0);

        debug!(cli = %self.cli_path.display(), model = %req.model, "spawning AI CLI subprocess");
        let started = std::time::Instant::now();
        let mut child = cmd.spawn().map_err(AgentError::Spawn)?;
        let pid = child.id().ok_or_else(|| AgentError::Spawn(std::io::Error::other("child exited before id() was observed")))? as i32;

        if let Some(mut stdin) = child.stdin.take() {
            let prompt_bytes = req.prompt.clone().into_bytes();
            let _ = stdin.write_all(&prompt_bytes).await;
            drop(stdin);
        }

        let status = match tokio::time::timeout(RUN_TIMEOUT, child.wait()).await {
            Ok(result) => result.map_err(AgentError::Spawn)?,
            Err(_) => {
                warn!(pid, "AI CLI subprocess timed out, escalating to terminate then kill");
                terminate_then_kill(pid, &mut child).await;
                return Err(AgentError::Timeout(RUN_TIMEOUT.as_secs()));
            }
        };

        let elapsed = started.elapsed();
        if elapsed >= PREFLIGHT_WARN_THRESHOLD {
            if let Some(log_file) = &self.log_file {
                filelog::warn(
                    log_file,
                    COMPONENT,
                    &format!("Pre-flight check is taking longer than expected ({}s)", elapsed.as_secs()),
                );
            }
        }

        if !status.success() {
            let stderr = std::fs::read_to_string(stderr_file.path()).unwrap_or_default();
            return Err(AgentError::NonZeroExit {
                status: status.code().unwrap_or_else(|| status.signal().unwrap_or(-1)),
                stderr: truncate(&stderr, 2000),
            });
        }

        let stdout = std::fs::read_to_string(stdout_file.path()).unwrap_or_default();
        let (reply, usage) = parse_output(&stdout, &req.model.to_string());
        let notifications = read_notifier_log(notifier_log.path());
        let tool_uses = read_tool_log(tool_log.path());

        Ok(AgentResponse { reply, notifications, tool_uses, usage })
    }
}

/// Send SIGTERM to the process group, wait, then SIGKILL if it's still alive.
async fn terminate_then_kill(pid: i32, child: &mut tokio::process::Child) {
    unsafe { libc::killpg(pid, libc::SIGTERM) };
    if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
        return;
    }
    unsafe { libc::killpg(pid, libc::SIGKILL) };
    let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
}

fn parse_output(stdout: &str, model: &str) -> (String, Option<TokenUsage>) {
    match serde_json::from_str::<CliOutput>(stdout) {
        Ok(parsed) => {
            let usage = parsed.usage.map(|u| TokenUsage {
                model: model.to_string(),
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
                cache_read_tokens: u.cache_read_input_tokens,
                cache_creation_tokens: u.cache_creation_input_tokens,
                cost_usd: parsed.total_cost_usd,
                duration_ms: parsed.duration_ms,
            });
            (parsed.result, usage)
        }
        Err(err) => {
            debug!(error = %err, "AI CLI stdout was not the expected JSON shape, falling back to plain text");
            (stdout.trim().to_string(), None)
        }
    }
}

/// Each line is a JSON-encoded string; unwrap and format for prompt display.
fn read_notifier_log(path: &std::path::Path) -> Vec<String> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str::<String>(l).ok())
        .map(|text| format!("[Notification: {text}]"))
        .collect()
}

/// Each line is a tool-usage summary; deduplicate while preserving order.
fn read_tool_log(path: &std::path::Path) -> Vec<String> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut seen = std::collections::HashSet::new();
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter(|l| seen.insert(l.to_string()))
        .map(|l| format!("[Tool: {l}]"))
        .collect()
}

fn new_restricted_temp_file() -> Result<NamedTempFile> {
    let file = NamedTempFile::new().map_err(AgentError::Workspace)?;
    file.as_file()
        .set_permissions(Permissions::from_mode(0o600))
        .map_err(AgentError::Workspace)?;
    Ok(file)
}

fn write_temp_text(contents: &str) -> Result<NamedTempFile> {
    use std::io::Write;
    let mut file = new_restricted_temp_file()?;
    file.write_all(contents.as_bytes()).map_err(AgentError::Workspace)?;
    file.flush().map_err(AgentError::Workspace)?;
    Ok(file)
}

fn write_temp_json<T: Serialize>(value: &T) -> Result<NamedTempFile> {
    let text = serde_json::to_string(value).map_err(|e| AgentError::Workspace(std::io::Error::other(e)))?;
    write_temp_text(&text)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}... ({} bytes truncated)", &s[..max], s.len() - max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_output_falls_back_to_plain_text_on_invalid_json() {
        let (reply, usage) = parse_output("not json at all", "haiku");
        assert_eq!(reply, "not json at all");
        assert!(usage.is_none());
    }

    #[test]
    fn parse_output_extracts_result_and_usage() {
        let stdout = r#"{"result":"hello there","usage":{"input_tokens":10,"output_tokens":5,"cache_read_input_tokens":0,"cache_creation_input_tokens":0},"total_cost_usd":0.001,"duration_ms":250}"#;
        let (reply, usage) = parse_output(stdout, "sonnet");
        assert_eq!(reply, "hello there");
        let usage = usage.unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(usage.model, "sonnet");
    }

    #[test]
    fn read_notifier_log_unwraps_json_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifier.log");
        std::fs::write(&path, "\"build started\"\n\"build finished\"\n").unwrap();
        let lines = read_notifier_log(&path);
        assert_eq!(lines, vec!["[Notification: build started]", "[Notification: build finished]"]);
    }

    #[test]
    fn read_tool_log_deduplicates_preserving_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool.log");
        std::fs::write(&path, "read_file(a.rs)\nread_file(a.rs)\nwrite_file(b.rs)\n").unwrap();
        let lines = read_tool_log(&path);
        assert_eq!(lines, vec!["[Tool: read_file(a.rs)]", "[Tool: write_file(b.rs)]"]);
    }

    #[test]
    fn missing_logs_produce_empty_vecs() {
        let path = std::path::Path::new("/nonexistent/path/for/tests");
        assert!(read_notifier_log(path).is_empty());
        assert!(read_tool_log(path).is_empty());
    }

    #[test]
    fn truncate_appends_byte_count_when_over_limit() {
        let long = "a".repeat(10);
        let result = truncate(&long, 4);
        assert!(result.starts_with("aaaa"));
        assert!(result.contains("truncated"));
    }
}
