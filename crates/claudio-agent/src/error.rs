use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to prepare agent workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("failed to spawn AI CLI subprocess: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("AI CLI subprocess timed out after {0}s and did not terminate")]
    Timeout(u64),

    #[error("AI CLI subprocess exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },

    #[error("token usage persistence failed: {0}")]
    TokenUsage(#[source] rusqlite::Error),
}

impl AgentError {
    /// Short machine-readable code, mirrored in logs.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Workspace(_) => "WORKSPACE_ERROR",
            AgentError::Spawn(_) => "SPAWN_ERROR",
            AgentError::Timeout(_) => "TIMEOUT",
            AgentError::NonZeroExit { .. } => "NON_ZERO_EXIT",
            AgentError::TokenUsage(_) => "TOKEN_USAGE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
