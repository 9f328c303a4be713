use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("agent runner error: {0}")]
    Agent(#[from] claudio_agent::AgentError),

    #[error("config error: {0}")]
    Config(#[from] claudio_config::ConfigError),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Database(_) => "DATABASE_ERROR",
            PipelineError::Io(_) => "IO_ERROR",
            PipelineError::Agent(_) => "AGENT_ERROR",
            PipelineError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
