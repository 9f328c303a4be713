use thiserror::Error;

/// Errors shared across every claudio crate.
///
/// Each layer that needs its own variants (memory, agent, platform) defines
/// a local `thiserror` enum instead of stuffing everything in here; this
/// type only covers the bot/config/dispatch concerns `claudio-core` itself
/// owns.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid bot id '{0}': must match ^[A-Za-z0-9][A-Za-z0-9_-]*$ with no path traversal")]
    InvalidBotId(String),

    #[error("bot not found: {0}")]
    BotNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid model '{0}': must be one of opus, sonnet, haiku")]
    InvalidModel(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Short machine-readable code, mirrored in logs and socket error replies.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidBotId(_) => "INVALID_BOT_ID",
            CoreError::BotNotFound(_) => "BOT_NOT_FOUND",
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::InvalidModel(_) => "INVALID_MODEL",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
