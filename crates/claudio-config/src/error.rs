use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bot id '{0}': must match ^[A-Za-z0-9][A-Za-z0-9_-]*$")]
    InvalidBotId(String),

    #[error("invalid model '{0}': must be one of opus, sonnet, haiku")]
    InvalidModel(String),

    #[error("I/O error writing {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bot not found: {0}")]
    BotNotFound(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::InvalidBotId(_) => "INVALID_BOT_ID",
            ConfigError::InvalidModel(_) => "INVALID_MODEL",
            ConfigError::Write { .. } => "CONFIG_WRITE_ERROR",
            ConfigError::BotNotFound(_) => "BOT_NOT_FOUND",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
