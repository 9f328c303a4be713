use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("memory not found: {id} ({kind})")]
    NotFound { id: String, kind: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl MemoryError {
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::Database(_) => "DATABASE_ERROR",
            MemoryError::NotFound { .. } => "NOT_FOUND",
            MemoryError::Serialization(_) => "SERIALIZATION_ERROR",
            MemoryError::Io(_) => "IO_ERROR",
            MemoryError::Protocol(_) => "PROTOCOL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
