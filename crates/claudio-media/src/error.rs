use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("audio rejected: {0}")]
    InvalidAudio(String),

    #[error("provider returned {status}: {body}")]
    ProviderError { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn code(&self) -> &'static str {
        match self {
            MediaError::Http(_) => "HTTP_ERROR",
            MediaError::InvalidAudio(_) => "INVALID_AUDIO",
            MediaError::ProviderError { .. } => "PROVIDER_ERROR",
            MediaError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
