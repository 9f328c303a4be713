use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("platform API returned {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("download rejected: {0}")]
    InvalidDownload(String),

    #[error("validation failed for downloaded file")]
    ValidationFailed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlatformError {
    pub fn code(&self) -> &'static str {
        match self {
            PlatformError::Http(_) => "HTTP_ERROR",
            PlatformError::ApiError { .. } => "API_ERROR",
            PlatformError::InvalidDownload(_) => "INVALID_DOWNLOAD",
            PlatformError::ValidationFailed => "VALIDATION_FAILED",
            PlatformError::Io(_) => "IO_ERROR",
        }
    }

    /// 429 and 5xx are retryable; everything else (incl. other 4xx) is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::ApiError { status, .. } => *status == 429 || *status >= 500,
            PlatformError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;
