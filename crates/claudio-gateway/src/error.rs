use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("config error: {0}")]
    Config(#[from] claudio_config::ConfigError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] claudio_pipeline::PipelineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Alexa request verification failed: {0}")]
    AlexaVerification(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::Pipeline(_) => "PIPELINE_ERROR",
            GatewayError::Io(_) => "IO_ERROR",
            GatewayError::AlexaVerification(_) => "ALEXA_VERIFICATION_FAILED",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
