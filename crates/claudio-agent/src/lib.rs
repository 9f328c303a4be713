pub mod error;
pub mod runner;
pub mod token_usage;

pub use error::{AgentError, Result};
pub use runner::{AgentRequest, AgentResponse, AgentRunner, TokenUsage};
