pub mod error;
pub mod history;
pub mod memory_client;
pub mod pipeline;
pub mod sanitize;
pub mod temp_workspace;

pub use error::{PipelineError, Result};
pub use memory_client::MemoryClient;
pub use pipeline::{process, ModelPersister, PipelineContext};
