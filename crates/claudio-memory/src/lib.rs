pub mod activation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod manager;
pub mod protocol;
pub mod types;

pub use db::open;
pub use embedding::{Embedder, NullEmbedder};
pub use error::{MemoryError, Result};
pub use llm::ConsolidationExtractor;
pub use manager::{format_memories, MemoryManager};
pub use protocol::MemoryDaemon;
pub use types::{
    ConsolidationReport, DedupVerdict, EpisodicMemory, ExtractedMemory, ExtractionResult,
    MemoryKind, ProceduralMemory, ReconsolidationReport, RetrievedMemory, SemanticMemory, Turn,
};
