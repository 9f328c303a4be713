use crate::error::Result;
use crate::types::{DedupVerdict, ExtractionResult};

/// The consolidation/reconsolidation routines need an AI invocation at three
/// points. Kept as a trait so `claudio-memory` doesn't depend on
/// `claudio-agent` (which depends on this crate's types for persisted
/// memories) — the binary wires a concrete implementation in at startup.
pub trait ConsolidationExtractor: Send + Sync {
    /// Structured extraction over a conversation transcript, given up to
    /// five existing semantic memories as dedup context. Must return JSON
    /// matching [`ExtractionResult`]'s shape.
    fn extract(&self, transcript: &str, existing_context: &str) -> Result<ExtractionResult>;

    /// "DUPLICATE | CONTRADICTION | UNRELATED" classification for a
    /// near-duplicate candidate pair.
    fn classify_pair(&self, candidate: &str, existing: &str) -> Result<DedupVerdict>;

    /// Extract a semantic generalization from a single episodic memory, for
    /// the reconsolidation semanticization step.
    fn semanticize(&self, episodic_content: &str) -> Result<String>;
}
