/// Embeds text into a fixed-size vector. A `None` return (e.g. the model
/// failed to load) means the caller should fall through to FTS ranking —
/// mirrors the original "fastembed not installed, falling back to FTS5"
/// degrade path.
pub trait Embedder: Send + Sync {
    fn embed_one(&self, text: &str) -> Option<Vec<f32>>;

    fn model_name(&self) -> &str;
}

/// An embedder that never produces a vector — used when no embedding model
/// is configured, forcing every retrieval through the FTS5 fallback.
pub struct NullEmbedder;

impl Embedder for NullEmbedder {
    fn embed_one(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }

    fn model_name(&self) -> &str {
        "none"
    }
}
