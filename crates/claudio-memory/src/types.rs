use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which of the three memory tables a record belongs to. Used both as a
/// discriminator on retrieval results and as the `memory_type` column value
/// in `memory_accesses`/`memory_fts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Episodic,
    Semantic,
    Procedural,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Episodic => write!(f, "episodic"),
            Self::Semantic => write!(f, "semantic"),
            Self::Procedural => write!(f, "procedural"),
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            other => Err(format!("unknown memory kind: {other}")),
        }
    }
}

/// A record of something that happened: a specific event with its context
/// and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicMemory {
    pub id: String,
    pub content: String,
    pub context: Option<String>,
    pub outcome: Option<String>,
    pub importance: f64,
    pub semanticized: bool,
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
    pub updated_at: String,
}

/// A generalized fact or preference distilled from one or more episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticMemory {
    pub id: String,
    pub content: String,
    pub category: Option<String>,
    pub confidence: f64,
    pub source_episode_id: Option<String>,
    pub supersedes_id: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
    pub updated_at: String,
}

/// A learned trigger → behavior association.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceduralMemory {
    pub id: String,
    pub content: String,
    pub trigger_pattern: Option<String>,
    pub success_rate: f64,
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
    pub updated_at: String,
}

/// A candidate produced during retrieval, after activation scoring — the
/// shape returned to the caller and formatted for prompt injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedMemory {
    pub id: String,
    pub kind: MemoryKind,
    pub content: String,
    pub score: f64,
    pub similarity: f64,
    pub normalized_activation: f64,
    pub category: Option<String>,
    pub confidence: Option<f64>,
}

/// One extracted memory from consolidation's structured LLM output, prior to
/// dedup/contradiction resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedMemory {
    pub kind: MemoryKind,
    pub content: String,
    pub context: Option<String>,
    pub outcome: Option<String>,
    pub importance: Option<f64>,
    pub category: Option<String>,
    pub confidence: Option<f64>,
    pub trigger_pattern: Option<String>,
}

/// Top-level shape the consolidation extraction prompt demands from the AI
/// CLI: `{"episodic": [...], "semantic": [...], "procedural": [...]}`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExtractionResult {
    #[serde(default)]
    pub episodic: Vec<ExtractedMemory>,
    #[serde(default)]
    pub semantic: Vec<ExtractedMemory>,
    #[serde(default)]
    pub procedural: Vec<ExtractedMemory>,
}

impl ExtractionResult {
    pub fn into_flat(self) -> Vec<ExtractedMemory> {
        let mut all = Vec::with_capacity(self.episodic.len() + self.semantic.len() + self.procedural.len());
        all.extend(self.episodic);
        all.extend(self.semantic);
        all.extend(self.procedural);
        all
    }
}

/// What `_check_dedup`'s pairwise classifier decided about a near-duplicate
/// candidate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    Duplicate,
    Contradiction,
    Unrelated,
}

impl std::str::FromStr for DedupVerdict {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "DUPLICATE" => Ok(Self::Duplicate),
            "CONTRADICTION" => Ok(Self::Contradiction),
            "UNRELATED" => Ok(Self::Unrelated),
            other => Err(format!("unrecognized dedup verdict: {other}")),
        }
    }
}

/// Summary of one `consolidate()` run, useful for logging and for the
/// ping-pong protocol's `result` payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    pub extracted: usize,
    pub stored: usize,
    pub skipped_duplicate: usize,
    pub superseded: usize,
    pub last_consolidated_id: i64,
}

/// Summary of one `reconsolidate()` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconsolidationReport {
    pub pruned: usize,
    pub semanticized: usize,
    pub merged: usize,
}

/// A simple chat turn as read from the conversation history table, the
/// input to consolidation's transcript builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: i64,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct BuiltAt(pub DateTime<Utc>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_kind_round_trips_through_string() {
        for kind in [MemoryKind::Episodic, MemoryKind::Semantic, MemoryKind::Procedural] {
            let s = kind.to_string();
            let parsed: MemoryKind = s.parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn dedup_verdict_parses_exact_tokens() {
        assert_eq!("DUPLICATE".parse::<DedupVerdict>().unwrap(), DedupVerdict::Duplicate);
        assert_eq!(
            "CONTRADICTION".parse::<DedupVerdict>().unwrap(),
            DedupVerdict::Contradiction
        );
        assert!("maybe".parse::<DedupVerdict>().is_err());
    }
}
