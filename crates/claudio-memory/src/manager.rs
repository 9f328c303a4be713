use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activation::{
    self, ACCESS_CAP_PER_MEMORY, CONFIDENCE_FLOOR, CONTRADICTION_CANDIDATE_THRESHOLD,
    NEAR_DUPLICATE_THRESHOLD, PRE_FILTER_PER_TYPE,
};
use crate::db;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::llm::ConsolidationExtractor;
use crate::types::{
    ConsolidationReport, DedupVerdict, ExtractedMemory, MemoryKind, ReconsolidationReport,
    RetrievedMemory, Turn,
};

const MIN_TURNS_FOR_CONSOLIDATION: usize = 3;
const MIN_WORDS_FOR_CONSOLIDATION: usize = 20;
const SEMANTICIZE_AGE_DAYS: i64 = 90;
const SEMANTICIZE_BATCH: usize = 10;
const PRUNE_AGE_DAYS: i64 = 60;
const RETRIEVAL_SCAN_LIMIT: i64 = 500;
const DEDUP_SCAN_LIMIT: i64 = 200;
const DEDUP_CONTEXT_SCAN_LIMIT: i64 = 100;
const DEDUP_CONTEXT_SIMILARITY_FLOOR: f64 = 0.5;
const DEDUP_CONTEXT_TOP_N: usize = 5;
const MERGE_SCAN_LIMIT: i64 = 200;

/// Owns the per-bot ACT-R memory store: the three memory tables, the access
/// log, and the FTS5 mirror. Wraps the connection in a `Mutex` the same way
/// the teacher's history manager does — SQLite serializes writers anyway, so
/// there's no value in finer-grained locking here.
pub struct MemoryManager {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
}

struct ScanRow {
    id: String,
    content: String,
    embedding: Option<Vec<u8>>,
    extra: RowExtra,
}

enum RowExtra {
    Episodic,
    Semantic { confidence: f64, created_at: String, category: Option<String> },
    Procedural,
}

impl MemoryManager {
    pub fn new(conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self> {
        db::check_model_change(&conn, embedder.model_name())?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    /// Insert a memory row plus its FTS mirror and initial access record.
    /// Returns the generated id.
    #[allow(clippy::too_many_arguments)]
    pub fn store_memory(
        &self,
        kind: MemoryKind,
        content: &str,
        embedding: Option<&[f32]>,
        context: Option<&str>,
        outcome: Option<&str>,
        importance: Option<f64>,
        category: Option<&str>,
        confidence: Option<f64>,
        source_episode_id: Option<&str>,
        supersedes_id: Option<&str>,
        trigger_pattern: Option<&str>,
    ) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let blob = embedding.map(activation::embedding_to_blob);

        match kind {
            MemoryKind::Episodic => {
                conn.execute(
                    "INSERT INTO episodic_memories (id, content, context, outcome, importance, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![id, content, context, outcome, importance.unwrap_or(0.5), blob],
                )?;
            }
            MemoryKind::Semantic => {
                conn.execute(
                    "INSERT INTO semantic_memories
                     (id, content, category, confidence, source_episode_id, supersedes_id, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        id,
                        content,
                        category,
                        confidence.unwrap_or(0.8),
                        source_episode_id,
                        supersedes_id,
                        blob
                    ],
                )?;
            }
            MemoryKind::Procedural => {
                conn.execute(
                    "INSERT INTO procedural_memories (id, content, trigger_pattern, embedding)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, content, trigger_pattern, blob],
                )?;
            }
        }

        conn.execute(
            "INSERT INTO memory_fts (memory_id, memory_type, content) VALUES (?1, ?2, ?3)",
            params![id, kind.to_string(), content],
        )?;
        conn.execute(
            "INSERT INTO memory_accesses (memory_id, memory_type) VALUES (?1, ?2)",
            params![id, kind.to_string()],
        )?;

        Ok(id)
    }

    /// Log an access and prune the per-memory access history down to
    /// [`ACCESS_CAP_PER_MEMORY`].
    pub fn record_access(&self, memory_id: &str, kind: MemoryKind) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        record_access_locked(&conn, memory_id, kind)?;
        Ok(())
    }

    /// Two-phase ACT-R retrieval: embed the query, cosine-prefilter the most
    /// recently updated rows per kind, then compute full activation only for
    /// the survivors. Falls through to FTS5 BM25 ranking when no embedding
    /// model is configured.
    pub fn retrieve(&self, query: &str, top_k: usize, kinds: &[MemoryKind]) -> Result<Vec<RetrievedMemory>> {
        let query_embedding = self.embedder.embed_one(query);
        let conn = self.conn.lock().unwrap();

        let mut candidates = Vec::new();
        if let Some(query_emb) = &query_embedding {
            for &kind in kinds {
                candidates.extend(retrieve_phase_two(&conn, kind, query_emb)?);
            }
        }

        if query_embedding.is_none() && candidates.is_empty() {
            candidates = fts_search(&conn, query, kinds, top_k * 2)?;
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(top_k);

        for result in &candidates {
            record_access_locked(&conn, &result.id, result.kind)?;
        }

        Ok(candidates)
    }

    /// Gate, extract, and store memories for a batch of unconsolidated
    /// turns. Advances the `last_consolidated_id` watermark even when
    /// nothing gets stored, so the caller never re-scans the same turns.
    pub fn consolidate(&self, extractor: &dyn ConsolidationExtractor, turns: &[Turn]) -> Result<ConsolidationReport> {
        let mut report = ConsolidationReport::default();
        if turns.is_empty() {
            return Ok(report);
        }

        let last_id = turns.last().unwrap().id;
        report.last_consolidated_id = last_id;

        if !should_consolidate(turns) {
            let conn = self.conn.lock().unwrap();
            db::set_last_consolidated_id(&conn, last_id)?;
            return Ok(report);
        }

        let transcript = build_transcript(turns);
        let existing_context = self.existing_memories_context(&transcript)?;

        let extraction = match extractor.extract(&transcript, &existing_context) {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "consolidation extraction failed, skipping this batch");
                let conn = self.conn.lock().unwrap();
                db::set_last_consolidated_id(&conn, last_id)?;
                return Ok(report);
            }
        };

        for extracted in extraction.into_flat() {
            report.extracted += 1;
            self.store_extracted(extractor, &extracted, &mut report)?;
        }

        let conn = self.conn.lock().unwrap();
        db::set_last_consolidated_id(&conn, last_id)?;
        Ok(report)
    }

    fn existing_memories_context(&self, transcript: &str) -> Result<String> {
        let truncated: String = transcript.chars().take(2000).collect();
        let Some(query_emb) = self.embedder.embed_one(&truncated) else {
            return Ok(String::new());
        };

        let rows: Vec<(String, Option<String>, Vec<u8>)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT content, category, embedding FROM semantic_memories
                 WHERE embedding IS NOT NULL ORDER BY updated_at DESC LIMIT ?1",
            )?;
            stmt.query_map([DEDUP_CONTEXT_SCAN_LIMIT], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<rusqlite::Result<_>>()?
        };

        let mut scored = Vec::new();
        for (content, category, embedding) in rows {
            let mem_emb = activation::blob_to_embedding(&embedding);
            let sim = activation::cosine_similarity(&query_emb, &mem_emb);
            if sim > DEDUP_CONTEXT_SIMILARITY_FLOOR {
                scored.push((sim, content, category));
            }
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(DEDUP_CONTEXT_TOP_N);

        if scored.is_empty() {
            return Ok(String::new());
        }

        let mut lines = vec!["Existing memories (avoid duplicates):".to_string()];
        for (_, content, category) in scored {
            let cat = category.as_deref().unwrap_or("uncategorized");
            lines.push(format!("- [{cat}] {content}"));
        }
        Ok(lines.join("\n"))
    }

    fn store_extracted(
        &self,
        extractor: &dyn ConsolidationExtractor,
        extracted: &ExtractedMemory,
        report: &mut ConsolidationReport,
    ) -> Result<()> {
        if extracted.content.trim().is_empty() {
            return Ok(());
        }
        let embedding = self.embedder.embed_one(&extracted.content);

        match extracted.kind {
            MemoryKind::Episodic => {
                self.store_memory(
                    MemoryKind::Episodic,
                    &extracted.content,
                    embedding.as_deref(),
                    extracted.context.as_deref(),
                    extracted.outcome.as_deref(),
                    extracted.importance,
                    None,
                    None,
                    None,
                    None,
                    None,
                )?;
                report.stored += 1;
            }
            MemoryKind::Semantic => {
                let verdict = self.check_dedup(extractor, MemoryKind::Semantic, &extracted.content, embedding.as_deref())?;
                match verdict {
                    DedupAction::Skip => report.skipped_duplicate += 1,
                    DedupAction::Supersede(old_id) => {
                        self.store_memory(
                            MemoryKind::Semantic,
                            &extracted.content,
                            embedding.as_deref(),
                            None,
                            None,
                            None,
                            extracted.category.as_deref(),
                            extracted.confidence,
                            None,
                            Some(&old_id),
                            None,
                        )?;
                        let conn = self.conn.lock().unwrap();
                        conn.execute(
                            "UPDATE semantic_memories SET confidence = ?1, updated_at = strftime('%Y-%m-%d %H:%M:%S', 'now') WHERE id = ?2",
                            params![CONFIDENCE_FLOOR, old_id],
                        )?;
                        report.superseded += 1;
                        report.stored += 1;
                    }
                    DedupAction::New => {
                        self.store_memory(
                            MemoryKind::Semantic,
                            &extracted.content,
                            embedding.as_deref(),
                            None,
                            None,
                            None,
                            extracted.category.as_deref(),
                            extracted.confidence,
                            None,
                            None,
                            None,
                        )?;
                        report.stored += 1;
                    }
                }
            }
            MemoryKind::Procedural => {
                let verdict = self.check_dedup(extractor, MemoryKind::Procedural, &extracted.content, embedding.as_deref())?;
                if matches!(verdict, DedupAction::Skip) {
                    report.skipped_duplicate += 1;
                    return Ok(());
                }
                self.store_memory(
                    MemoryKind::Procedural,
                    &extracted.content,
                    embedding.as_deref(),
                    None,
                    None,
                    None,
                    None,
                    None,
                    None,
                    None,
                    extracted.trigger_pattern.as_deref(),
                )?;
                report.stored += 1;
            }
        }
        Ok(())
    }

    /// Near-duplicate / contradiction check against the most recently
    /// updated rows of `kind`. Contradiction arbitration (semantic only)
    /// defers to the LLM classifier.
    fn check_dedup(
        &self,
        extractor: &dyn ConsolidationExtractor,
        kind: MemoryKind,
        content: &str,
        embedding: Option<&[f32]>,
    ) -> Result<DedupAction> {
        let Some(vec) = embedding else {
            return Ok(DedupAction::New);
        };

        let table = match kind {
            MemoryKind::Episodic => "episodic_memories",
            MemoryKind::Semantic => "semantic_memories",
            MemoryKind::Procedural => "procedural_memories",
        };

        let rows: Vec<(String, String, Vec<u8>)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(&format!(
                "SELECT id, content, embedding FROM {table}
                 WHERE embedding IS NOT NULL ORDER BY updated_at DESC LIMIT ?1"
            ))?;
            stmt.query_map([DEDUP_SCAN_LIMIT], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<rusqlite::Result<_>>()?
        };

        // Lock released above — the contradiction check below may shell out
        // to the LLM classifier, and a worker must never hold the database
        // lock across a subprocess call.
        for (id, existing_content, embedding) in rows {
            let mem_emb = activation::blob_to_embedding(&embedding);
            let sim = activation::cosine_similarity(vec, &mem_emb);

            if sim > NEAR_DUPLICATE_THRESHOLD {
                return Ok(DedupAction::Skip);
            }

            if sim > CONTRADICTION_CANDIDATE_THRESHOLD && kind == MemoryKind::Semantic {
                let verdict = extractor
                    .classify_pair(content, &existing_content)
                    .unwrap_or(DedupVerdict::Unrelated);
                match verdict {
                    DedupVerdict::Duplicate => return Ok(DedupAction::Skip),
                    DedupVerdict::Contradiction => return Ok(DedupAction::Supersede(id)),
                    DedupVerdict::Unrelated => {}
                }
            }
        }

        Ok(DedupAction::New)
    }

    /// Periodic maintenance: prune dead semantic memories, semanticize old
    /// episodes, and merge near-duplicate semantic memories.
    pub fn reconsolidate(&self, extractor: &dyn ConsolidationExtractor) -> Result<ReconsolidationReport> {
        let pruned = self.prune_dead_semantic_memories()?;
        let semanticized = self.semanticize_old_episodes(extractor)?;
        let merged = self.merge_near_duplicate_semantic_memories()?;
        Ok(ReconsolidationReport { pruned, semanticized, merged })
    }

    fn prune_dead_semantic_memories(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let age_clause = format!("-{PRUNE_AGE_DAYS} days");
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT m.id FROM semantic_memories m
                 LEFT JOIN memory_accesses a ON a.memory_id = m.id AND a.memory_type = 'semantic'
                 WHERE m.confidence <= ?1
                 GROUP BY m.id
                 HAVING MAX(a.accessed_at) < datetime('now', ?2) OR MAX(a.accessed_at) IS NULL",
            )?;
            stmt.query_map(params![CONFIDENCE_FLOOR, age_clause], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?
        };

        for id in &ids {
            soft_delete_semantic(&conn, id)?;
        }
        Ok(ids.len())
    }

    fn semanticize_old_episodes(&self, extractor: &dyn ConsolidationExtractor) -> Result<usize> {
        let episodes: Vec<(String, String)> = {
            let conn = self.conn.lock().unwrap();
            let age_clause = format!("-{SEMANTICIZE_AGE_DAYS} days");
            let mut stmt = conn.prepare(
                "SELECT id, content FROM episodic_memories
                 WHERE created_at < datetime('now', ?1) AND semanticized = 0
                 LIMIT ?2",
            )?;
            stmt.query_map(params![age_clause, SEMANTICIZE_BATCH as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<_>>()?
        };

        let mut semanticized_count = 0;
        for (episode_id, content) in &episodes {
            match extractor.semanticize(content) {
                Ok(summary) if !summary.trim().is_empty() => {
                    let embedding = self.embedder.embed_one(&summary);
                    self.store_memory(
                        MemoryKind::Semantic,
                        &summary,
                        embedding.as_deref(),
                        None,
                        None,
                        None,
                        None,
                        None,
                        Some(episode_id),
                        None,
                        None,
                    )?;
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, episode_id, "semanticization failed for episode"),
            }

            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE episodic_memories SET semanticized = 1, updated_at = strftime('%Y-%m-%d %H:%M:%S', 'now') WHERE id = ?1",
                params![episode_id],
            )?;
            semanticized_count += 1;
        }

        Ok(semanticized_count)
    }

    fn merge_near_duplicate_semantic_memories(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let rows: Vec<(String, f64, Vec<u8>)> = {
            let mut stmt = conn.prepare(
                "SELECT id, confidence, embedding FROM semantic_memories
                 WHERE confidence > 0 AND embedding IS NOT NULL
                 ORDER BY updated_at DESC LIMIT ?1",
            )?;
            stmt.query_map([MERGE_SCAN_LIMIT], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<rusqlite::Result<_>>()?
        };

        let mut merged = std::collections::HashSet::new();
        let mut merged_count = 0;

        for i in 0..rows.len() {
            let (id_a, conf_a, blob_a) = &rows[i];
            if merged.contains(id_a) {
                continue;
            }
            let emb_a = activation::blob_to_embedding(blob_a);

            for (id_b, conf_b, blob_b) in &rows[i + 1..] {
                if merged.contains(id_b) {
                    continue;
                }
                let emb_b = activation::blob_to_embedding(blob_b);
                let sim = activation::cosine_similarity(&emb_a, &emb_b);
                if sim <= NEAR_DUPLICATE_THRESHOLD {
                    continue;
                }

                let remove_id = if conf_a >= conf_b { id_b } else { id_a };
                soft_delete_semantic(&conn, remove_id)?;
                merged.insert(remove_id.clone());
                merged_count += 1;

                if remove_id == id_a {
                    break;
                }
            }
        }

        Ok(merged_count)
    }
}

enum DedupAction {
    New,
    Skip,
    Supersede(String),
}

fn record_access_locked(conn: &Connection, memory_id: &str, kind: MemoryKind) -> rusqlite::Result<()> {
    let kind_str = kind.to_string();
    conn.execute(
        "INSERT INTO memory_accesses (memory_id, memory_type) VALUES (?1, ?2)",
        params![memory_id, kind_str],
    )?;
    conn.execute(
        "DELETE FROM memory_accesses WHERE id IN (
            SELECT id FROM memory_accesses
            WHERE memory_id = ?1 AND memory_type = ?2
            ORDER BY accessed_at ASC
            LIMIT MAX(0, (SELECT COUNT(*) FROM memory_accesses WHERE memory_id = ?1 AND memory_type = ?2) - ?3)
        )",
        params![memory_id, kind_str, ACCESS_CAP_PER_MEMORY as i64],
    )?;
    Ok(())
}

fn soft_delete_semantic(conn: &Connection, memory_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE semantic_memories SET confidence = 0, updated_at = strftime('%Y-%m-%d %H:%M:%S', 'now') WHERE id = ?1",
        params![memory_id],
    )?;
    conn.execute("DELETE FROM memory_fts WHERE memory_id = ?1", params![memory_id])?;
    Ok(())
}

fn access_ages_secs(conn: &Connection, memory_id: &str, kind: MemoryKind) -> rusqlite::Result<Vec<f64>> {
    let kind_str = kind.to_string();
    let rows: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT accessed_at FROM memory_accesses WHERE memory_id = ?1 AND memory_type = ?2
             ORDER BY accessed_at DESC LIMIT 100",
        )?;
        stmt.query_map(params![memory_id, kind_str], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?
    };

    let now = chrono::Utc::now();
    let mut ages = Vec::new();
    for ts in rows {
        if let Some(parsed) = parse_sqlite_timestamp(&ts) {
            let delta = (now - parsed).num_milliseconds() as f64 / 1000.0;
            ages.push(delta.max(1.0));
        }
    }
    Ok(ages)
}

fn last_semantic_access(conn: &Connection, memory_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT MAX(accessed_at) FROM memory_accesses WHERE memory_id = ?1 AND memory_type = 'semantic'",
        params![memory_id],
        |row| row.get(0),
    )
    .optional()
    .map(|v: Option<Option<String>>| v.flatten())
}

fn parse_sqlite_timestamp(ts: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(ts, fmt) {
            return Some(chrono::DateTime::from_naive_utc_and_offset(naive, chrono::Utc));
        }
    }
    None
}

fn retrieve_phase_two(conn: &Connection, kind: MemoryKind, query_emb: &[f32]) -> Result<Vec<RetrievedMemory>> {
    let rows = scan_rows(conn, kind)?;

    let mut sim_scored: Vec<(f64, ScanRow)> = rows
        .into_iter()
        .map(|row| {
            let sim = match &row.embedding {
                Some(blob) => activation::cosine_similarity(query_emb, &activation::blob_to_embedding(blob)),
                None => 0.0,
            };
            (sim, row)
        })
        .collect();
    sim_scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    sim_scored.truncate(PRE_FILTER_PER_TYPE);

    let mut out = Vec::with_capacity(sim_scored.len());
    for (sim, row) in sim_scored {
        let mut category = None;
        let confidence = match &row.extra {
            RowExtra::Semantic { confidence, created_at, category: cat } => {
                category = cat.clone();
                let last_access = last_semantic_access(conn, &row.id)?.unwrap_or_else(|| created_at.clone());
                let now = chrono::Utc::now();
                let days_since = parse_sqlite_timestamp(&last_access)
                    .map(|ts| (now - ts).num_days())
                    .unwrap_or(0);
                let decayed = activation::reinforcement_decay(*confidence, days_since);
                if decayed < CONFIDENCE_FLOOR {
                    continue;
                }
                Some(decayed)
            }
            _ => None,
        };

        let ages = access_ages_secs(conn, &row.id, kind)?;
        let activation_raw = activation::base_level_activation(&ages);
        let norm_activation = activation::normalize_activation(activation_raw);
        let score = activation::retrieval_score(sim, norm_activation);

        out.push(RetrievedMemory {
            id: row.id,
            kind,
            content: row.content,
            score,
            similarity: sim,
            normalized_activation: norm_activation,
            category,
            confidence,
        });
    }

    Ok(out)
}

fn scan_rows(conn: &Connection, kind: MemoryKind) -> rusqlite::Result<Vec<ScanRow>> {
    match kind {
        MemoryKind::Episodic => {
            let mut stmt = conn.prepare(
                "SELECT id, content, embedding FROM episodic_memories ORDER BY updated_at DESC LIMIT ?1",
            )?;
            stmt.query_map([RETRIEVAL_SCAN_LIMIT], |row| {
                Ok(ScanRow {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    embedding: row.get(2)?,
                    extra: RowExtra::Episodic,
                })
            })?
            .collect()
        }
        MemoryKind::Semantic => {
            let mut stmt = conn.prepare(
                "SELECT id, content, embedding, confidence, created_at, category FROM semantic_memories ORDER BY updated_at DESC LIMIT ?1",
            )?;
            stmt.query_map([RETRIEVAL_SCAN_LIMIT], |row| {
                Ok(ScanRow {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    embedding: row.get(2)?,
                    extra: RowExtra::Semantic {
                        confidence: row.get(3)?,
                        created_at: row.get(4)?,
                        category: row.get(5)?,
                    },
                })
            })?
            .collect()
        }
        MemoryKind::Procedural => {
            let mut stmt = conn.prepare(
                "SELECT id, content, embedding FROM procedural_memories ORDER BY updated_at DESC LIMIT ?1",
            )?;
            stmt.query_map([RETRIEVAL_SCAN_LIMIT], |row| {
                Ok(ScanRow {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    embedding: row.get(2)?,
                    extra: RowExtra::Procedural,
                })
            })?
            .collect()
        }
    }
}

fn fts_search(conn: &Connection, query: &str, kinds: &[MemoryKind], limit: usize) -> Result<Vec<RetrievedMemory>> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| format!("\"{s}\""))
        .collect();
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let safe_query = tokens.join(" ");

    let prepared = conn.prepare(
        "SELECT memory_id, memory_type, content, rank FROM memory_fts
         WHERE memory_fts MATCH ?1 ORDER BY rank LIMIT ?2",
    );
    let mut stmt = match prepared {
        Ok(stmt) => stmt,
        Err(err) => {
            debug!(error = %err, "fts5 search unavailable");
            return Ok(Vec::new());
        }
    };
    let rows = stmt.query_map(params![safe_query, limit as i64], |row| {
        let id: String = row.get(0)?;
        let kind_str: String = row.get(1)?;
        let content: String = row.get(2)?;
        let rank: f64 = row.get(3)?;
        Ok((id, kind_str, content, rank))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, kind_str, content, rank) = row?;
        let Ok(kind) = kind_str.parse::<MemoryKind>() else {
            continue;
        };
        if !kinds.contains(&kind) {
            continue;
        }
        out.push(RetrievedMemory {
            id,
            kind,
            content,
            score: -rank,
            similarity: 0.0,
            normalized_activation: 0.0,
            category: None,
            confidence: None,
        });
    }
    Ok(out)
}

/// Gating predicate: skip short, slash-command-only batches; let everything
/// else through for the LLM to judge.
fn should_consolidate(turns: &[Turn]) -> bool {
    if turns.len() < MIN_TURNS_FOR_CONSOLIDATION {
        return false;
    }

    let user_messages: Vec<&str> = turns
        .iter()
        .filter(|t| t.role == "user")
        .map(|t| t.content.as_str())
        .collect();

    let all_short = user_messages
        .iter()
        .all(|msg| msg.split_whitespace().count() < MIN_WORDS_FOR_CONSOLIDATION);

    if all_short {
        let all_slash_commands = user_messages.iter().all(|msg| msg.trim_start().starts_with('/'));
        if all_slash_commands {
            return false;
        }
    }

    true
}

/// Render retrieved memories as prompt-ready lines, grouped under a heading.
/// Empty input yields an empty string so callers can splice it into a
/// prompt unconditionally.
pub fn format_memories(memories: &[RetrievedMemory]) -> String {
    if memories.is_empty() {
        return String::new();
    }

    let mut lines = vec!["## Relevant memories\n".to_string()];
    for m in memories {
        match m.kind {
            MemoryKind::Semantic => {
                let conf = m.confidence.unwrap_or(0.8);
                let cat = match &m.category {
                    Some(c) if !c.is_empty() => format!(" ({c})"),
                    _ => String::new(),
                };
                lines.push(format!("- [semantic]{cat} {} (confidence: {conf:.2})", m.content));
            }
            MemoryKind::Episodic => {
                lines.push(format!("- [episodic] {}", m.content));
            }
            MemoryKind::Procedural => {
                lines.push(format!("- [procedural] {}", m.content));
            }
        }
    }
    lines.join("\n")
}

fn build_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| {
            let speaker = if t.role == "user" { "User" } else { "Assistant" };
            format!("{speaker}: {}", t.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::NullEmbedder;

    fn manager_with_null_embedder() -> MemoryManager {
        let path = std::env::temp_dir().join(format!("claudio-memory-test-{}.db", Uuid::new_v4()));
        let conn = db::open(&path).unwrap();
        MemoryManager::new(conn, Arc::new(NullEmbedder)).unwrap()
    }

    #[test]
    fn store_and_retrieve_roundtrip_without_embeddings() {
        let mgr = manager_with_null_embedder();
        mgr.store_memory(
            MemoryKind::Semantic,
            "user prefers dark mode",
            None,
            None,
            None,
            None,
            Some("preference"),
            Some(0.9),
            None,
            None,
            None,
        )
        .unwrap();

        let results = mgr.retrieve("dark mode", 5, &[MemoryKind::Semantic]).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "user prefers dark mode");
    }

    #[test]
    fn access_log_is_capped() {
        let mgr = manager_with_null_embedder();
        let id = mgr
            .store_memory(
                MemoryKind::Episodic,
                "did a thing",
                None,
                None,
                None,
                None,
                None,
                None,
                None,
                None,
                None,
            )
            .unwrap();

        for _ in 0..(ACCESS_CAP_PER_MEMORY + 20) {
            mgr.record_access(&id, MemoryKind::Episodic).unwrap();
        }

        let conn = mgr.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memory_accesses WHERE memory_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .unwrap();
        assert!(count as usize <= ACCESS_CAP_PER_MEMORY);
    }

    #[test]
    fn should_consolidate_rejects_short_batch() {
        let turns = vec![
            Turn { id: 1, role: "user".into(), content: "/status".into(), created_at: String::new() },
            Turn { id: 2, role: "assistant".into(), content: "ok".into(), created_at: String::new() },
            Turn { id: 3, role: "user".into(), content: "/help".into(), created_at: String::new() },
        ];
        assert!(!should_consolidate(&turns));
    }

    #[test]
    fn should_consolidate_rejects_too_few_turns() {
        let turns = vec![Turn { id: 1, role: "user".into(), content: "hello there".into(), created_at: String::new() }];
        assert!(!should_consolidate(&turns));
    }

    #[test]
    fn format_memories_is_empty_for_no_results() {
        assert_eq!(format_memories(&[]), "");
    }

    #[test]
    fn format_memories_renders_semantic_with_confidence() {
        let results = vec![RetrievedMemory {
            id: "1".into(),
            kind: MemoryKind::Semantic,
            content: "likes tea".into(),
            score: 0.9,
            similarity: 0.9,
            normalized_activation: 0.5,
            category: Some("preference".into()),
            confidence: Some(0.75),
        }];
        let rendered = format_memories(&results);
        assert!(rendered.contains("likes tea"));
        assert!(rendered.contains("0.75"));
        assert!(rendered.contains("(preference)"));
    }

    #[test]
    fn should_consolidate_allows_substantive_conversation() {
        let turns = vec![
            Turn {
                id: 1,
                role: "user".into(),
                content: "I want to switch my deployment pipeline to use blue-green releases".into(),
                created_at: String::new(),
            },
            Turn { id: 2, role: "assistant".into(), content: "Sure, let's set that up".into(), created_at: String::new() },
            Turn { id: 3, role: "user".into(), content: "great, let's do it that way from now on".into(), created_at: String::new() },
        ];
        assert!(should_consolidate(&turns));
    }
}
