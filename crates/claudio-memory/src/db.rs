use rusqlite::{Connection, Result};

/// Open a memory database connection with the pragmas every writer needs:
/// WAL so readers never block the writer, and a generous busy timeout since
/// the pipeline worker and the reconsolidation maintenance task share one
/// file.
pub fn open(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    init_db(&conn)?;
    Ok(conn)
}

/// Initialise memory tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_memory_tables(conn)?;
    create_access_log(conn)?;
    create_meta_table(conn)?;
    create_fts_index(conn)?;
    Ok(())
}

fn create_memory_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS episodic_memories (
            id           TEXT PRIMARY KEY,
            content      TEXT NOT NULL,
            context      TEXT,
            outcome      TEXT,
            importance   REAL NOT NULL DEFAULT 0.5,
            semanticized INTEGER NOT NULL DEFAULT 0,
            embedding    BLOB,
            created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
            updated_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
        );

        CREATE TABLE IF NOT EXISTS semantic_memories (
            id                TEXT PRIMARY KEY,
            content           TEXT NOT NULL,
            category          TEXT,
            confidence        REAL NOT NULL DEFAULT 0.8,
            source_episode_id TEXT,
            supersedes_id     TEXT,
            embedding         BLOB,
            created_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
            updated_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
        );

        CREATE TABLE IF NOT EXISTS procedural_memories (
            id              TEXT PRIMARY KEY,
            content         TEXT NOT NULL,
            trigger_pattern TEXT,
            success_rate    REAL NOT NULL DEFAULT 1.0,
            embedding       BLOB,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now')),
            updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
        );",
    )
}

fn create_access_log(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_accesses (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id   TEXT NOT NULL,
            memory_type TEXT NOT NULL CHECK(memory_type IN ('episodic', 'semantic', 'procedural')),
            accessed_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
        );
        CREATE INDEX IF NOT EXISTS idx_accesses_memory ON memory_accesses(memory_id, memory_type);
        CREATE INDEX IF NOT EXISTS idx_accesses_time ON memory_accesses(accessed_at);",
    )
}

fn create_meta_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
}

/// External-content FTS5 table over all three memory kinds. We maintain it
/// manually (insert/delete alongside the primary tables) rather than via
/// SQLite triggers, matching the explicit-sync discipline the original
/// implementation uses.
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
            memory_id,
            memory_type,
            content,
            tokenize='unicode61'
        );",
    )
}

/// Detect an embedding-model change and null out stale embeddings so they
/// get lazily re-embedded. Returns the previously stored model name, if any.
pub fn check_model_change(conn: &Connection, current_model: &str) -> Result<Option<String>> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM memory_meta WHERE key = 'embedding_model'",
            [],
            |row| row.get(0),
        )
        .ok();

    if stored.as_deref() == Some(current_model) {
        return Ok(None);
    }

    if stored.is_some() {
        for table in ["episodic_memories", "semantic_memories", "procedural_memories"] {
            conn.execute(
                &format!("UPDATE {table} SET embedding = NULL WHERE embedding IS NOT NULL"),
                [],
            )?;
        }
    }

    conn.execute(
        "INSERT INTO memory_meta (key, value) VALUES ('embedding_model', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [current_model],
    )?;

    Ok(stored)
}

pub fn get_last_consolidated_id(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT value FROM memory_meta WHERE key = 'last_consolidated_id'",
        [],
        |row| row.get::<_, String>(0),
    )
    .map(|s| s.parse().unwrap_or(0))
    .or(Ok(0))
}

pub fn set_last_consolidated_id(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO memory_meta (key, value) VALUES ('last_consolidated_id', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [id.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_all_tables() {
        let dir = tempdir().unwrap();
        let conn = open(&dir.path().join("history.db")).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='episodic_memories'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn model_change_nulls_embeddings() {
        let dir = tempdir().unwrap();
        let conn = open(&dir.path().join("history.db")).unwrap();
        conn.execute(
            "INSERT INTO semantic_memories (id, content, embedding) VALUES ('a', 'x', X'0000')",
            [],
        )
        .unwrap();
        check_model_change(&conn, "model-a").unwrap();
        let prev = check_model_change(&conn, "model-b").unwrap();
        assert_eq!(prev.as_deref(), Some("model-a"));

        let embedding: Option<Vec<u8>> = conn
            .query_row("SELECT embedding FROM semantic_memories WHERE id='a'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(embedding.is_none());
    }

    #[test]
    fn last_consolidated_id_round_trips() {
        let dir = tempdir().unwrap();
        let conn = open(&dir.path().join("history.db")).unwrap();
        assert_eq!(get_last_consolidated_id(&conn).unwrap(), 0);
        set_last_consolidated_id(&conn, 42).unwrap();
        assert_eq!(get_last_consolidated_id(&conn).unwrap(), 42);
    }
}
