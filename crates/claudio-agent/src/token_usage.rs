//! Best-effort persistence of per-invocation token usage. Failures here are
//! never allowed to fail the surrounding pipeline turn — the caller logs and
//! moves on.

use rusqlite::Connection;
use tracing::warn;

use crate::error::{AgentError, Result};
use crate::runner::TokenUsage;

/// Create the `token_usage` table if it doesn't already exist. Safe to call
/// on every startup.
pub fn init_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS token_usage (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            model                  TEXT NOT NULL,
            input_tokens           INTEGER NOT NULL,
            output_tokens          INTEGER NOT NULL,
            cache_read_tokens      INTEGER NOT NULL DEFAULT 0,
            cache_creation_tokens  INTEGER NOT NULL DEFAULT 0,
            cost_usd               REAL NOT NULL DEFAULT 0,
            duration_ms            INTEGER NOT NULL DEFAULT 0,
            created_at             TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
        );",
    )
}

fn insert(conn: &Connection, usage: &TokenUsage) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO token_usage
            (model, input_tokens, output_tokens, cache_read_tokens, cache_creation_tokens, cost_usd, duration_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            usage.model,
            usage.input_tokens,
            usage.output_tokens,
            usage.cache_read_tokens,
            usage.cache_creation_tokens,
            usage.cost_usd,
            usage.duration_ms,
        ],
    )?;
    Ok(())
}

/// Persist `usage` to `db_path`, opening a short-lived connection. Spawned
/// onto a blocking thread by the caller so a slow disk never stalls the
/// pipeline worker; any error is logged and swallowed.
pub async fn persist_best_effort(db_path: std::path::PathBuf, usage: TokenUsage) {
    let result = tokio::task::spawn_blocking(move || -> Result<()> {
        let conn = Connection::open(&db_path).map_err(AgentError::TokenUsage)?;
        init_table(&conn).map_err(AgentError::TokenUsage)?;
        insert(&conn, &usage).map_err(AgentError::TokenUsage)?;
        Ok(())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "failed to persist token usage, continuing"),
        Err(join_err) => warn!(error = %join_err, "token usage persistence task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_roundtrips_a_row() {
        let conn = Connection::open_in_memory().unwrap();
        init_table(&conn).unwrap();
        insert(
            &conn,
            &TokenUsage {
                model: "sonnet".into(),
                input_tokens: 100,
                output_tokens: 40,
                cache_read_tokens: 0,
                cache_creation_tokens: 0,
                cost_usd: 0.002,
                duration_ms: 900,
            },
        )
        .unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM token_usage", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
