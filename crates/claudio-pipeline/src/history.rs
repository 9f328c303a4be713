//! Per-bot conversation history, stored alongside `token_usage` in the bot's
//! `history.db`. Mirrors the pragma setup claudio-memory uses for its own
//! SQLite file — one writer, WAL mode, generous busy timeout.

use claudio_core::{HistoryRole, HistoryRow};
use rusqlite::Connection;

use crate::error::Result;

pub fn open(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    init_table(&conn)?;
    Ok(conn)
}

fn init_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS history (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            role       TEXT NOT NULL,
            content    TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%S', 'now'))
        );",
    )
}

pub fn append(conn: &Connection, role: HistoryRole, content: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO history (role, content) VALUES (?1, ?2)",
        rusqlite::params![role.to_string(), content],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Overwrite a previously recorded row's content — used by descriptive
/// summarisation, which replaces a document placeholder with a 200-char
/// summary of the assistant's reply once that reply is known.
pub fn overwrite(conn: &Connection, id: i64, content: &str) -> Result<()> {
    conn.execute("UPDATE history SET content = ?1 WHERE id = ?2", rusqlite::params![content, id])?;
    Ok(())
}

/// Most recent `limit` rows, oldest first (ready to fold into a prompt).
pub fn recent(conn: &Connection, limit: u32) -> Result<Vec<HistoryRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, role, content, created_at FROM history ORDER BY id DESC LIMIT ?1",
    )?;
    let mut rows: Vec<HistoryRow> = stmt
        .query_map(rusqlite::params![limit], row_to_history)?
        .collect::<rusqlite::Result<_>>()?;
    rows.reverse();
    Ok(rows)
}

fn row_to_history(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryRow> {
    let role: String = row.get(1)?;
    Ok(HistoryRow {
        id: row.get(0)?,
        role: if role == "assistant" { HistoryRole::Assistant } else { HistoryRole::User },
        content: row.get(2)?,
        created_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_table(&conn).unwrap();
        conn
    }

    #[test]
    fn append_and_recent_round_trip_in_order() {
        let conn = memory_conn();
        append(&conn, HistoryRole::User, "hi").unwrap();
        append(&conn, HistoryRole::Assistant, "hello").unwrap();

        let rows = recent(&conn, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].content, "hi");
        assert_eq!(rows[1].content, "hello");
        assert!(matches!(rows[1].role, HistoryRole::Assistant));
    }

    #[test]
    fn recent_respects_limit_and_stays_oldest_first() {
        let conn = memory_conn();
        for i in 0..5 {
            append(&conn, HistoryRole::User, &format!("msg {i}")).unwrap();
        }
        let rows = recent(&conn, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].content, "msg 3");
        assert_eq!(rows[1].content, "msg 4");
    }

    #[test]
    fn overwrite_replaces_content_by_id() {
        let conn = memory_conn();
        let id = append(&conn, HistoryRole::User, "placeholder").unwrap();
        overwrite(&conn, id, "real summary").unwrap();
        let rows = recent(&conn, 1).unwrap();
        assert_eq!(rows[0].content, "real summary");
    }
}
