//! Stream Positions
//!
//! Persistent per-stream cursors. Written inside the same transaction as the
//! rows they cover, so a position never runs ahead of applied data.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::replication::protocol::{StreamPosition, StreamPositions};

pub(crate) fn create_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS stream_positions (
            stream TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
}

/// Position of a single stream, 0 if never advanced
pub(crate) fn get(conn: &Connection, stream: &str) -> Result<StreamPosition> {
    let position = conn
        .query_row(
            "SELECT position FROM stream_positions WHERE stream = ?1",
            params![stream],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(position.unwrap_or(0))
}

/// Advance a stream's position. Never moves a position backwards.
pub(crate) fn advance(conn: &Connection, stream: &str, position: StreamPosition) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO stream_positions (stream, position) VALUES (?1, ?2)
        ON CONFLICT(stream) DO UPDATE SET
            position = MAX(position, ?2),
            updated_at = CURRENT_TIMESTAMP
        "#,
        params![stream, position],
    )?;
    Ok(())
}

/// Positions for the given streams, defaulting to 0
pub(crate) fn load(conn: &Connection, streams: &[&str]) -> Result<StreamPositions> {
    let mut positions = StreamPositions::new();
    for stream in streams {
        positions.insert((*stream).to_string(), get(conn, stream)?);
    }
    Ok(positions)
}
