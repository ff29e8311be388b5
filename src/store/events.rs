//! Events Domain
//!
//! Event metadata keyed by stream ordering.
//!
//! Row fields: `[event_id, room_id, type, sender, state_key | null, content]`.

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::{row_error, ReplicatedDomain};
use crate::error::Result;
use crate::replication::protocol::{StreamPosition, StreamRow, EVENTS_STREAM};

/// A replicated event
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub stream_ordering: StreamPosition,
    pub event_id: String,
    pub room_id: String,
    pub event_type: String,
    pub sender: String,
    pub state_key: Option<String>,
    pub content: serde_json::Value,
}

/// Replicated event tables
#[derive(Debug, Default)]
pub struct EventStore;

const EVENT_COLUMNS: &str =
    "stream_ordering, event_id, room_id, type, sender, state_key, content";

fn read_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRecord> {
    let raw: String = row.get(6)?;
    let content = serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(EventRecord {
        stream_ordering: row.get(0)?,
        event_id: row.get(1)?,
        room_id: row.get(2)?,
        event_type: row.get(3)?,
        sender: row.get(4)?,
        state_key: row.get(5)?,
        content,
    })
}

impl EventStore {
    /// Fetch an event by ID
    pub fn get_event(&self, conn: &Connection, event_id: &str) -> Result<Option<EventRecord>> {
        let sql = format!("SELECT {} FROM events WHERE event_id = ?1", EVENT_COLUMNS);
        Ok(conn.query_row(&sql, params![event_id], read_event).optional()?)
    }

    /// Events with `from < stream_ordering <= to`, oldest first
    pub fn get_events_in_range(
        &self,
        conn: &Connection,
        from: StreamPosition,
        to: StreamPosition,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {} FROM events WHERE stream_ordering > ?1 AND stream_ordering <= ?2 \
             ORDER BY stream_ordering LIMIT ?3",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![from, to, limit as i64], read_event)?;

        let mut events = Vec::new();
        for event in rows {
            events.push(event?);
        }
        Ok(events)
    }

    /// Number of replicated events
    pub fn count(&self, conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl ReplicatedDomain for EventStore {
    fn name(&self) -> &'static str {
        "events"
    }

    fn streams(&self) -> &'static [&'static str] {
        &[EVENTS_STREAM]
    }

    fn create_tables(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                stream_ordering INTEGER PRIMARY KEY,
                event_id TEXT NOT NULL UNIQUE,
                room_id TEXT NOT NULL,
                type TEXT NOT NULL,
                sender TEXT NOT NULL,
                state_key TEXT,
                content TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_room
                ON events(room_id, stream_ordering);
            "#,
        )
    }

    fn apply_row(&self, tx: &Transaction<'_>, stream: &str, row: &StreamRow) -> Result<()> {
        let position = row.position().unwrap_or_default();
        let field = |index: usize, name: &str| {
            row.str_field(index)
                .ok_or_else(|| row_error(stream, position, &format!("missing {}", name)))
        };

        let event_id = field(0, "event_id")?;
        let room_id = field(1, "room_id")?;
        let event_type = field(2, "type")?;
        let sender = field(3, "sender")?;
        let content = row
            .field(5)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        // Replays of an event already stored are ignored
        tx.execute(
            r#"
            INSERT OR IGNORE INTO events
                (stream_ordering, event_id, room_id, type, sender, state_key, content)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                position,
                event_id,
                room_id,
                event_type,
                sender,
                row.opt_str_field(4),
                content.to_string(),
            ],
        )?;

        Ok(())
    }
}
