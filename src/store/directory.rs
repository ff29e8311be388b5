//! Directory Domain
//!
//! Room alias to room ID mappings.
//!
//! Row fields: `[room_alias, room_id | null, creator | null, servers | null]`.
//! A null room ID removes the alias.

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::{row_error, ReplicatedDomain};
use crate::error::Result;
use crate::replication::protocol::StreamRow;

pub const DIRECTORY_STREAM: &str = "directory";

/// Where a room alias points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomAliasMapping {
    pub room_alias: String,
    pub room_id: String,
    pub creator: Option<String>,
    pub servers: Vec<String>,
}

/// Replicated directory tables
#[derive(Debug, Default)]
pub struct DirectoryStore;

impl DirectoryStore {
    /// Look up the room an alias points to
    pub fn get_association_from_room_alias(
        &self,
        conn: &Connection,
        room_alias: &str,
    ) -> Result<Option<RoomAliasMapping>> {
        let row = conn
            .query_row(
                "SELECT room_id, creator, servers FROM room_aliases WHERE room_alias = ?1",
                params![room_alias],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(room_id, creator, servers)| RoomAliasMapping {
            room_alias: room_alias.to_string(),
            room_id,
            creator,
            servers: serde_json::from_str(&servers).unwrap_or_default(),
        }))
    }

    /// All aliases currently pointing at a room
    pub fn get_aliases_for_room(&self, conn: &Connection, room_id: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT room_alias FROM room_aliases WHERE room_id = ?1 ORDER BY room_alias",
        )?;
        let rows = stmt.query_map(params![room_id], |row| row.get::<_, String>(0))?;

        let mut aliases = Vec::new();
        for alias in rows {
            aliases.push(alias?);
        }
        Ok(aliases)
    }
}

impl ReplicatedDomain for DirectoryStore {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn streams(&self) -> &'static [&'static str] {
        &[DIRECTORY_STREAM]
    }

    fn create_tables(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS room_aliases (
                room_alias TEXT PRIMARY KEY,
                room_id TEXT NOT NULL,
                creator TEXT,
                servers TEXT NOT NULL DEFAULT '[]',
                stream_id INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_room_aliases_room
                ON room_aliases(room_id);
            "#,
        )
    }

    fn apply_row(&self, tx: &Transaction<'_>, stream: &str, row: &StreamRow) -> Result<()> {
        let position = row.position().unwrap_or_default();
        let room_alias = row
            .str_field(0)
            .ok_or_else(|| row_error(stream, position, "missing room_alias"))?;

        match row.opt_str_field(1) {
            Some(room_id) => {
                let servers = row
                    .field(3)
                    .filter(|v| v.is_array())
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "[]".to_string());

                tx.execute(
                    r#"
                    INSERT INTO room_aliases (room_alias, room_id, creator, servers, stream_id)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(room_alias) DO UPDATE SET
                        room_id = ?2, creator = ?3, servers = ?4, stream_id = ?5
                    "#,
                    params![room_alias, room_id, row.opt_str_field(2), servers, position],
                )?;
            }
            None => {
                tx.execute(
                    "DELETE FROM room_aliases WHERE room_alias = ?1",
                    params![room_alias],
                )?;
            }
        }

        Ok(())
    }
}
