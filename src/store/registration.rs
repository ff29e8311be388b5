//! Registration Domain
//!
//! Row fields: `[user_id, creation_ts, is_guest, appservice_id | null, deactivated]`.

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::{row_error, ReplicatedDomain};
use crate::error::Result;
use crate::replication::protocol::StreamRow;

pub const REGISTRATION_STREAM: &str = "registration";

/// A registered user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: String,
    pub creation_ts: i64,
    pub is_guest: bool,
    pub appservice_id: Option<String>,
    pub deactivated: bool,
}

/// Replicated user registrations
#[derive(Debug, Default)]
pub struct RegistrationStore;

impl RegistrationStore {
    pub fn get_user_by_id(&self, conn: &Connection, user_id: &str) -> Result<Option<UserRecord>> {
        Ok(conn
            .query_row(
                r#"
                SELECT creation_ts, is_guest, appservice_id, deactivated
                FROM users WHERE name = ?1
                "#,
                params![user_id],
                |row| {
                    Ok(UserRecord {
                        user_id: user_id.to_string(),
                        creation_ts: row.get(0)?,
                        is_guest: row.get(1)?,
                        appservice_id: row.get(2)?,
                        deactivated: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    /// Users registered by an application service
    pub fn get_users_for_appservice(
        &self,
        conn: &Connection,
        appservice_id: &str,
    ) -> Result<Vec<String>> {
        let mut stmt =
            conn.prepare("SELECT name FROM users WHERE appservice_id = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![appservice_id], |row| row.get::<_, String>(0))?;

        let mut users = Vec::new();
        for user in rows {
            users.push(user?);
        }
        Ok(users)
    }
}

impl ReplicatedDomain for RegistrationStore {
    fn name(&self) -> &'static str {
        "registration"
    }

    fn streams(&self) -> &'static [&'static str] {
        &[REGISTRATION_STREAM]
    }

    fn create_tables(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                name TEXT PRIMARY KEY,
                creation_ts INTEGER NOT NULL,
                is_guest INTEGER NOT NULL DEFAULT 0,
                appservice_id TEXT,
                deactivated INTEGER NOT NULL DEFAULT 0,
                stream_id INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_users_appservice
                ON users(appservice_id);
            "#,
        )
    }

    fn apply_row(&self, tx: &Transaction<'_>, stream: &str, row: &StreamRow) -> Result<()> {
        let position = row.position().unwrap_or_default();
        let user_id = row
            .str_field(0)
            .ok_or_else(|| row_error(stream, position, "missing user_id"))?;
        let creation_ts = row.field(1).and_then(|v| v.as_i64()).unwrap_or_default();
        let is_guest = row.field(2).and_then(|v| v.as_bool()).unwrap_or(false);
        let deactivated = row.field(4).and_then(|v| v.as_bool()).unwrap_or(false);

        tx.execute(
            r#"
            INSERT INTO users (name, creation_ts, is_guest, appservice_id, deactivated, stream_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(name) DO UPDATE SET
                is_guest = ?3, appservice_id = ?4, deactivated = ?5, stream_id = ?6
            "#,
            params![
                user_id,
                creation_ts,
                is_guest,
                row.opt_str_field(3),
                deactivated,
                position,
            ],
        )?;

        Ok(())
    }
}
