//! Application Service Registry Domain
//!
//! Row fields: `[id, definition | null]`. A null definition unregisters
//! the service.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

use super::{row_error, ReplicatedDomain};
use crate::error::Result;
use crate::replication::protocol::StreamRow;

pub const APPSERVICE_STREAM: &str = "appservice";

/// A namespace an application service claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(default)]
    pub exclusive: bool,
    pub regex: String,
}

/// Namespaces grouped by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespaces {
    #[serde(default)]
    pub users: Vec<Namespace>,
    #[serde(default)]
    pub aliases: Vec<Namespace>,
    #[serde(default)]
    pub rooms: Vec<Namespace>,
}

/// Registration of an application service as replicated from the primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppServiceDefinition {
    pub url: Option<String>,
    pub sender_localpart: String,
    #[serde(default)]
    pub namespaces: Namespaces,
    #[serde(default)]
    pub rate_limited: bool,
    #[serde(default)]
    pub protocols: Vec<String>,
}

/// A registered application service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationService {
    pub id: String,
    pub definition: AppServiceDefinition,
}

/// Replicated application service registry
#[derive(Debug, Default)]
pub struct AppServiceStore;

impl AppServiceStore {
    /// All registered application services, ordered by ID
    pub fn get_app_services(&self, conn: &Connection) -> Result<Vec<ApplicationService>> {
        let mut stmt =
            conn.prepare("SELECT id, definition FROM application_services ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut services = Vec::new();
        for result in rows {
            let (id, definition) = result?;
            match serde_json::from_str(&definition) {
                Ok(definition) => services.push(ApplicationService { id, definition }),
                Err(e) => tracing::warn!("Skipping unreadable appservice {}: {}", id, e),
            }
        }
        Ok(services)
    }

    /// A single application service by ID
    pub fn get_app_service_by_id(
        &self,
        conn: &Connection,
        id: &str,
    ) -> Result<Option<ApplicationService>> {
        let definition: Option<String> = conn
            .query_row(
                "SELECT definition FROM application_services WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(definition
            .and_then(|d| serde_json::from_str(&d).ok())
            .map(|definition| ApplicationService {
                id: id.to_string(),
                definition,
            }))
    }
}

impl ReplicatedDomain for AppServiceStore {
    fn name(&self) -> &'static str {
        "appservice"
    }

    fn streams(&self) -> &'static [&'static str] {
        &[APPSERVICE_STREAM]
    }

    fn create_tables(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS application_services (
                id TEXT PRIMARY KEY,
                definition TEXT NOT NULL,
                stream_id INTEGER NOT NULL
            );
            "#,
        )
    }

    fn apply_row(&self, tx: &Transaction<'_>, stream: &str, row: &StreamRow) -> Result<()> {
        let position = row.position().unwrap_or_default();
        let id = row
            .str_field(0)
            .ok_or_else(|| row_error(stream, position, "missing appservice id"))?;

        match row.field(1).filter(|v| !v.is_null()) {
            Some(value) => {
                let definition: AppServiceDefinition = serde_json::from_value(value.clone())
                    .map_err(|e| {
                        row_error(stream, position, &format!("bad definition for {}: {}", id, e))
                    })?;
                let encoded = serde_json::to_string(&definition)
                    .map_err(|e| row_error(stream, position, &e.to_string()))?;

                tx.execute(
                    r#"
                    INSERT INTO application_services (id, definition, stream_id)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(id) DO UPDATE SET definition = ?2, stream_id = ?3
                    "#,
                    params![id, encoded, position],
                )?;
            }
            None => {
                tx.execute(
                    "DELETE FROM application_services WHERE id = ?1",
                    params![id],
                )?;
            }
        }

        Ok(())
    }
}
