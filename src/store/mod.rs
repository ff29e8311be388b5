//! Replica Store
//!
//! Local, partial projection of the primary's database. Each replicated data
//! domain owns its tables and the stream(s) that feed them; the store composes
//! the domains, keeps one cursor per stream and routes every stream batch of a
//! replication response to the domain that owns it.
//!
//! The replication loop is the only writer. A stream's row writes and its
//! cursor advance share one SQLite transaction.

mod appservice;
mod directory;
mod events;
mod positions;
mod profiling;
mod registration;

pub use appservice::{
    AppServiceDefinition, AppServiceStore, ApplicationService, Namespace, Namespaces,
    APPSERVICE_STREAM,
};
pub use directory::{DirectoryStore, RoomAliasMapping, DIRECTORY_STREAM};
pub use events::{EventRecord, EventStore};
pub use profiling::{StoreProfiler, StreamStats};
pub use registration::{RegistrationStore, UserRecord, REGISTRATION_STREAM};

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use lru::LruCache;
use rusqlite::{Connection, Transaction};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::replication::protocol::{
    ReplicationResponse, StreamBatch, StreamPosition, StreamPositions, StreamRow,
};

/// Default number of events kept by [`ReplicaStore::start_caching`]
pub const DEFAULT_EVENT_CACHE_SIZE: usize = 10_000;

/// A replicated data domain: its tables and the streams that feed them
pub trait ReplicatedDomain: Send + Sync {
    /// Domain name, for logs
    fn name(&self) -> &'static str;

    /// Streams this domain consumes
    fn streams(&self) -> &'static [&'static str];

    /// Create the domain's local tables
    fn create_tables(&self, conn: &Connection) -> rusqlite::Result<()>;

    /// Write one row. Rows arrive in stream order, each at most once per
    /// committed position.
    fn apply_row(&self, tx: &Transaction<'_>, stream: &str, row: &StreamRow) -> Result<()>;
}

pub(crate) fn row_error(stream: &str, position: StreamPosition, reason: &str) -> Error {
    Error::Apply {
        stream: stream.to_string(),
        reason: format!("row at position {}: {}", position, reason),
    }
}

/// A response that failed part way through. Batches in `applied` are
/// committed; the stream that raised `error` and everything after it are not.
#[derive(Debug)]
pub struct PartialApply {
    pub applied: Vec<AppliedBatch>,
    pub error: Error,
}

impl From<PartialApply> for Error {
    fn from(partial: PartialApply) -> Self {
        partial.error
    }
}

/// Outcome of applying one stream batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedBatch {
    pub stream: String,
    /// Cursor before the batch
    pub previous: StreamPosition,
    /// Cursor after the batch
    pub position: StreamPosition,
    pub applied_rows: usize,
    /// Rows already covered by the previous cursor
    pub skipped_rows: usize,
}

impl AppliedBatch {
    pub fn advanced(&self) -> bool {
        self.position > self.previous
    }
}

/// Composed replica of the directory, events, application service and
/// registration domains
pub struct ReplicaStore {
    conn: Mutex<Connection>,
    directory: DirectoryStore,
    events: EventStore,
    appservices: AppServiceStore,
    registration: RegistrationStore,
    profiler: StoreProfiler,
    event_cache: std::sync::Mutex<Option<LruCache<String, EventRecord>>>,
}

impl ReplicaStore {
    /// Create or open the replica database under `data_dir`
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        Self::open(&data_dir.join("replica.db"))
    }

    /// Open the replica database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Replica that lives only as long as the process
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            directory: DirectoryStore,
            events: EventStore,
            appservices: AppServiceStore,
            registration: RegistrationStore,
            profiler: StoreProfiler::default(),
            event_cache: std::sync::Mutex::new(None),
        };

        {
            let conn = store
                .conn
                .try_lock()
                .map_err(|_| Error::Store("replica connection busy during setup".into()))?;
            positions::create_table(&conn)?;
            for domain in store.domains() {
                domain.create_tables(&conn)?;
            }
        }

        Ok(store)
    }

    fn domains(&self) -> [&dyn ReplicatedDomain; 4] {
        [
            &self.directory,
            &self.events,
            &self.appservices,
            &self.registration,
        ]
    }

    fn domain_for(&self, stream: &str) -> Option<&dyn ReplicatedDomain> {
        self.domains()
            .into_iter()
            .find(|domain| domain.streams().iter().any(|s| *s == stream))
    }

    /// Every stream name consumed by some domain
    pub fn stream_names(&self) -> Vec<&'static str> {
        self.domains()
            .iter()
            .flat_map(|domain| domain.streams().iter().copied())
            .collect()
    }

    /// Current position of every known stream
    pub async fn stream_positions(&self) -> Result<StreamPositions> {
        let conn = self.conn.lock().await;
        positions::load(&conn, &self.stream_names())
    }

    /// Current position of one stream
    pub async fn stream_position(&self, stream: &str) -> Result<StreamPosition> {
        let conn = self.conn.lock().await;
        positions::get(&conn, stream)
    }

    /// Apply a replication response.
    ///
    /// Streams are applied one transaction each, in name order. Streams no
    /// domain consumes are ignored. The first failing stream stops the call
    /// with its own transaction rolled back; streams committed before it are
    /// returned alongside the error.
    pub async fn process_replication(
        &self,
        response: &ReplicationResponse,
    ) -> std::result::Result<Vec<AppliedBatch>, PartialApply> {
        let mut conn = self.conn.lock().await;
        let mut applied = Vec::with_capacity(response.streams.len());

        for (stream, batch) in &response.streams {
            let domain = match self.domain_for(stream) {
                Some(domain) => domain,
                None => {
                    tracing::debug!("Ignoring unknown replication stream {}", stream);
                    continue;
                }
            };

            let start = Instant::now();
            let outcome = match apply_stream(&mut conn, domain, stream, batch) {
                Ok(outcome) => outcome,
                Err(error) => return Err(PartialApply { applied, error }),
            };
            self.profiler
                .record(stream, outcome.applied_rows, start.elapsed());

            if outcome.advanced() {
                tracing::debug!(
                    "{} advanced {} -> {} ({} rows, {} skipped)",
                    stream,
                    outcome.previous,
                    outcome.position,
                    outcome.applied_rows,
                    outcome.skipped_rows
                );
            }
            applied.push(outcome);
        }

        Ok(applied)
    }

    /// Turn on apply profiling and log a summary every `interval`.
    ///
    /// The logging task stops once the store is dropped.
    pub fn start_profiling(self: &Arc<Self>, interval: Duration) {
        if !self.profiler.enable() {
            return;
        }

        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => store.profiler.log_window(),
                    None => break,
                }
            }
        });
        tracing::info!("Store profiling enabled");
    }

    pub fn profiler(&self) -> &StoreProfiler {
        &self.profiler
    }

    /// Turn on the event lookup cache. Events never change once replicated,
    /// so entries only leave the cache to make room.
    pub fn start_caching(&self, capacity: usize) {
        if let Ok(mut cache) = self.event_cache.lock() {
            if cache.is_none() {
                let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
                *cache = Some(LruCache::new(capacity));
                tracing::info!("Event cache enabled ({} entries)", capacity);
            }
        }
    }

    fn cached_event(&self, event_id: &str) -> Option<EventRecord> {
        let mut cache = self.event_cache.lock().ok()?;
        cache.as_mut()?.get(event_id).cloned()
    }

    fn cache_event(&self, event: &EventRecord) {
        if let Ok(mut cache) = self.event_cache.lock() {
            if let Some(cache) = cache.as_mut() {
                cache.put(event.event_id.clone(), event.clone());
            }
        }
    }

    // ========== Reads ==========

    pub async fn get_association_from_room_alias(
        &self,
        room_alias: &str,
    ) -> Result<Option<RoomAliasMapping>> {
        let conn = self.conn.lock().await;
        self.directory
            .get_association_from_room_alias(&conn, room_alias)
    }

    pub async fn get_aliases_for_room(&self, room_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        self.directory.get_aliases_for_room(&conn, room_id)
    }

    pub async fn get_event(&self, event_id: &str) -> Result<Option<EventRecord>> {
        if let Some(event) = self.cached_event(event_id) {
            return Ok(Some(event));
        }

        let event = {
            let conn = self.conn.lock().await;
            self.events.get_event(&conn, event_id)?
        };
        if let Some(event) = &event {
            self.cache_event(event);
        }
        Ok(event)
    }

    /// Events with `from < stream_ordering <= to`, oldest first
    pub async fn get_events_in_range(
        &self,
        from: StreamPosition,
        to: StreamPosition,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        let conn = self.conn.lock().await;
        self.events.get_events_in_range(&conn, from, to, limit)
    }

    pub async fn event_count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        self.events.count(&conn)
    }

    pub async fn get_app_services(&self) -> Result<Vec<ApplicationService>> {
        let conn = self.conn.lock().await;
        self.appservices.get_app_services(&conn)
    }

    pub async fn get_app_service_by_id(&self, id: &str) -> Result<Option<ApplicationService>> {
        let conn = self.conn.lock().await;
        self.appservices.get_app_service_by_id(&conn, id)
    }

    pub async fn get_user_by_id(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().await;
        self.registration.get_user_by_id(&conn, user_id)
    }

    pub async fn get_users_for_appservice(&self, appservice_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        self.registration
            .get_users_for_appservice(&conn, appservice_id)
    }
}

/// Check that a batch's rows are ordered and within its declared position
fn validate_batch(stream: &str, batch: &StreamBatch) -> Result<()> {
    let mut last: Option<StreamPosition> = None;
    for row in &batch.rows {
        let position = row.position().ok_or_else(|| Error::Inconsistent {
            stream: stream.to_string(),
            reason: "row without a stream position".into(),
        })?;

        if let Some(last) = last {
            if position < last {
                return Err(Error::Inconsistent {
                    stream: stream.to_string(),
                    reason: format!("row {} arrived after row {}", position, last),
                });
            }
        }
        if position > batch.position {
            return Err(Error::Inconsistent {
                stream: stream.to_string(),
                reason: format!(
                    "row {} is beyond the batch position {}",
                    position, batch.position
                ),
            });
        }
        last = Some(position);
    }
    Ok(())
}

fn apply_stream(
    conn: &mut Connection,
    domain: &dyn ReplicatedDomain,
    stream: &str,
    batch: &StreamBatch,
) -> Result<AppliedBatch> {
    validate_batch(stream, batch)?;

    let tx = conn.transaction()?;
    let previous = positions::get(&tx, stream)?;

    if batch.position <= previous {
        // Already covered: a replayed or stale batch
        return Ok(AppliedBatch {
            stream: stream.to_string(),
            previous,
            position: previous,
            applied_rows: 0,
            skipped_rows: batch.rows.len(),
        });
    }

    let mut applied_rows = 0;
    let mut skipped_rows = 0;
    for row in &batch.rows {
        if row.position().unwrap_or_default() <= previous {
            skipped_rows += 1;
            continue;
        }
        domain.apply_row(&tx, stream, row)?;
        applied_rows += 1;
    }

    positions::advance(&tx, stream, batch.position)?;
    tx.commit().map_err(|e| Error::Apply {
        stream: stream.to_string(),
        reason: format!("commit failed in {}: {}", domain.name(), e),
    })?;

    Ok(AppliedBatch {
        stream: stream.to_string(),
        previous,
        position: batch.position,
        applied_rows,
        skipped_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::protocol::EVENTS_STREAM;
    use serde_json::json;
    use tempfile::tempdir;

    fn event_row(n: i64) -> StreamRow {
        StreamRow::new(
            n,
            vec![
                json!(format!("$event{}:hs", n)),
                json!("!room:hs"),
                json!("m.room.message"),
                json!("@alice:hs"),
                json!(null),
                json!({"body": format!("message {}", n)}),
            ],
        )
    }

    fn events_batch(from: i64, to: i64) -> ReplicationResponse {
        let rows = (from..=to).map(event_row).collect();
        ReplicationResponse::default().with_stream(EVENTS_STREAM, StreamBatch::new(to, rows))
    }

    #[tokio::test]
    async fn test_initial_positions() {
        let store = ReplicaStore::open_in_memory().unwrap();
        let positions = store.stream_positions().await.unwrap();

        assert_eq!(positions.len(), 4);
        for stream in ["directory", "events", "appservice", "registration"] {
            assert_eq!(positions.get(stream), Some(&0), "{}", stream);
        }
    }

    #[tokio::test]
    async fn test_apply_events_batch() {
        let store = ReplicaStore::open_in_memory().unwrap();

        let applied = store.process_replication(&events_batch(1, 5)).await.unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].applied_rows, 5);
        assert_eq!(applied[0].position, 5);

        assert_eq!(store.stream_position(EVENTS_STREAM).await.unwrap(), 5);
        assert_eq!(store.event_count().await.unwrap(), 5);

        let event = store.get_event("$event3:hs").await.unwrap().unwrap();
        assert_eq!(event.stream_ordering, 3);
        assert_eq!(event.content["body"], "message 3");

        let range = store.get_events_in_range(2, 4, 100).await.unwrap();
        let orderings: Vec<_> = range.iter().map(|e| e.stream_ordering).collect();
        assert_eq!(orderings, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_replayed_batch_is_noop() {
        let store = ReplicaStore::open_in_memory().unwrap();
        let response = events_batch(1, 5);

        store.process_replication(&response).await.unwrap();
        let applied = store.process_replication(&response).await.unwrap();

        assert_eq!(applied[0].applied_rows, 0);
        assert_eq!(applied[0].skipped_rows, 5);
        assert!(!applied[0].advanced());
        assert_eq!(store.stream_position(EVENTS_STREAM).await.unwrap(), 5);
        assert_eq!(store.event_count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_overlapping_batch_skips_covered_rows() {
        let store = ReplicaStore::open_in_memory().unwrap();
        store.process_replication(&events_batch(1, 5)).await.unwrap();

        let applied = store.process_replication(&events_batch(3, 8)).await.unwrap();
        assert_eq!(applied[0].skipped_rows, 3);
        assert_eq!(applied[0].applied_rows, 3);
        assert_eq!(store.stream_position(EVENTS_STREAM).await.unwrap(), 8);
        assert_eq!(store.event_count().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_stale_batch_never_rewinds() {
        let store = ReplicaStore::open_in_memory().unwrap();
        store.process_replication(&events_batch(1, 5)).await.unwrap();
        store.process_replication(&events_batch(1, 3)).await.unwrap();

        assert_eq!(store.stream_position(EVENTS_STREAM).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_inconsistent_batch_rejected() {
        let store = ReplicaStore::open_in_memory().unwrap();

        // Row beyond the declared position
        let response = ReplicationResponse::default().with_stream(
            EVENTS_STREAM,
            StreamBatch::new(2, vec![event_row(1), event_row(3)]),
        );
        let err = store.process_replication(&response).await.unwrap_err();
        assert!(matches!(err.error, Error::Inconsistent { .. }));
        assert!(err.applied.is_empty());

        // Rows out of order
        let response = ReplicationResponse::default().with_stream(
            EVENTS_STREAM,
            StreamBatch::new(3, vec![event_row(2), event_row(1)]),
        );
        assert!(store.process_replication(&response).await.is_err());

        assert_eq!(store.stream_position(EVENTS_STREAM).await.unwrap(), 0);
        assert_eq!(store.event_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_row_rolls_back_position() {
        let store = ReplicaStore::open_in_memory().unwrap();

        // Third row is missing its required fields
        let response = ReplicationResponse::default().with_stream(
            EVENTS_STREAM,
            StreamBatch::new(
                3,
                vec![event_row(1), event_row(2), StreamRow::new(3, vec![json!("$x:hs")])],
            ),
        );
        let err = store.process_replication(&response).await.unwrap_err();
        assert!(matches!(err.error, Error::Apply { .. }));

        assert_eq!(store.stream_position(EVENTS_STREAM).await.unwrap(), 0);
        assert_eq!(store.event_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_later_stream_failure_reports_committed_batches() {
        let store = ReplicaStore::open_in_memory().unwrap();

        // "registration" sorts after "events" and carries a broken row
        let response = events_batch(1, 3).with_stream(
            REGISTRATION_STREAM,
            StreamBatch::new(1, vec![StreamRow(json!([1]))]),
        );
        let err = store.process_replication(&response).await.unwrap_err();

        assert!(matches!(err.error, Error::Apply { .. }));
        assert_eq!(err.applied.len(), 1);
        assert_eq!(err.applied[0].stream, EVENTS_STREAM);
        assert_eq!(err.applied[0].position, 3);

        assert_eq!(store.stream_position(EVENTS_STREAM).await.unwrap(), 3);
        assert_eq!(store.stream_position(REGISTRATION_STREAM).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_stream_ignored() {
        let store = ReplicaStore::open_in_memory().unwrap();
        let response = events_batch(1, 2).with_stream(
            "typing",
            StreamBatch::new(40, vec![StreamRow(json!({"room_id": "!r:hs"}))]),
        );

        let applied = store.process_replication(&response).await.unwrap();
        assert_eq!(applied.len(), 1);

        let positions = store.stream_positions().await.unwrap();
        assert!(!positions.contains_key("typing"));
        assert_eq!(positions.get(EVENTS_STREAM), Some(&2));
    }

    #[tokio::test]
    async fn test_position_advances_without_rows() {
        let store = ReplicaStore::open_in_memory().unwrap();
        let response = ReplicationResponse::default()
            .with_stream(EVENTS_STREAM, StreamBatch::new(9, vec![]));

        store.process_replication(&response).await.unwrap();
        assert_eq!(store.stream_position(EVENTS_STREAM).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_directory_stream() {
        let store = ReplicaStore::open_in_memory().unwrap();
        let response = ReplicationResponse::default().with_stream(
            DIRECTORY_STREAM,
            StreamBatch::new(
                2,
                vec![
                    StreamRow::new(
                        1,
                        vec![json!("#bridge:hs"), json!("!room:hs"), json!("@admin:hs"), json!(["hs"])],
                    ),
                    StreamRow::new(2, vec![json!("#old:hs"), json!("!room:hs")]),
                ],
            ),
        );
        store.process_replication(&response).await.unwrap();

        let mapping = store
            .get_association_from_room_alias("#bridge:hs")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mapping.room_id, "!room:hs");
        assert_eq!(mapping.servers, vec!["hs".to_string()]);
        assert_eq!(
            store.get_aliases_for_room("!room:hs").await.unwrap(),
            vec!["#bridge:hs".to_string(), "#old:hs".to_string()]
        );

        // Null room ID removes the alias
        let removal = ReplicationResponse::default().with_stream(
            DIRECTORY_STREAM,
            StreamBatch::new(3, vec![StreamRow::new(3, vec![json!("#old:hs"), json!(null)])]),
        );
        store.process_replication(&removal).await.unwrap();
        assert!(store
            .get_association_from_room_alias("#old:hs")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_appservice_and_registration_streams() {
        let store = ReplicaStore::open_in_memory().unwrap();
        let definition = json!({
            "url": "http://bridge:9000",
            "sender_localpart": "irc",
            "namespaces": {"users": [{"exclusive": true, "regex": "@irc_.*"}]}
        });
        let response = ReplicationResponse::default()
            .with_stream(
                APPSERVICE_STREAM,
                StreamBatch::new(1, vec![StreamRow::new(1, vec![json!("irc"), definition])]),
            )
            .with_stream(
                REGISTRATION_STREAM,
                StreamBatch::new(
                    4,
                    vec![StreamRow::new(
                        4,
                        vec![json!("@irc_bob:hs"), json!(1_700_000_000_000i64), json!(false), json!("irc")],
                    )],
                ),
            );
        store.process_replication(&response).await.unwrap();

        let services = store.get_app_services().await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].definition.sender_localpart, "irc");
        assert!(services[0].definition.namespaces.users[0].exclusive);

        let user = store.get_user_by_id("@irc_bob:hs").await.unwrap().unwrap();
        assert_eq!(user.appservice_id.as_deref(), Some("irc"));
        assert!(!user.deactivated);
        assert_eq!(
            store.get_users_for_appservice("irc").await.unwrap(),
            vec!["@irc_bob:hs".to_string()]
        );

        // Unregister
        let removal = ReplicationResponse::default().with_stream(
            APPSERVICE_STREAM,
            StreamBatch::new(2, vec![StreamRow::new(2, vec![json!("irc"), json!(null)])]),
        );
        store.process_replication(&removal).await.unwrap();
        assert!(store.get_app_service_by_id("irc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_positions_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = ReplicaStore::new(dir.path().to_path_buf()).unwrap();
            store.process_replication(&events_batch(1, 5)).await.unwrap();
        }

        let store = ReplicaStore::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.stream_position(EVENTS_STREAM).await.unwrap(), 5);
        assert!(store.get_event("$event5:hs").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_event_cache() {
        let store = ReplicaStore::open_in_memory().unwrap();
        store.start_caching(16);
        store.process_replication(&events_batch(1, 2)).await.unwrap();

        let first = store.get_event("$event1:hs").await.unwrap();
        assert!(first.is_some());
        assert_eq!(store.cached_event("$event1:hs"), first);
        assert!(store.get_event("$missing:hs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_event_cache_keeps_recently_read_events() {
        let store = ReplicaStore::open_in_memory().unwrap();
        store.start_caching(2);
        store.process_replication(&events_batch(1, 3)).await.unwrap();

        store.get_event("$event1:hs").await.unwrap();
        store.get_event("$event2:hs").await.unwrap();
        // Reading event 1 again makes event 2 the eviction candidate
        store.get_event("$event1:hs").await.unwrap();
        store.get_event("$event3:hs").await.unwrap();

        assert!(store.cached_event("$event1:hs").is_some());
        assert!(store.cached_event("$event2:hs").is_none());
        assert!(store.cached_event("$event3:hs").is_some());
    }

    #[tokio::test]
    async fn test_corrupt_event_content_is_an_error() {
        let store = ReplicaStore::open_in_memory().unwrap();
        store.process_replication(&events_batch(1, 1)).await.unwrap();
        {
            let conn = store.conn.lock().await;
            conn.execute("UPDATE events SET content = '{not json' WHERE stream_ordering = 1", [])
                .unwrap();
        }

        let err = store.get_event("$event1:hs").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn test_profiling_records_applies() {
        let store = Arc::new(ReplicaStore::open_in_memory().unwrap());
        store.start_profiling(Duration::from_secs(3600));
        store.process_replication(&events_batch(1, 4)).await.unwrap();

        let stats = store.profiler().drain();
        assert_eq!(stats.get(EVENTS_STREAM).map(|s| s.rows), Some(4));
    }
}
