//! Replication Protocol
//!
//! Wire types for the long-poll exchange with the primary node.
//!
//! A request is a GET with one query parameter per known stream (its current
//! position as decimal text) plus `timeout` in milliseconds. The response is a
//! JSON object keyed by stream name; streams with nothing new are absent.
//!
//! ```json
//! {"events": {"position": 5, "rows": [[4, "$a:hs", ...], [5, "$b:hs", ...]]}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ordinal offset into a stream
pub type StreamPosition = i64;

/// Stream name to position, ordered for stable query strings
pub type StreamPositions = BTreeMap<String, StreamPosition>;

/// Stream carrying new events; the only stream that triggers notification
pub const EVENTS_STREAM: &str = "events";

/// Query parameter carrying the long-poll wait
pub const TIMEOUT_PARAM: &str = "timeout";

/// One replicated row.
///
/// Rows are JSON arrays whose first element is the row's stream position;
/// the remaining elements are stream-specific fields. Rows of streams this
/// worker does not know are kept as opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamRow(pub serde_json::Value);

impl StreamRow {
    /// Build a row from its position and fields
    pub fn new(position: StreamPosition, fields: Vec<serde_json::Value>) -> Self {
        let mut values = Vec::with_capacity(fields.len() + 1);
        values.push(serde_json::Value::from(position));
        values.extend(fields);
        Self(serde_json::Value::Array(values))
    }

    /// Stream position of this row, if the row is well-formed
    pub fn position(&self) -> Option<StreamPosition> {
        self.0.as_array()?.first()?.as_i64()
    }

    /// Field at `index`, counting from the first element after the position
    pub fn field(&self, index: usize) -> Option<&serde_json::Value> {
        self.0.as_array()?.get(index + 1)
    }

    /// String field at `index`
    pub fn str_field(&self, index: usize) -> Option<&str> {
        self.field(index)?.as_str()
    }

    /// Optional string field: missing and null both map to `None`
    pub fn opt_str_field(&self, index: usize) -> Option<&str> {
        match self.field(index) {
            Some(serde_json::Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// New rows for one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamBatch {
    /// New high-water mark of the stream
    pub position: StreamPosition,
    /// Rows after the requested cursor, up to `position`, in stream order
    #[serde(default)]
    pub rows: Vec<StreamRow>,
}

impl StreamBatch {
    pub fn new(position: StreamPosition, rows: Vec<StreamRow>) -> Self {
        Self { position, rows }
    }
}

/// Body of a replication response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicationResponse {
    pub streams: BTreeMap<String, StreamBatch>,
}

impl ReplicationResponse {
    /// Parse a response body
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    /// Add a stream batch (builder style)
    pub fn with_stream(mut self, name: &str, batch: StreamBatch) -> Self {
        self.streams.insert(name.to_string(), batch);
        self
    }

    /// Batch for a stream, if the primary sent one
    pub fn stream(&self, name: &str) -> Option<&StreamBatch> {
        self.streams.get(name)
    }

    /// New high-water mark of the events stream, if it advanced
    pub fn events_position(&self) -> Option<StreamPosition> {
        self.stream(EVENTS_STREAM).map(|batch| batch.position)
    }

    /// True when no stream had anything new (long-poll timed out)
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Total number of rows across all streams
    pub fn row_count(&self) -> usize {
        self.streams.values().map(|b| b.rows.len()).sum()
    }
}

/// Build the query string for a replication request
pub fn query_params(positions: &StreamPositions, timeout_ms: u64) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = positions
        .iter()
        .map(|(stream, position)| (stream.clone(), position.to_string()))
        .collect();
    params.push((TIMEOUT_PARAM.to_string(), timeout_ms.to_string()));
    params
}
