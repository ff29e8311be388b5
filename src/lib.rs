//! Application Service Worker
//!
//! A worker process that follows a homeserver's primary node over its
//! replication HTTP endpoint, keeps a local replica of the streams
//! application services care about, and tells the application service
//! handler whenever new events have landed.
//!
//! # Architecture
//!
//! The [`replication::ReplicationLoop`] long-polls the primary with the
//! positions it has already applied. Each response is written to the
//! [`store::ReplicaStore`] in one transaction per stream, and the new
//! events position is handed to the [`notify::NotificationDispatcher`],
//! which calls the handler outside the polling path. Failures back off and
//! retry; nothing short of shutdown ends the loop.
//!
//! # Features
//!
//! - Long-poll replication with back-off on any failure
//! - Replica of room aliases, events, application services and users
//! - Coalescing, retrying notification dispatch
//! - Health and replication status endpoints
//! - Optional per-stream profiling and an in-memory event cache

pub mod api;
pub mod config;
pub mod error;
pub mod notify;
pub mod replication;
pub mod store;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{Error, Result};
pub use worker::Worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WorkerConfig;
    pub use crate::error::{Error, FailureClass, Result};
    pub use crate::notify::{ApplicationServiceHandler, NotificationDispatcher};
    pub use crate::replication::{
        PrimaryClient, ReplicationConfig, ReplicationLoop, ReplicationResponse, StreamPosition,
        StreamPositions, StreamRow,
    };
    pub use crate::store::ReplicaStore;
    pub use crate::worker::Worker;
}
