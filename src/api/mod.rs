//! HTTP API Module
//!
//! Ancillary listener exposing worker health and replication progress.

mod http;

pub use http::{AppState, BoundServer, HttpServer};
