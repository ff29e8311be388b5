//! Replication Module
//!
//! Long-polls the primary node for new stream rows, applies them to the
//! replica store and triggers application service notification.

pub mod protocol;
mod client;
mod consumer;

pub use client::{HttpPrimaryClient, PrimaryClient};
pub use consumer::{LoopState, PollOutcome, ReplicationLoop, ReplicationStatus};
pub use protocol::{ReplicationResponse, StreamBatch, StreamPosition, StreamPositions, StreamRow};

use std::time::Duration;

/// Configuration for replication
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// How long the primary may hold a poll open
    pub long_poll_timeout: Duration,
    /// Delay before retrying after a failed iteration
    pub backoff: Duration,
    /// TCP connect timeout towards the primary
    pub connect_timeout: Duration,
    /// Slack on top of the long-poll timeout before a request is abandoned
    pub timeout_grace: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            long_poll_timeout: Duration::from_millis(30_000),
            backoff: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            timeout_grace: Duration::from_secs(10),
        }
    }
}

impl ReplicationConfig {
    /// Longest a single poll can take before it is abandoned locally
    pub fn hard_timeout(&self) -> Duration {
        self.long_poll_timeout + self.timeout_grace
    }
}
