//! Replication Client Loop
//!
//! Alternates between two states for as long as the worker runs:
//!
//! - **Polling**: read the store's stream positions, long-poll the primary
//!   with them, apply the response and hand any new event position to the
//!   notification dispatcher. Success polls again immediately.
//! - **Backoff**: after any failure, wait a fixed delay and poll again from
//!   the stored positions. A failing stream keeps its position, so nothing
//!   is lost.
//!
//! The loop is the only writer of the replica store and runs strictly
//! sequentially, so batches are applied in the order the primary produced
//! them and the dispatcher only ever sees non-decreasing positions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, RwLock};

use super::client::PrimaryClient;
use super::protocol::{StreamPosition, StreamPositions, EVENTS_STREAM};
use super::ReplicationConfig;
use crate::error::{Error, Result};
use crate::notify::NotificationDispatcher;
use crate::store::{AppliedBatch, ReplicaStore};

/// Replication loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Starting,
    Polling,
    Backoff,
    Stopped,
}

/// Observable replication progress, served on the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationStatus {
    pub state: LoopState,
    pub endpoint: String,
    pub iterations: u64,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_failure_class: Option<&'static str>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub events_position: Option<StreamPosition>,
}

impl ReplicationStatus {
    fn new(endpoint: &str) -> Self {
        Self {
            state: LoopState::Starting,
            endpoint: endpoint.to_string(),
            iterations: 0,
            consecutive_failures: 0,
            total_failures: 0,
            last_error: None,
            last_failure_class: None,
            last_success_at: None,
            last_failure_at: None,
            events_position: None,
        }
    }

    fn record_success(&mut self, outcome: &PollOutcome) {
        self.iterations += 1;
        self.consecutive_failures = 0;
        self.last_success_at = Some(Utc::now());
        if let Some(position) = outcome.events_position {
            self.events_position = Some(position);
        }
    }

    fn record_failure(&mut self, error: &Error) {
        self.iterations += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures += 1;
        self.last_error = Some(error.to_string());
        self.last_failure_class = Some(error.failure_class().as_str());
        self.last_failure_at = Some(Utc::now());
    }
}

/// Result of one successful Polling iteration
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Positions sent to the primary
    pub requested: StreamPositions,
    /// Per-stream apply results for streams this worker consumes
    pub applied: Vec<AppliedBatch>,
    /// Event position handed to the dispatcher, if the events stream was present
    pub events_position: Option<StreamPosition>,
}

/// Consumes the primary's replication streams into the replica store
pub struct ReplicationLoop {
    client: Arc<dyn PrimaryClient>,
    store: Arc<ReplicaStore>,
    dispatcher: NotificationDispatcher,
    config: ReplicationConfig,
    status: Arc<RwLock<ReplicationStatus>>,
}

impl ReplicationLoop {
    pub fn new(
        client: Arc<dyn PrimaryClient>,
        store: Arc<ReplicaStore>,
        dispatcher: NotificationDispatcher,
        config: ReplicationConfig,
    ) -> Self {
        let status = Arc::new(RwLock::new(ReplicationStatus::new(client.endpoint())));
        Self {
            client,
            store,
            dispatcher,
            config,
            status,
        }
    }

    /// Shared status, updated after every iteration
    pub fn status(&self) -> Arc<RwLock<ReplicationStatus>> {
        Arc::clone(&self.status)
    }

    /// One Polling iteration: read positions, long-poll, apply, notify.
    ///
    /// An error leaves the failing stream, and every stream after it, where
    /// it was. Streams committed before the failure keep their progress and
    /// committed events are still handed to the dispatcher.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let requested = self.store.stream_positions().await?;

        let response = self
            .client
            .poll(&requested, self.config.long_poll_timeout)
            .await?;

        if response.is_empty() {
            tracing::trace!("Long-poll on {} returned nothing new", self.client.endpoint());
        }

        let (applied, failure) = match self.store.process_replication(&response).await {
            Ok(applied) => (applied, None),
            Err(partial) => (partial.applied, Some(partial.error)),
        };

        // Notify from the store's cursor, never from beyond what was applied.
        // Committed events are handed over even when a later stream failed:
        // their cursor has moved, so the primary will not send them again.
        let events_position = applied
            .iter()
            .find(|batch| batch.stream == EVENTS_STREAM)
            .map(|batch| batch.position);

        if let Some(position) = events_position {
            self.dispatcher.notify(position);
        }

        if let Some(error) = failure {
            return Err(error);
        }

        Ok(PollOutcome {
            requested,
            applied,
            events_position,
        })
    }

    /// Run until `shutdown` flips to true or its sender goes away
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let endpoint = self.client.endpoint().to_string();
        tracing::info!("Replicating from {}", endpoint);

        let mut state = LoopState::Polling;
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.status.write().await.state = state;

            state = match state {
                LoopState::Polling => {
                    // Dropping an in-flight poll is safe: each stream batch is
                    // applied without suspension once the store lock is held
                    let result = tokio::select! {
                        result = self.poll_once() => result,
                        _ = shutdown.changed() => break,
                    };

                    match result {
                        Ok(outcome) => {
                            self.status.write().await.record_success(&outcome);
                            LoopState::Polling
                        }
                        Err(e) => {
                            tracing::error!(
                                failure = e.failure_class().as_str(),
                                "Error replicating from {:?}: {}",
                                endpoint,
                                e
                            );
                            self.status.write().await.record_failure(&e);
                            LoopState::Backoff
                        }
                    }
                }
                LoopState::Backoff => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.backoff) => LoopState::Polling,
                        _ = shutdown.changed() => break,
                    }
                }
                LoopState::Starting | LoopState::Stopped => LoopState::Polling,
            };
        }

        self.status.write().await.state = LoopState::Stopped;
        tracing::info!("Replication from {} stopped", endpoint);
    }
}
