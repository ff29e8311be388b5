//! Application Service Handlers
//!
//! Interest computation and transaction delivery live outside this worker.
//! [`HttpForwardHandler`] hands each position to an external handler service;
//! [`LoggingHandler`] only reports what would be handed over.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;

use super::ApplicationServiceHandler;
use crate::error::{Error, Result};
use crate::replication::protocol::StreamPosition;
use crate::store::ReplicaStore;

/// Body posted to the external handler
#[derive(Debug, Serialize)]
struct NotifyRequest<'a> {
    worker: &'a str,
    upto: StreamPosition,
}

/// Posts `{"worker": ..., "upto": position}` to an external handler
pub struct HttpForwardHandler {
    client: reqwest::Client,
    url: String,
    worker: String,
}

impl HttpForwardHandler {
    pub fn new(url: impl Into<String>, worker: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            worker: worker.into(),
        })
    }
}

#[async_trait]
impl ApplicationServiceHandler for HttpForwardHandler {
    async fn notify_interested_services(&self, upto: StreamPosition) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&NotifyRequest {
                worker: &self.worker,
                upto,
            })
            .send()
            .await
            .map_err(|e| Error::Dispatch(format!("{}: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Dispatch(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }

        Ok(())
    }
}

/// Logs the events and registered services each notification covers
pub struct LoggingHandler {
    store: Arc<ReplicaStore>,
    last: Mutex<StreamPosition>,
}

impl LoggingHandler {
    pub fn new(store: Arc<ReplicaStore>) -> Self {
        Self {
            store,
            last: Mutex::new(0),
        }
    }
}

#[async_trait]
impl ApplicationServiceHandler for LoggingHandler {
    async fn notify_interested_services(&self, upto: StreamPosition) -> Result<()> {
        let mut last = self.last.lock().await;
        if upto <= *last {
            return Ok(());
        }

        let services = self.store.get_app_services().await?;
        let events = self.store.get_events_in_range(*last, upto, 1000).await?;
        tracing::info!(
            "{} new events up to {} for {} registered application services",
            events.len(),
            upto,
            services.len()
        );

        *last = upto;
        Ok(())
    }
}
