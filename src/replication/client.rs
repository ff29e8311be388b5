//! Primary Client
//!
//! Issues the long-poll request to the primary's replication endpoint.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use super::protocol::{query_params, ReplicationResponse, StreamPositions};
use crate::error::{Error, Result};

/// Source of replication responses
#[async_trait]
pub trait PrimaryClient: Send + Sync {
    /// Endpoint being polled, for logs
    fn endpoint(&self) -> &str;

    /// Ask for everything after `positions`, letting the primary hold the
    /// request for up to `wait` when nothing is new yet
    async fn poll(&self, positions: &StreamPositions, wait: Duration)
        -> Result<ReplicationResponse>;
}

/// Long-poll client for an HTTP replication endpoint
pub struct HttpPrimaryClient {
    client: reqwest::Client,
    url: String,
    /// Extra time on top of the long-poll wait before giving up locally
    grace: Duration,
}

impl HttpPrimaryClient {
    /// Create a client for `url`
    pub fn new(url: impl Into<String>, connect_timeout: Duration, grace: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            grace,
        })
    }

    async fn poll_inner(
        &self,
        positions: &StreamPositions,
        wait: Duration,
    ) -> Result<ReplicationResponse> {
        let params = query_params(positions, wait.as_millis() as u64);

        let response = self
            .client
            .get(&self.url)
            .query(&params)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Protocol {
                url: self.url.clone(),
                status: Some(status.as_u16()),
                reason: truncate(&body, 200),
            });
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        ReplicationResponse::from_slice(&body).map_err(|e| Error::Protocol {
            url: self.url.clone(),
            status: Some(status.as_u16()),
            reason: format!("malformed replication payload: {}", e),
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.url.clone())
        } else {
            Error::Transport {
                url: self.url.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl PrimaryClient for HttpPrimaryClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn poll(
        &self,
        positions: &StreamPositions,
        wait: Duration,
    ) -> Result<ReplicationResponse> {
        // The primary may hang without closing the connection
        match timeout(wait + self.grace, self.poll_inner(positions, wait)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.url.clone())),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
