//! HTTP Listener
//!
//! Health and replication status endpoints for operators.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::notify::NotificationDispatcher;
use crate::replication::{LoopState, ReplicationStatus, StreamPosition, StreamPositions};
use crate::store::ReplicaStore;

/// Shared application state
pub struct AppState {
    /// Worker name
    pub worker: String,
    /// Replica being served
    pub store: Arc<ReplicaStore>,
    /// Replication loop status
    pub replication: Arc<RwLock<ReplicationStatus>>,
    /// Notification progress
    pub dispatcher: NotificationDispatcher,
    /// Process start, for uptime
    pub started_at: Instant,
}

/// HTTP listener
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

/// A listener that has bound its socket but not started serving
pub struct BoundServer {
    listener: TcpListener,
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Create the router
    fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/replication/status", get(handle_status))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(state)
    }

    /// Bind the listen socket. Returns `None` when the listener is disabled.
    pub async fn bind(&self) -> Result<Option<BoundServer>> {
        if !self.config.enabled {
            tracing::info!("HTTP listener disabled");
            return Ok(None);
        }

        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|e| {
                Error::Network(format!(
                    "Failed to bind HTTP listener on {}: {}",
                    self.config.bind_address, e
                ))
            })?;
        tracing::info!("HTTP listener bound on {}", self.config.bind_address);

        Ok(Some(BoundServer {
            listener,
            router: Self::create_router(Arc::clone(&self.state)),
        }))
    }
}

impl BoundServer {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` flips to true
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))
    }
}

// ============ Response Types ============

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub worker: String,
    pub state: LoopState,
}

/// Notification progress
#[derive(Debug, Serialize)]
pub struct NotificationProgress {
    pub requested: StreamPosition,
    pub dispatched: StreamPosition,
}

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub worker: String,
    pub uptime_seconds: u64,
    pub replication: ReplicationStatus,
    pub positions: StreamPositions,
    pub notifications: NotificationProgress,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let replication = state.replication.read().await;
    let healthy = replication.state != LoopState::Stopped && replication.consecutive_failures == 0;
    let code = if replication.state == LoopState::Stopped {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(HealthResponse {
            healthy,
            worker: state.worker.clone(),
            state: replication.state,
        }),
    )
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let positions = match state.store.stream_positions().await {
        Ok(positions) => positions,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    Json(StatusResponse {
        worker: state.worker.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        replication: state.replication.read().await.clone(),
        positions,
        notifications: NotificationProgress {
            requested: state.dispatcher.requested(),
            dispatched: state.dispatcher.dispatched(),
        },
    })
    .into_response()
}
