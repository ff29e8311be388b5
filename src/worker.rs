//! Worker Lifecycle
//!
//! Owns the replica store and wires it to the replication loop, the
//! notification dispatcher and the HTTP listener.
//!
//! Startup order: the store is built in [`Worker::new`]; [`Worker::start`]
//! binds the listener first, so a bad bind address fails before any
//! background work begins, then starts the dispatcher and the replication
//! loop, and finally turns on store profiling and caching.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::api::{AppState, HttpServer};
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::notify::{
    ApplicationServiceHandler, HttpForwardHandler, LoggingHandler, NotificationDispatcher,
    DEFAULT_DISPATCH_RETRY,
};
use crate::replication::protocol::EVENTS_STREAM;
use crate::replication::{
    HttpPrimaryClient, PrimaryClient, ReplicationConfig, ReplicationLoop, ReplicationStatus,
};
use crate::store::{ReplicaStore, DEFAULT_EVENT_CACHE_SIZE};

/// How often store profiling logs a summary
const PROFILING_INTERVAL: Duration = Duration::from_secs(60);

/// Timeout for a single call to an external notification handler
const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Handles of a started worker
struct Running {
    replication: Arc<RwLock<ReplicationStatus>>,
    dispatcher: NotificationDispatcher,
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

/// An application service worker
pub struct Worker {
    config: WorkerConfig,
    replication_config: ReplicationConfig,
    store: Arc<ReplicaStore>,
    client: Arc<dyn PrimaryClient>,
    handler: Arc<dyn ApplicationServiceHandler>,
    dispatch_retry: Duration,
    shutdown: watch::Sender<bool>,
    running: Option<Running>,
}

impl Worker {
    /// Build a worker from configuration: open the replica store and set up
    /// the primary client and notification handler
    pub fn new(config: WorkerConfig) -> Result<Self> {
        tracing::info!("Setting up.");

        let store = Arc::new(ReplicaStore::new(config.data_dir().clone())?);
        let replication_config = ReplicationConfig::default();

        let client = Arc::new(HttpPrimaryClient::new(
            config.worker.replication_url.clone(),
            replication_config.connect_timeout,
            replication_config.timeout_grace,
        )?);

        let handler: Arc<dyn ApplicationServiceHandler> = match &config.appservice.handler_url {
            Some(url) => {
                tracing::info!("Forwarding application service notifications to {}", url);
                Arc::new(HttpForwardHandler::new(
                    url.clone(),
                    config.worker.name.clone(),
                    HANDLER_TIMEOUT,
                )?)
            }
            None => {
                tracing::warn!("No appservice.handler_url configured; notifications are only logged");
                Arc::new(LoggingHandler::new(Arc::clone(&store)))
            }
        };

        let worker = Self::from_parts(config, replication_config, store, client, handler);
        tracing::info!("Finished setting up.");
        Ok(worker)
    }

    /// Build a worker from already constructed parts
    pub fn from_parts(
        config: WorkerConfig,
        replication_config: ReplicationConfig,
        store: Arc<ReplicaStore>,
        client: Arc<dyn PrimaryClient>,
        handler: Arc<dyn ApplicationServiceHandler>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            replication_config,
            store,
            client,
            handler,
            dispatch_retry: DEFAULT_DISPATCH_RETRY,
            shutdown,
            running: None,
        }
    }

    /// Override the delay before a failed notification is retried
    pub fn with_dispatch_retry(mut self, retry: Duration) -> Self {
        self.dispatch_retry = retry;
        self
    }

    pub fn store(&self) -> Arc<ReplicaStore> {
        Arc::clone(&self.store)
    }

    /// Start background work. Fails without starting anything if the HTTP
    /// listener cannot bind.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::Config("worker already started".into()));
        }
        if *self.shutdown.borrow() {
            return Err(Error::ShuttingDown);
        }

        // Events already in the replica may predate a crash; hand them over again
        let events_position = self.store.stream_position(EVENTS_STREAM).await?;
        let (dispatcher, dispatch_queue) = NotificationDispatcher::new(events_position);

        let replication = Arc::new(ReplicationLoop::new(
            Arc::clone(&self.client),
            Arc::clone(&self.store),
            dispatcher.clone(),
            self.replication_config.clone(),
        ));

        let server = HttpServer::new(
            self.config.api.clone(),
            AppState {
                worker: self.config.worker.name.clone(),
                store: Arc::clone(&self.store),
                replication: replication.status(),
                dispatcher: dispatcher.clone(),
                started_at: Instant::now(),
            },
        );

        // Nothing has been spawned yet, so a bind failure leaves no work behind
        let bound = server.bind().await?;
        let local_addr = match &bound {
            Some(bound) => Some(bound.local_addr()?),
            None => None,
        };

        let mut tasks = vec![dispatch_queue.spawn(
            Arc::clone(&self.handler),
            self.dispatch_retry,
            self.shutdown.subscribe(),
        )];

        if let Some(bound) = bound {
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = bound.serve(shutdown).await {
                    tracing::error!("HTTP listener error: {}", e);
                }
            }));
        }

        let runner = Arc::clone(&replication);
        let shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move { runner.run(shutdown).await }));

        self.store.start_profiling(PROFILING_INTERVAL);
        self.store.start_caching(DEFAULT_EVENT_CACHE_SIZE);

        tracing::info!(
            "Worker {} running from events position {}",
            self.config.worker.name,
            events_position
        );

        self.running = Some(Running {
            replication: replication.status(),
            dispatcher,
            local_addr,
            tasks,
        });
        Ok(())
    }

    /// Ask every background task to stop
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for background tasks to finish after [`Worker::stop`]
    pub async fn join(&mut self) {
        if let Some(running) = self.running.take() {
            for task in running.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Worker task failed: {}", e);
                }
            }
        }
    }

    /// Start, run until Ctrl+C, then shut down
    pub async fn run_until_shutdown(mut self) -> Result<()> {
        self.start().await?;

        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Received shutdown signal");

        self.stop();
        self.join().await;
        Ok(())
    }

    /// Replication status, once started
    pub fn replication_status(&self) -> Option<Arc<RwLock<ReplicationStatus>>> {
        self.running.as_ref().map(|r| Arc::clone(&r.replication))
    }

    /// Notification dispatcher, once started
    pub fn dispatcher(&self) -> Option<NotificationDispatcher> {
        self.running.as_ref().map(|r| r.dispatcher.clone())
    }

    /// Address the HTTP listener bound to, if enabled and started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().and_then(|r| r.local_addr)
    }
}
