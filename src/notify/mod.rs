//! Notification Dispatcher
//!
//! Hands new event stream high-water marks to the application service
//! handler without holding up the replication loop.
//!
//! Positions travel over a `watch` channel, so a slow handler only ever sees
//! the newest position and the sender never blocks. The handler is called
//! with strictly increasing positions, one call at a time. A failed call is
//! retried after a delay until it succeeds or a newer position supersedes it.

mod handlers;

pub use handlers::{HttpForwardHandler, LoggingHandler};

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::replication::protocol::StreamPosition;

/// Default delay before retrying a failed notification
pub const DEFAULT_DISPATCH_RETRY: Duration = Duration::from_secs(10);

/// Decides which application services are interested in events up to a
/// position and delivers them. Must tolerate being asked again for a
/// position it has already handled.
#[async_trait]
pub trait ApplicationServiceHandler: Send + Sync {
    async fn notify_interested_services(&self, upto: StreamPosition) -> Result<()>;
}

/// Handle used by the replication loop to request notifications
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: Arc<watch::Sender<StreamPosition>>,
    dispatched: Arc<AtomicI64>,
}

impl NotificationDispatcher {
    /// Create the dispatcher handle and its queue without starting delivery.
    ///
    /// `initial` is the event position already persisted in the replica; it
    /// is handed to the handler as soon as the queue is spawned so events
    /// applied before a restart are not left unnotified.
    pub fn new(initial: StreamPosition) -> (Self, DispatchQueue) {
        let (tx, rx) = watch::channel(initial);
        let dispatched = Arc::new(AtomicI64::new(0));

        (
            Self {
                tx: Arc::new(tx),
                dispatched: Arc::clone(&dispatched),
            },
            DispatchQueue { rx, dispatched },
        )
    }

    /// Create the dispatcher and start delivering straight away
    pub fn spawn(
        handler: Arc<dyn ApplicationServiceHandler>,
        initial: StreamPosition,
        retry_delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (dispatcher, queue) = Self::new(initial);
        let task = queue.spawn(handler, retry_delay, shutdown);
        (dispatcher, task)
    }

    /// Request notification up to `position`. Positions at or below the
    /// latest request are ignored. Never blocks.
    pub fn notify(&self, position: StreamPosition) -> bool {
        self.tx.send_if_modified(|current| {
            if position > *current {
                *current = position;
                true
            } else {
                false
            }
        })
    }

    /// Highest position requested so far
    pub fn requested(&self) -> StreamPosition {
        *self.tx.borrow()
    }

    /// Highest position the handler has accepted
    pub fn dispatched(&self) -> StreamPosition {
        self.dispatched.load(Ordering::SeqCst)
    }
}

/// Receiving side of a [`NotificationDispatcher`]. Nothing reaches the
/// handler until it is spawned.
pub struct DispatchQueue {
    rx: watch::Receiver<StreamPosition>,
    dispatched: Arc<AtomicI64>,
}

impl DispatchQueue {
    /// Start the dispatch task
    pub fn spawn(
        self,
        handler: Arc<dyn ApplicationServiceHandler>,
        retry_delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(run_dispatcher(
            handler,
            self.rx,
            shutdown,
            retry_delay,
            self.dispatched,
        ))
    }
}

async fn run_dispatcher(
    handler: Arc<dyn ApplicationServiceHandler>,
    mut rx: watch::Receiver<StreamPosition>,
    mut shutdown: watch::Receiver<bool>,
    retry_delay: Duration,
    dispatched: Arc<AtomicI64>,
) {
    let mut last: StreamPosition = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let target = *rx.borrow_and_update();
        if target > last {
            let result = tokio::select! {
                result = handler.notify_interested_services(target) => result,
                _ = shutdown.changed() => break,
            };

            match result {
                Ok(()) => {
                    tracing::debug!("Notified application services up to {}", target);
                    last = target;
                    dispatched.store(target, Ordering::SeqCst);
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to notify application services up to {}: {} (retrying in {:?})",
                        target,
                        e,
                        retry_delay
                    );
                    // A newer position cuts the wait short
                    tokio::select! {
                        _ = tokio::time::sleep(retry_delay) => {}
                        Ok(()) = rx.changed() => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
            continue;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    tracing::debug!("Notification dispatcher stopped at {}", last);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex;

    /// Records every position it is called with; fails the first
    /// `failures` calls
    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<StreamPosition>>,
        failures: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl ApplicationServiceHandler for RecordingHandler {
        async fn notify_interested_services(&self, upto: StreamPosition) -> Result<()> {
            self.calls.lock().await.push(upto);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Dispatch("appservice unreachable".into()));
            }
            Ok(())
        }
    }

    async fn wait_for_dispatch(dispatcher: &NotificationDispatcher, position: StreamPosition) {
        for _ in 0..6000 {
            if dispatcher.dispatched() >= position {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("position {} never dispatched", position);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_new_positions() {
        let handler = Arc::new(RecordingHandler::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatcher, _task) =
            NotificationDispatcher::spawn(handler.clone(), 0, Duration::from_secs(1), shutdown_rx);

        assert!(dispatcher.notify(5));
        wait_for_dispatch(&dispatcher, 5).await;

        assert_eq!(*handler.calls.lock().await, vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redundant_positions_ignored() {
        let handler = Arc::new(RecordingHandler::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatcher, _task) =
            NotificationDispatcher::spawn(handler.clone(), 0, Duration::from_secs(1), shutdown_rx);

        assert!(dispatcher.notify(7));
        assert!(!dispatcher.notify(7));
        assert!(!dispatcher.notify(3));
        wait_for_dispatch(&dispatcher, 7).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*handler.calls.lock().await, vec![7]);
        assert_eq!(dispatcher.requested(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_position_dispatched_on_start() {
        let handler = Arc::new(RecordingHandler::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatcher, _task) =
            NotificationDispatcher::spawn(handler.clone(), 42, Duration::from_secs(1), shutdown_rx);

        wait_for_dispatch(&dispatcher, 42).await;
        assert_eq!(*handler.calls.lock().await, vec![42]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_coalesces_positions() {
        let handler = Arc::new(RecordingHandler {
            delay: Duration::from_secs(5),
            ..Default::default()
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatcher, _task) =
            NotificationDispatcher::spawn(handler.clone(), 0, Duration::from_secs(1), shutdown_rx);

        dispatcher.notify(1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Handler is busy with 1; these collapse into one call
        dispatcher.notify(2);
        dispatcher.notify(3);
        dispatcher.notify(4);
        wait_for_dispatch(&dispatcher, 4).await;

        let calls = handler.calls.lock().await.clone();
        assert_eq!(calls, vec![1, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dispatch_is_retried() {
        let handler = Arc::new(RecordingHandler {
            failures: AtomicUsize::new(2),
            ..Default::default()
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatcher, _task) =
            NotificationDispatcher::spawn(handler.clone(), 0, Duration::from_secs(10), shutdown_rx);

        dispatcher.notify(9);
        wait_for_dispatch(&dispatcher, 9).await;

        assert_eq!(*handler.calls.lock().await, vec![9, 9, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_position_cuts_retry_wait_short() {
        let handler = Arc::new(RecordingHandler {
            failures: AtomicUsize::new(1),
            ..Default::default()
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatcher, _task) =
            NotificationDispatcher::spawn(handler.clone(), 0, Duration::from_secs(60), shutdown_rx);

        let started = tokio::time::Instant::now();
        dispatcher.notify(3);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(dispatcher.dispatched(), 0);

        dispatcher.notify(5);
        wait_for_dispatch(&dispatcher, 5).await;

        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(*handler.calls.lock().await, vec![3, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_holds_positions_until_spawned() {
        let handler = Arc::new(RecordingHandler::default());
        let (dispatcher, queue) = NotificationDispatcher::new(4);
        dispatcher.notify(6);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handler.calls.lock().await.is_empty());

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _task = queue.spawn(handler.clone(), Duration::from_secs(1), shutdown_rx);
        wait_for_dispatch(&dispatcher, 6).await;

        assert_eq!(*handler.calls.lock().await, vec![6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_shutdown() {
        let handler = Arc::new(RecordingHandler::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_dispatcher, task) =
            NotificationDispatcher::spawn(handler, 0, Duration::from_secs(1), shutdown_rx);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
