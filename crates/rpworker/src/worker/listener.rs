//! Queue listener
//!
//! Pulls messages with bounded concurrency and hands each one to the
//! dispatcher. Shutdown stops new work and lets in-flight messages settle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::poller::{PollerConfig, QueuePoller};
use crate::collaborators::QueueReader;
use crate::dispatcher::MessageDispatcher;
use crate::reliability::duration_millis;

/// Queue listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueListenerConfig {
    /// Unique worker ID (generated if not provided)
    pub worker_id: String,

    /// Maximum messages processed at once
    pub max_concurrency: usize,

    pub poller: PollerConfig,

    /// How long a received message stays hidden from other workers
    #[serde(with = "duration_millis")]
    pub visibility_timeout: Duration,

    /// Graceful shutdown timeout
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for QueueListenerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            max_concurrency: 8,
            poller: PollerConfig::default(),
            visibility_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl QueueListenerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set maximum concurrency (at least 1)
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Listener status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStatus {
    /// Listener is running and pulling messages
    Running,
    /// Listener is draining (finishing in-flight messages, not pulling new ones)
    Draining,
    /// Listener has stopped
    Stopped,
}

/// Queue listener errors
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("queue listener is already running")]
    AlreadyRunning,

    /// In-flight messages did not settle in time
    #[error("graceful shutdown timed out with {in_flight} message(s) in flight")]
    ShutdownTimeout { in_flight: usize },
}

/// Long-running consumer of the work queue
///
/// # Example
///
/// ```ignore
/// let listener = QueueListener::new(dispatcher, queue, QueueListenerConfig::default());
/// listener.start()?;
///
/// // ... later, graceful shutdown
/// listener.shutdown().await?;
/// ```
pub struct QueueListener {
    dispatcher: MessageDispatcher,
    reader: Arc<dyn QueueReader>,
    config: QueueListenerConfig,
    status: RwLock<ListenerStatus>,
    cancellation: Mutex<CancellationToken>,
    in_flight: Arc<Semaphore>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueueListener {
    pub fn new(
        dispatcher: MessageDispatcher,
        reader: Arc<dyn QueueReader>,
        config: QueueListenerConfig,
    ) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            dispatcher,
            reader,
            config,
            status: RwLock::new(ListenerStatus::Stopped),
            cancellation: Mutex::new(CancellationToken::new()),
            in_flight,
            poll_handle: Mutex::new(None),
        }
    }

    /// Start pulling messages in a background task
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub fn start(&self) -> Result<(), ListenerError> {
        {
            let mut status = self.status.write();
            if *status != ListenerStatus::Stopped {
                return Err(ListenerError::AlreadyRunning);
            }
            *status = ListenerStatus::Running;
        }

        info!(
            worker_id = %self.config.worker_id,
            max_concurrency = self.config.max_concurrency,
            "Starting queue listener"
        );

        // A cancelled token cannot be reset, so every start gets a fresh one
        let cancellation = CancellationToken::new();
        *self.cancellation.lock() = cancellation.clone();
        self.start_poll_loop(cancellation);

        Ok(())
    }

    /// Stop pulling and wait for in-flight messages
    ///
    /// States already executing run to completion; their engines stop at
    /// the next state boundary and release the context back to the queue.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), ListenerError> {
        if *self.status.read() == ListenerStatus::Stopped {
            return Ok(());
        }

        info!(worker_id = %self.config.worker_id, "Initiating graceful shutdown");

        *self.status.write() = ListenerStatus::Draining;
        self.cancellation.lock().cancel();

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;

        // No message is handed out once the poll loop has exited
        let handle = self.poll_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "poll loop panicked");
            }
        }

        loop {
            let in_flight = self.in_flight();
            if in_flight == 0 {
                debug!("All messages settled");
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(remaining = in_flight, "Shutdown timeout reached");
                // Stragglers still hold permits; only the poll loop is gone
                *self.status.write() = ListenerStatus::Stopped;
                return Err(ListenerError::ShutdownTimeout { in_flight });
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        *self.status.write() = ListenerStatus::Stopped;

        info!(worker_id = %self.config.worker_id, "Queue listener stopped");
        Ok(())
    }

    pub fn status(&self) -> ListenerStatus {
        *self.status.read()
    }

    /// Messages currently being processed
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrency - self.in_flight.available_permits()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    fn start_poll_loop(&self, cancellation: CancellationToken) {
        let dispatcher = self.dispatcher.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let mut poller = QueuePoller::new(
            Arc::clone(&self.reader),
            self.config.poller.clone(),
            self.config.visibility_timeout,
            cancellation.clone(),
        );

        let handle = tokio::spawn(async move {
            loop {
                if poller.is_shutdown() {
                    debug!("Poll loop: shutdown requested");
                    break;
                }

                let available = in_flight.available_permits();
                if available == 0 {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                match poller.poll(available).await {
                    Ok(messages) => {
                        for message in messages {
                            let permit = match in_flight.clone().try_acquire_owned() {
                                Ok(p) => p,
                                Err(_) => {
                                    // Left invisible; reappears after the visibility timeout
                                    debug!(message_id = %message.id, "No permits available");
                                    break;
                                }
                            };

                            let dispatcher = dispatcher.clone();
                            let token = cancellation.clone();

                            tokio::spawn(async move {
                                if let Err(e) = dispatcher.process(&message, token).await {
                                    // Undeleted; the queue redelivers it
                                    error!(message_id = %message.id, error = %e, "failed to settle message");
                                }
                                drop(permit);
                            });
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Poll error");
                    }
                }

                if poller.wait().await {
                    break;
                }
            }

            debug!("Poll loop exited");
        });

        *self.poll_handle.lock() = Some(handle);
    }
}
