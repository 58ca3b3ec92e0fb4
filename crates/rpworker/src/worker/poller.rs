//! Queue polling with exponential backoff
//!
//! Implements message receiving with adaptive polling intervals.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::collaborators::{QueueError, QueueMessage, QueueReader};
use crate::reliability::duration_millis;

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Minimum poll interval (when messages are available)
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    /// Maximum poll interval (when idle)
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier when no messages found
    pub backoff_multiplier: f64,

    /// Maximum messages to receive per poll
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            batch_size: 16,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set backoff multiplier (at least 1.0)
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Set batch size (at least 1)
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Queue poller with adaptive backoff
///
/// Backs off exponentially while the queue is empty and resets to the
/// minimum interval as soon as messages arrive.
pub struct QueuePoller {
    reader: Arc<dyn QueueReader>,
    config: PollerConfig,
    visibility_timeout: Duration,
    current_interval: Duration,
    cancellation: CancellationToken,
}

impl QueuePoller {
    pub fn new(
        reader: Arc<dyn QueueReader>,
        config: PollerConfig,
        visibility_timeout: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            reader,
            current_interval: config.min_interval,
            config,
            visibility_timeout,
            cancellation,
        }
    }

    /// Receive up to `max_messages`, updating the backoff state
    pub async fn poll(&mut self, max_messages: usize) -> Result<Vec<QueueMessage>, QueueError> {
        if self.cancellation.is_cancelled() {
            debug!("poller shutdown requested");
            return Ok(vec![]);
        }

        let batch_size = max_messages.min(self.config.batch_size);
        let result = self.reader.receive(batch_size, self.visibility_timeout).await;

        match &result {
            Ok(messages) if !messages.is_empty() => {
                self.reset_backoff();
                debug!(count = messages.len(), "received messages");
            }
            // Empty queue or an outage: slow down either way
            _ => {
                self.increase_backoff();
                trace!(
                    interval_ms = self.current_interval.as_millis() as u64,
                    "no messages, backing off"
                );
            }
        }

        result
    }

    /// Wait for the current backoff interval
    ///
    /// Returns `true` if shutdown was signaled while waiting.
    pub async fn wait(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = self.cancellation.cancelled() => {
                debug!("shutdown signal received during wait");
                true
            }
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    fn increase_backoff(&mut self) {
        let next = Duration::from_secs_f64(
            self.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        );
        self.current_interval = next.min(self.config.max_interval);
    }
}
