//! Metrics capability injected into states and the engine

use std::time::Duration;

use crate::model::{RpWorkerQueueCommand, StatesEnum};
use crate::reliability::StatusCode;

/// Sink for worker metrics
pub trait MetricsRecorder: Send + Sync {
    /// A state finished and produced `to`
    fn record_transition(&self, from: StatesEnum, to: StatesEnum, elapsed: Duration);

    /// A state failed with a classified error
    fn record_failure(&self, state: StatesEnum, status_code: StatusCode, retryable: bool);

    /// A message finished processing with the given disposition name
    ///
    /// `command` is `None` when the body could not be parsed.
    fn record_outcome(&self, command: Option<RpWorkerQueueCommand>, disposition: &'static str);
}

/// Emits metrics as structured `tracing` events under the `rpworker::metrics` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsRecorder for TracingMetrics {
    fn record_transition(&self, from: StatesEnum, to: StatesEnum, elapsed: Duration) {
        tracing::debug!(
            target: "rpworker::metrics",
            metric = "state_transition",
            from = %from,
            to = %to,
            elapsed_ms = elapsed.as_millis() as u64,
        );
    }

    fn record_failure(&self, state: StatesEnum, status_code: StatusCode, retryable: bool) {
        tracing::debug!(
            target: "rpworker::metrics",
            metric = "state_failure",
            state = %state,
            status_code = %status_code,
            retryable,
        );
    }

    fn record_outcome(&self, command: Option<RpWorkerQueueCommand>, disposition: &'static str) {
        let command = command.map(|c| c.to_string());
        tracing::debug!(
            target: "rpworker::metrics",
            metric = "message_outcome",
            command = command.as_deref().unwrap_or("unknown"),
            disposition,
        );
    }
}
