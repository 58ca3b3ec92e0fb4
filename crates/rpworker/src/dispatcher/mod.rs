//! Queue message dispatcher
//!
//! This module provides:
//! - [`start_state_for`] - the fixed command to start state table
//! - [`MessageDispatcher`] - runs one message and settles it on the queues
//! - [`MessageDisposition`] - complete, retry, dead-letter or release

mod handler;
mod start_state;

pub use handler::{MessageDispatcher, MessageDisposition};
pub use start_state::start_state_for;

use crate::collaborators::QueueError;
use crate::model::{RpWorkerQueueCommand, SubState};

/// Errors from dispatch operations
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No start state for this command and sub-state
    #[error("unsupported command {command} with sub-state {sub_state:?}")]
    UnsupportedCommand {
        command: RpWorkerQueueCommand,
        sub_state: Option<SubState>,
    },

    /// Settling the message on the queues failed
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
