//! Queue consumption
//!
//! This module provides:
//! - [`QueueListener`] - long-running consumer with bounded concurrency
//! - [`QueuePoller`] - message receiving with adaptive backoff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      QueueListener                           │
//! │  ┌─────────────┐                                             │
//! │  │ QueuePoller │  receive(batch, visibility_timeout)         │
//! │  └──────┬──────┘                                             │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │       MessageDispatcher (Semaphore-limited)         │    │
//! │  │  [msg 1] [msg 2] [msg 3] ... [msg N]                │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod listener;
mod poller;

pub use listener::{ListenerError, ListenerStatus, QueueListener, QueueListenerConfig};
pub use poller::{PollerConfig, QueuePoller};
