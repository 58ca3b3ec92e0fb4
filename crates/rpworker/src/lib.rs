//! # Resource-Provisioning Worker
//!
//! A queue-driven state machine engine for partner-integration lifecycle
//! operations: create and delete marketplace-backed resources, link and
//! unlink partner organizations, configure SSO and notify partners.
//!
//! ## Features
//!
//! - **Idempotent states**: every state checks before it acts, so at-least-once
//!   delivery never duplicates a side effect
//! - **Explicit outcomes**: states return the next state or an error; the engine
//!   turns errors into retry or fatal outcomes
//! - **Bounded retries**: exponential backoff with jitter, a fixed wait for
//!   partner "entity not found" errors, an attempt budget and a deadline
//! - **Queue listener**: adaptive polling, bounded concurrency, graceful shutdown
//! - **OpenTelemetry integration**: structured logs and optional OTLP traces
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      QueueListener                           │
//! │  (polls the work queue, one Tokio task per message)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    MessageDispatcher                         │
//! │  (decodes, picks the start state, settles the message)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   StateMachineEngine                         │
//! │  (StateRegistry lookup, ErrorClassifier on failure)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Collaborators                           │
//! │  (data sources, marketplace, partner API, queues)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use rpworker::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fakes = InMemoryCollaborators::new();
//! let config = WorkerConfig::default();
//!
//! let engine = StateMachineEngine::new(
//!     Arc::new(standard_registry()),
//!     ErrorClassifier::new(config.classifier.clone()),
//! )
//! .with_config(config.engine.clone());
//! let dispatcher =
//!     MessageDispatcher::new(engine, fakes.env(), fakes.queue.clone(), fakes.dead_letter.clone());
//!
//! let request = CommandRequest::new(RpWorkerQueueCommand::NotifyPartner, "res-1");
//! fakes
//!     .queue
//!     .add_message(WorkerMessage::Command(request).to_json()?, None)
//!     .await?;
//!
//! let listener = QueueListener::new(dispatcher, fakes.queue.clone(), config.listener);
//! listener.start()?;
//! // ... later, graceful shutdown
//! listener.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod model;
pub mod reliability;
pub mod state;
pub mod states;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::collaborators::{
        InMemoryCollaborators, MarketplaceClient, OperationRecordDataSource, PartnerClient,
        QueueReader, QueueWriter, ResourceEntityDataSource,
    };
    pub use crate::config::WorkerConfig;
    pub use crate::dispatcher::{MessageDispatcher, MessageDisposition};
    pub use crate::engine::{EngineConfig, RunOutcome, StateMachineEngine};
    pub use crate::model::{
        keys, CommandRequest, RpWorkerQueueCommand, StateContext, StatesEnum, SubState,
        WorkerMessage,
    };
    pub use crate::reliability::{ClassifierConfig, ErrorClassifier, StatusCode, WorkerError};
    pub use crate::state::{State, StateEnv, StateError, StateRegistry};
    pub use crate::states::standard_registry;
    pub use crate::worker::{QueueListener, QueueListenerConfig};
}

// Re-export key types at crate root
pub use config::WorkerConfig;
pub use dispatcher::{DispatchError, MessageDispatcher, MessageDisposition};
pub use engine::{EngineConfig, RunOutcome, StateMachineEngine};
pub use model::{StateContext, StatesEnum, WorkerMessage};
pub use reliability::{ErrorClassifier, StatusCode, WorkerError};
pub use state::{State, StateEnv, StateError, StateRegistry};
pub use worker::{ListenerError, QueueListener, QueueListenerConfig};
