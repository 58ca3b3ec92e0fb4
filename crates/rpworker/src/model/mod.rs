//! Workflow vocabulary
//!
//! - [`StatesEnum`] and the command vocabularies
//! - [`StateContext`], the serializable unit of work
//! - [`WorkerMessage`], the queue envelope

mod context;
mod message;
mod states;

pub use context::{keys, FailureInfo, StateContext};
pub use message::{CommandRequest, WorkerMessage};
pub use states::{
    MarketplaceStatesEnum, PartnerStatesEnum, RpWorkerQueueCommand, StatesEnum, SubState,
};
