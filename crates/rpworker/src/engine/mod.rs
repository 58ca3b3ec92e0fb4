//! State machine engine
//!
//! The engine module provides the `StateMachineEngine` which drives a
//! [`StateContext`](crate::model::StateContext) through registered states
//! until it reaches a terminal state, needs a retry, or fails.

mod executor;

pub use executor::{EngineConfig, RunOutcome, StateMachineEngine, StepOutcome};
