//! State interface and registry
//!
//! This module provides:
//! - [`State`] - one step of a workflow with a single async `execute`
//! - [`AnyState`] - the object-safe form the engine runs
//! - [`StateRegistry`] - `StatesEnum` to implementation lookup
//! - [`StateEnv`] - collaborators injected into every state

mod definition;
mod registry;

pub use definition::{AnyState, State, StateEnv, StateError};
pub use registry::{RegistryError, StateFactory, StateRegistry};
