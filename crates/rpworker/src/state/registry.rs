//! State registry
//!
//! Maps each [`StatesEnum`] to a factory producing its implementation, so the
//! engine can resolve the state to run without knowing concrete types.

use std::collections::BTreeMap;
use std::fmt;

use super::definition::{AnyState, State, StateWrapper};
use crate::model::StatesEnum;

/// Factory function type for creating states
pub type StateFactory = Box<dyn Fn() -> Box<dyn AnyState> + Send + Sync>;

/// Registry of state factories
pub struct StateRegistry {
    factories: BTreeMap<StatesEnum, StateFactory>,
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StateRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Register a state type, replacing any earlier registration for its id
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut registry = StateRegistry::new();
    /// registry.register::<CreateSaasState>();
    /// ```
    pub fn register<S: State + Default>(&mut self) {
        let factory: StateFactory =
            Box::new(|| Box::new(StateWrapper { inner: S::default() }) as Box<dyn AnyState>);
        self.factories.insert(S::ID, factory);
    }

    /// Register a factory for `id`, for states that need configuration
    pub fn register_factory<F>(&mut self, id: StatesEnum, factory: F)
    where
        F: Fn() -> Box<dyn AnyState> + Send + Sync + 'static,
    {
        self.factories.insert(id, Box::new(factory));
    }

    /// Check if a state is registered
    pub fn contains(&self, id: StatesEnum) -> bool {
        self.factories.contains_key(&id)
    }

    /// Create the implementation for `id`
    ///
    /// Terminal states are markers and never resolve.
    pub fn resolve(&self, id: StatesEnum) -> Result<Box<dyn AnyState>, RegistryError> {
        if id.is_terminal() {
            return Err(RegistryError::UnknownState(id));
        }

        let factory = self
            .factories
            .get(&id)
            .ok_or(RegistryError::UnknownState(id))?;

        let state = factory();
        if state.id() != id {
            return Err(RegistryError::IdentityMismatch {
                expected: id,
                actual: state.id(),
            });
        }
        Ok(state)
    }

    /// Get the number of registered states
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Get all registered state ids in declaration order
    pub fn states(&self) -> impl Iterator<Item = StatesEnum> + '_ {
        self.factories.keys().copied()
    }
}

impl fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRegistry")
            .field("states", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No implementation for the state, or the state is terminal
    #[error("unknown state: {0}")]
    UnknownState(StatesEnum),

    /// A factory produced an implementation for a different state
    #[error("factory for {expected} produced {actual}")]
    IdentityMismatch {
        expected: StatesEnum,
        actual: StatesEnum,
    },
}
