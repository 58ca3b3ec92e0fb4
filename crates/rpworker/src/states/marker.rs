//! Pass-through state

use async_trait::async_trait;

use crate::model::{StateContext, StatesEnum};
use crate::state::{AnyState, StateEnv, StateError};

/// State with no side effects that always moves to `next`
///
/// Hosts use it to register placeholders for custom states.
///
/// # Example
///
/// ```
/// use rpworker::model::StatesEnum;
/// use rpworker::state::{AnyState, StateRegistry};
/// use rpworker::states::MarkerState;
///
/// let mut registry = StateRegistry::new();
/// registry.register_factory(StatesEnum::CustomState1, || {
///     Box::new(MarkerState::new(StatesEnum::CustomState1, StatesEnum::Succeeded)) as Box<dyn AnyState>
/// });
/// assert!(registry.contains(StatesEnum::CustomState1));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct MarkerState {
    id: StatesEnum,
    next: StatesEnum,
}

impl MarkerState {
    pub fn new(id: StatesEnum, next: StatesEnum) -> Self {
        Self { id, next }
    }
}

#[async_trait]
impl AnyState for MarkerState {
    fn id(&self) -> StatesEnum {
        self.id
    }

    async fn execute(
        &self,
        _ctx: &mut StateContext,
        _env: &StateEnv,
    ) -> Result<StatesEnum, StateError> {
        Ok(self.next)
    }
}
