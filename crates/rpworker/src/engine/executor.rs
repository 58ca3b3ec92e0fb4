//! State machine engine
//!
//! The `StateMachineEngine` is responsible for:
//! - Resolving the current state from the registry
//! - Executing it and moving the context to the state it returns
//! - Classifying failures into retry or fatal outcomes
//! - Stopping at terminal states, on cancellation and at the transition limit
//!
//! The engine holds no per-operation data; one instance serves every message.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::model::{FailureInfo, StateContext, StatesEnum};
use crate::reliability::{ErrorClassifier, RetryBudget, StatusCode, WorkerError};
use crate::state::{StateEnv, StateRegistry};

/// Configuration for the state machine engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum state transitions in one run (for safety)
    pub max_transitions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_transitions: 64,
        }
    }
}

impl EngineConfig {
    pub fn with_max_transitions(mut self, max_transitions: usize) -> Self {
        self.max_transitions = max_transitions;
        self
    }
}

/// Result of executing a single state
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The state succeeded; the context now points at the next state
    Continue(StatesEnum),

    /// The state failed transiently; the context still points at it
    Retry(WorkerError),

    /// The state failed permanently; the context still points at it
    Fatal(WorkerError),
}

/// Result of running a context until it can go no further
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// A terminal state was reached
    Completed { terminal: StatesEnum },

    /// Resume later from `WorkerError::failed_state`
    Retry(WorkerError),

    /// The context has been moved to `Failed`
    Failed(WorkerError),

    /// Cancellation stopped the run at a state boundary
    Cancelled { resume_state: StatesEnum },
}

/// State machine engine
///
/// # Example
///
/// ```ignore
/// use rpworker::prelude::*;
///
/// let engine = StateMachineEngine::new(Arc::new(standard_registry()), ErrorClassifier::default());
/// match engine.run(&mut ctx, &env).await {
///     RunOutcome::Completed { terminal } => { /* report */ }
///     RunOutcome::Retry(error) => { /* re-enqueue after error.retry_after */ }
///     RunOutcome::Failed(error) => { /* dead-letter */ }
///     RunOutcome::Cancelled { .. } => { /* release */ }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct StateMachineEngine {
    registry: Arc<StateRegistry>,
    classifier: ErrorClassifier,
    config: EngineConfig,
}

impl StateMachineEngine {
    pub fn new(registry: Arc<StateRegistry>, classifier: ErrorClassifier) -> Self {
        Self {
            registry,
            classifier,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Run states until a terminal state, a failure, or cancellation
    ///
    /// On a fatal failure the context is moved to `Failed` with its
    /// [`FailureInfo`]. On retry and cancellation it is left at the state
    /// to resume from.
    #[instrument(skip(self, ctx, env), fields(start_state = %ctx.current_state))]
    pub async fn run(&self, ctx: &mut StateContext, env: &StateEnv) -> RunOutcome {
        let mut transitions = 0;

        loop {
            if ctx.is_terminal() {
                debug!(terminal = %ctx.current_state, transitions, "workflow reached terminal state");
                return RunOutcome::Completed {
                    terminal: ctx.current_state,
                };
            }

            if env.is_cancelled() {
                info!(resume_state = %ctx.current_state, "cancellation requested, stopping at state boundary");
                return RunOutcome::Cancelled {
                    resume_state: ctx.current_state,
                };
            }

            if transitions >= self.config.max_transitions {
                let error = WorkerError::fatal(
                    StatusCode::TransitionLimitExceeded,
                    format!(
                        "workflow exceeded {} transitions",
                        self.config.max_transitions
                    ),
                )
                .in_state(ctx.current_state);
                return self.fail(ctx, env, error);
            }

            match self.step(ctx, env).await {
                StepOutcome::Continue(_) => transitions += 1,
                StepOutcome::Retry(error) => return RunOutcome::Retry(error),
                StepOutcome::Fatal(error) => return self.fail(ctx, env, error),
            }
        }
    }

    /// Execute the current state once
    ///
    /// Does not move the context to `Failed`; [`run`](Self::run) does that.
    pub async fn step(&self, ctx: &mut StateContext, env: &StateEnv) -> StepOutcome {
        let current = ctx.current_state;

        let state = match self.registry.resolve(current) {
            Ok(state) => state,
            Err(e) => {
                return StepOutcome::Fatal(
                    WorkerError::fatal(StatusCode::UnknownState, e.to_string()).in_state(current),
                );
            }
        };

        let started = Instant::now();
        let result = state.execute(ctx, env).await;
        let elapsed = started.elapsed();

        match result {
            Ok(next) if next == current => StepOutcome::Fatal(
                WorkerError::fatal(
                    StatusCode::InvalidTransition,
                    format!("state {current} returned itself as the next state"),
                )
                .in_state(current),
            ),
            Ok(next) => {
                env.metrics.record_transition(current, next, elapsed);
                info!(from = %current, to = %next, elapsed_ms = elapsed.as_millis() as u64, "state transition");
                ctx.advance(next);
                StepOutcome::Continue(next)
            }
            Err(e) => {
                let error = self
                    .classifier
                    .classify(&e, current, RetryBudget::from_context(ctx));
                env.metrics
                    .record_failure(current, error.status_code, error.retryable);
                warn!(
                    state = %current,
                    status_code = %error.status_code,
                    retryable = error.retryable,
                    error = %e,
                    "state failed"
                );

                if error.retryable {
                    StepOutcome::Retry(error)
                } else {
                    StepOutcome::Fatal(error)
                }
            }
        }
    }

    fn fail(&self, ctx: &mut StateContext, env: &StateEnv, error: WorkerError) -> RunOutcome {
        let failed_state = error.failed_state.unwrap_or(ctx.current_state);
        env.metrics
            .record_transition(failed_state, StatesEnum::Failed, std::time::Duration::ZERO);
        ctx.fail(FailureInfo {
            failed_state: Some(failed_state),
            status_code: error.status_code,
            message: error.message.clone(),
        });
        RunOutcome::Failed(error)
    }
}
