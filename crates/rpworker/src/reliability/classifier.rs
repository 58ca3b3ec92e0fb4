//! Error classification and retry escalation
//!
//! Every state error is mapped to a [`StatusCode`] and one of three classes:
//! transient (retry with backoff), entity-not-found (bounded retry with a
//! fixed wait, for eventually consistent partners) or fatal. The retry
//! budget then decides whether a retry is still allowed.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::error::{StatusCode, WorkerError};
use super::retry::{duration_millis, option_duration_millis, BackoffPolicy};
use crate::collaborators::{DataSourceError, PartnerError, QueueError};
use crate::model::{StateContext, StatesEnum};
use crate::state::StateError;

/// How an error should be handled before the budget is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with exponential backoff
    Transient,

    /// Retry a bounded number of times with a fixed wait
    EntityNotFound,

    /// Do not retry
    Fatal,
}

/// Retry limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Deliveries allowed per operation, including the first
    pub max_attempts: u32,

    /// Retries allowed for partner "entity not found" errors
    pub entity_not_found_max_retries: u32,

    /// Fixed wait before an entity-not-found retry
    #[serde(with = "duration_millis")]
    pub entity_not_found_wait: Duration,

    pub backoff: BackoffPolicy,

    /// Total time an operation may run, measured from context creation
    #[serde(with = "option_duration_millis")]
    pub workflow_deadline: Option<Duration>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            entity_not_found_max_retries: 2,
            entity_not_found_wait: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
            workflow_deadline: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

impl ClassifierConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_entity_not_found_max_retries(mut self, retries: u32) -> Self {
        self.entity_not_found_max_retries = retries;
        self
    }

    pub fn with_entity_not_found_wait(mut self, wait: Duration) -> Self {
        self.entity_not_found_wait = wait;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_workflow_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.workflow_deadline = deadline;
        self
    }
}

/// Retry budget already consumed by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryBudget {
    /// Current delivery attempt (1-based)
    pub attempt: u32,
    pub entity_not_found_retries: u32,

    /// Time since the operation was created
    pub elapsed: Duration,
}

impl RetryBudget {
    pub fn from_context(ctx: &StateContext) -> Self {
        let elapsed = (Utc::now() - ctx.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Self {
            attempt: ctx.attempt,
            entity_not_found_retries: ctx.entity_not_found_retries,
            elapsed,
        }
    }
}

/// Maps state errors to classified [`WorkerError`]s
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    config: ClassifierConfig,
}

impl ErrorClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Status code and class for an error, ignoring the retry budget
    pub fn categorize(&self, error: &StateError) -> (StatusCode, ErrorClass) {
        match error {
            StateError::Partner(e) => categorize_partner(e),
            StateError::DataSource(e) => match e {
                DataSourceError::Unavailable(_) => {
                    (StatusCode::DataSourceUnavailable, ErrorClass::Transient)
                }
                DataSourceError::ConcurrencyConflict { .. } => {
                    (StatusCode::ConcurrencyConflict, ErrorClass::Transient)
                }
                DataSourceError::NotFound(_)
                | DataSourceError::AlreadyExists(_)
                | DataSourceError::Serialization(_) => {
                    (StatusCode::DataSourceError, ErrorClass::Fatal)
                }
            },
            StateError::Queue(QueueError::Unavailable(_)) => {
                (StatusCode::QueueUnavailable, ErrorClass::Transient)
            }
            StateError::Queue(_) => (StatusCode::InternalError, ErrorClass::Fatal),
            StateError::AwaitingCallback(_) => {
                (StatusCode::PartnerCallbackPending, ErrorClass::Transient)
            }
            StateError::Validation(_) => (StatusCode::ValidationFailed, ErrorClass::Fatal),
            StateError::MissingContext(_) | StateError::MalformedContext { .. } => {
                (StatusCode::MalformedContext, ErrorClass::Fatal)
            }
            StateError::Unexpected(_) => (StatusCode::InternalError, ErrorClass::Fatal),
        }
    }

    /// Classify an error raised by `state`, applying the retry budget
    pub fn classify(
        &self,
        error: &StateError,
        state: StatesEnum,
        budget: RetryBudget,
    ) -> WorkerError {
        let (status_code, class) = self.categorize(error);
        let message = error.to_string();

        let delay = match class {
            ErrorClass::Fatal => {
                return WorkerError::fatal(status_code, message).in_state(state);
            }
            ErrorClass::EntityNotFound => {
                if budget.entity_not_found_retries >= self.config.entity_not_found_max_retries {
                    return WorkerError::fatal(
                        StatusCode::EntityNotFound,
                        format!(
                            "{message} (still missing after {} retries)",
                            budget.entity_not_found_retries
                        ),
                    )
                    .in_state(state);
                }
                self.config.entity_not_found_wait
            }
            ErrorClass::Transient => self.config.backoff.delay_for_attempt(budget.attempt),
        };

        if budget.attempt >= self.config.max_attempts {
            return WorkerError::fatal(
                StatusCode::RetriesExhausted,
                format!(
                    "{message} (attempt {} of {})",
                    budget.attempt, self.config.max_attempts
                ),
            )
            .in_state(state);
        }

        if let Some(deadline) = self.config.workflow_deadline {
            if budget.elapsed.saturating_add(delay) > deadline {
                return WorkerError::fatal(
                    StatusCode::DeadlineExceeded,
                    format!("{message} (retry would pass the {deadline:?} deadline)"),
                )
                .in_state(state);
            }
        }

        WorkerError::retryable(status_code, message, delay).in_state(state)
    }

    /// Fatal error when deliveries already used up the attempt budget
    pub fn check_attempts(&self, budget: RetryBudget, state: StatesEnum) -> Option<WorkerError> {
        (budget.attempt > self.config.max_attempts).then(|| {
            WorkerError::fatal(
                StatusCode::RetriesExhausted,
                format!(
                    "delivered {} times, limit {}",
                    budget.attempt, self.config.max_attempts
                ),
            )
            .in_state(state)
        })
    }

    /// Fatal error when an operation has already outlived its deadline
    pub fn check_deadline(&self, budget: RetryBudget, state: StatesEnum) -> Option<WorkerError> {
        let deadline = self.config.workflow_deadline?;
        (budget.elapsed > deadline).then(|| {
            WorkerError::fatal(
                StatusCode::DeadlineExceeded,
                format!("operation running for {:?}, deadline {deadline:?}", budget.elapsed),
            )
            .in_state(state)
        })
    }
}

fn categorize_partner(error: &PartnerError) -> (StatusCode, ErrorClass) {
    if error.is_entity_not_found() {
        return (StatusCode::EntityNotFound, ErrorClass::EntityNotFound);
    }

    match error {
        PartnerError::Timeout => (StatusCode::PartnerTimeout, ErrorClass::Transient),
        PartnerError::Connection(_) => (StatusCode::PartnerUnavailable, ErrorClass::Transient),
        _ => match error.status() {
            Some(429) => (StatusCode::PartnerThrottled, ErrorClass::Transient),
            Some(408) => (StatusCode::PartnerTimeout, ErrorClass::Transient),
            Some(500..=599) => (StatusCode::PartnerUnavailable, ErrorClass::Transient),
            _ => (StatusCode::PartnerRequestRejected, ErrorClass::Fatal),
        },
    }
}
