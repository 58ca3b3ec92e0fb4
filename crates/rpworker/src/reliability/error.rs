//! Status codes and the classified worker error

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::StatesEnum;

/// Closed taxonomy of failure codes recorded on operations
///
/// Serialized as the PascalCase variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    // Partner / marketplace
    EntityNotFound,
    PartnerThrottled,
    PartnerTimeout,
    PartnerUnavailable,
    PartnerRequestRejected,
    PartnerCallbackPending,

    // Data source / queue
    DataSourceUnavailable,
    ConcurrencyConflict,
    DataSourceError,
    QueueUnavailable,

    // Workflow input
    ValidationFailed,
    MalformedContext,
    UnsupportedCommand,

    // Engine
    UnknownState,
    InvalidTransition,
    TransitionLimitExceeded,

    // Escalations
    RetriesExhausted,
    DeadlineExceeded,

    InternalError,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EntityNotFound => "EntityNotFound",
            Self::PartnerThrottled => "PartnerThrottled",
            Self::PartnerTimeout => "PartnerTimeout",
            Self::PartnerUnavailable => "PartnerUnavailable",
            Self::PartnerRequestRejected => "PartnerRequestRejected",
            Self::PartnerCallbackPending => "PartnerCallbackPending",
            Self::DataSourceUnavailable => "DataSourceUnavailable",
            Self::ConcurrencyConflict => "ConcurrencyConflict",
            Self::DataSourceError => "DataSourceError",
            Self::QueueUnavailable => "QueueUnavailable",
            Self::ValidationFailed => "ValidationFailed",
            Self::MalformedContext => "MalformedContext",
            Self::UnsupportedCommand => "UnsupportedCommand",
            Self::UnknownState => "UnknownState",
            Self::InvalidTransition => "InvalidTransition",
            Self::TransitionLimitExceeded => "TransitionLimitExceeded",
            Self::RetriesExhausted => "RetriesExhausted",
            Self::DeadlineExceeded => "DeadlineExceeded",
            Self::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure
///
/// `failed_state` is the resume point when the error is retryable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{status_code}: {message}")]
pub struct WorkerError {
    pub failed_state: Option<StatesEnum>,
    pub status_code: StatusCode,
    pub message: String,

    /// Visibility delay before the retry, set only when retryable
    pub retry_after: Option<Duration>,

    pub retryable: bool,
}

impl WorkerError {
    /// Create a retryable error
    pub fn retryable(status_code: StatusCode, message: impl Into<String>, delay: Duration) -> Self {
        Self {
            failed_state: None,
            status_code,
            message: message.into(),
            retry_after: Some(delay),
            retryable: true,
        }
    }

    /// Create a non-retryable error
    pub fn fatal(status_code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            failed_state: None,
            status_code,
            message: message.into(),
            retry_after: None,
            retryable: false,
        }
    }

    /// Attach the state that was executing
    pub fn in_state(mut self, state: StatesEnum) -> Self {
        self.failed_state = Some(state);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_serializes_as_name() {
        let json = serde_json::to_string(&StatusCode::RetriesExhausted).unwrap();
        assert_eq!(json, "\"RetriesExhausted\"");
        assert_eq!(StatusCode::EntityNotFound.to_string(), "EntityNotFound");
    }

    #[test]
    fn test_worker_error_builders() {
        let err = WorkerError::retryable(
            StatusCode::PartnerThrottled,
            "slow down",
            Duration::from_secs(10),
        )
        .in_state(StatesEnum::LinkOrg);

        assert!(err.retryable);
        assert_eq!(err.retry_after, Some(Duration::from_secs(10)));
        assert_eq!(err.failed_state, Some(StatesEnum::LinkOrg));
        assert_eq!(err.to_string(), "PartnerThrottled: slow down");

        let fatal = WorkerError::fatal(StatusCode::ValidationFailed, "bad plan");
        assert!(!fatal.retryable);
        assert_eq!(fatal.retry_after, None);
    }
}
