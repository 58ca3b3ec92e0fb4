//! Error classification and retry policy
//!
//! This module provides:
//! - [`StatusCode`] - closed taxonomy of failure codes
//! - [`WorkerError`] - a classified failure with its resume point
//! - [`ErrorClassifier`] - maps state errors to retry or fatal outcomes
//! - [`BackoffPolicy`] - exponential backoff with jitter

mod classifier;
mod error;
mod retry;

pub use classifier::{ClassifierConfig, ErrorClass, ErrorClassifier, RetryBudget};
pub use error::{StatusCode, WorkerError};
pub use retry::BackoffPolicy;
pub(crate) use retry::{duration_millis, option_duration_millis};
