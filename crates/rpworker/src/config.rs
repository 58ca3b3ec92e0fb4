//! Worker configuration from the environment
//!
//! Every variable is optional. A value that fails to parse is logged and
//! replaced by the default.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `RPWORKER_WORKER_ID` | `worker-<uuid>` |
//! | `RPWORKER_MAX_CONCURRENCY` | 8 |
//! | `RPWORKER_VISIBILITY_TIMEOUT_SECS` | 300 |
//! | `RPWORKER_SHUTDOWN_TIMEOUT_SECS` | 30 |
//! | `RPWORKER_MAX_ATTEMPTS` | 5 |
//! | `RPWORKER_ENTITY_NOT_FOUND_RETRIES` | 2 |
//! | `RPWORKER_ENTITY_NOT_FOUND_WAIT_SECS` | 60 |
//! | `RPWORKER_WORKFLOW_DEADLINE_SECS` | 86400 (`0` disables) |
//! | `RPWORKER_MAX_TRANSITIONS` | 64 |

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::EngineConfig;
use crate::reliability::ClassifierConfig;
use crate::worker::QueueListenerConfig;

/// Everything needed to wire up a worker process
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    pub listener: QueueListenerConfig,
    pub classifier: ClassifierConfig,
    pub engine: EngineConfig,
}

impl WorkerConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Self {
        // A missing .env file is normal outside local development
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let vars = Vars { lookup: &lookup };

        let listener = defaults.listener;
        let max_concurrency = vars.parse("RPWORKER_MAX_CONCURRENCY", listener.max_concurrency);
        let visibility_timeout =
            vars.secs("RPWORKER_VISIBILITY_TIMEOUT_SECS", listener.visibility_timeout);
        let shutdown_timeout =
            vars.secs("RPWORKER_SHUTDOWN_TIMEOUT_SECS", listener.shutdown_timeout);
        let worker_id = lookup("RPWORKER_WORKER_ID")
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| listener.worker_id.clone());
        let listener = listener
            .with_worker_id(worker_id)
            .with_max_concurrency(max_concurrency)
            .with_visibility_timeout(visibility_timeout)
            .with_shutdown_timeout(shutdown_timeout);

        let classifier = defaults.classifier;
        let deadline_secs = vars.parse(
            "RPWORKER_WORKFLOW_DEADLINE_SECS",
            classifier.workflow_deadline.map_or(0, |d| d.as_secs()),
        );
        let classifier = ClassifierConfig {
            max_attempts: vars.parse("RPWORKER_MAX_ATTEMPTS", classifier.max_attempts).max(1),
            entity_not_found_max_retries: vars.parse(
                "RPWORKER_ENTITY_NOT_FOUND_RETRIES",
                classifier.entity_not_found_max_retries,
            ),
            entity_not_found_wait: vars.secs(
                "RPWORKER_ENTITY_NOT_FOUND_WAIT_SECS",
                classifier.entity_not_found_wait,
            ),
            workflow_deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
            ..classifier
        };

        let max_transitions = vars
            .parse("RPWORKER_MAX_TRANSITIONS", defaults.engine.max_transitions)
            .max(1);
        let engine = defaults.engine.with_max_transitions(max_transitions);

        Self {
            listener,
            classifier,
            engine,
        }
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn parse<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + std::fmt::Debug,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = (self.lookup)(key) else {
            return default;
        };
        match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                warn!(key, value = %raw, error = %e, ?default, "invalid configuration value, using default");
                default
            }
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parse(key, default.as_secs()))
    }
}
