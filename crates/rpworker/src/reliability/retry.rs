//! Backoff policy for transient failures

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Delay schedule for re-enqueued contexts
///
/// Exponential backoff with jitter to avoid a thundering herd of retries
/// against a partner that just recovered.
///
/// # Example
///
/// ```
/// use rpworker::reliability::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::exponential()
///     .with_initial_interval(Duration::from_secs(5))
///     .with_max_interval(Duration::from_secs(300));
///
/// // Failure on attempt 1 -> retry after ~5s
/// // Failure on attempt 2 -> retry after ~10s
/// // Failure on attempt 3 -> retry after ~20s
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0); 0.1 means ±10% randomness
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl BackoffPolicy {
    /// Exponential backoff with sensible defaults
    ///
    /// - 5 second initial interval
    /// - 5 minute max interval
    /// - 2x backoff coefficient
    /// - 10% jitter
    pub fn exponential() -> Self {
        Self {
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(300),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    /// Same delay for every retry
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the growth factor between retries (at least 1.0)
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = sanitize_coefficient(coefficient);
        self
    }

    /// Set the jitter factor (clamped to 0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retrying after attempt `attempt` (1-based) failed
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let coefficient = sanitize_coefficient(self.backoff_coefficient);
        let base = self.initial_interval.as_secs_f64() * coefficient.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let jitter_range = capped * jitter;
        let jittered = if jitter_range > 0.0 {
            let offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

/// Deserialized policies may carry any float; growth below 1.0 is treated as none
fn sanitize_coefficient(coefficient: f64) -> f64 {
    if coefficient.is_finite() {
        coefficient.max(1.0)
    } else {
        1.0
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Optional Duration as milliseconds
pub(crate) mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_defaults() {
        let policy = BackoffPolicy::exponential();
        assert_eq!(policy.initial_interval, Duration::from_secs(5));
        assert_eq!(policy.backoff_coefficient, 2.0);
    }

    #[test]
    fn test_delay_for_attempt() {
        let policy = BackoffPolicy::exponential().with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(20));
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = BackoffPolicy::exponential()
            .with_max_interval(Duration::from_secs(30))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = BackoffPolicy::exponential().with_jitter(0.5);
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(2500));
            assert!(delay <= Duration::from_millis(7500));
        }
    }

    #[test]
    fn test_fixed_interval() {
        let policy = BackoffPolicy::fixed(Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(60));
    }

    #[test]
    fn test_serialization() {
        let policy = BackoffPolicy::exponential().with_jitter(0.2);

        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"initial_interval\":5000"));

        let parsed: BackoffPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }

    #[test]
    fn test_out_of_range_settings_from_config() {
        let json = r#"{
            "initial_interval": 5000,
            "max_interval": 30000,
            "backoff_coefficient": -2.0,
            "jitter": 7.5
        }"#;
        let policy: BackoffPolicy = serde_json::from_str(json).unwrap();

        for attempt in [1, 2, 3, 10] {
            assert!(policy.delay_for_attempt(attempt) <= Duration::from_secs(60));
        }

        let policy = BackoffPolicy {
            backoff_coefficient: f64::NAN,
            jitter: f64::INFINITY,
            ..BackoffPolicy::exponential()
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(5));

        let policy = BackoffPolicy {
            initial_interval: Duration::ZERO,
            backoff_coefficient: f64::INFINITY,
            jitter: 0.0,
            ..BackoffPolicy::exponential()
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn test_coefficient_below_one_is_flat() {
        let policy = BackoffPolicy::exponential()
            .with_backoff_coefficient(0.5)
            .with_jitter(0.0);
        assert_eq!(policy.backoff_coefficient, 1.0);
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
    }
}
