//! Configuration for the caching layer.
//!
//! [`KvConfig`] carries the settings shared by every component built on a
//! store: the configured namespace, the lease of compute locks and the
//! polling schedule used while another caller holds a lock.
//!
//! Configs can be built in code with the validating builder or deserialized
//! from any serde format. Durations use humantime notation (`"30s"`,
//! `"50ms"`):
//!
//! ```
//! use std::time::Duration;
//! use keyward::KvConfig;
//!
//! let config: KvConfig = serde_json::from_str(
//!     r#"{
//!         "namespace": "orders",
//!         "poll_interval": "20ms",
//!         "poll_backoff": { "kind": "exponential", "factor": 2.0, "max_interval": "200ms" }
//!     }"#,
//! ).unwrap();
//! config.validate().unwrap();
//!
//! assert_eq!(config.namespace(), Some("orders"));
//! assert_eq!(config.poll_interval(), Duration::from_millis(20));
//! assert_eq!(config.lock_lease(), Duration::from_secs(30));
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{batch::BatchConfig, error::ConfigError, namespace::Keyspace};

/// Default lease of a compute lock.
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(30);

/// Default time a contended caller waits for another caller's result.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay between two reads while waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shortest lock lease accepted. Stores expire keys with second precision.
pub const MIN_LOCK_LEASE: Duration = Duration::from_secs(1);

/// Shortest poll interval accepted.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How the delay between reads grows while a caller waits on a lock holder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum PollBackoff {
    /// Every read is separated by the base poll interval.
    #[default]
    Fixed,
    /// The interval is multiplied by `factor` after each read, up to
    /// `max_interval`.
    Exponential {
        /// Growth factor, at least `1.0`.
        factor: f64,
        /// Upper bound on the interval.
        #[serde(with = "humantime_serde")]
        max_interval: Duration,
    },
}

impl PollBackoff {
    /// Returns the interval to wait after `current`.
    #[must_use]
    pub fn next_interval(&self, current: Duration) -> Duration {
        match *self {
            Self::Fixed => current,
            Self::Exponential { factor, max_interval } => {
                Duration::try_from_secs_f64(current.as_secs_f64() * factor)
                    .unwrap_or(max_interval)
                    .min(max_interval)
            },
        }
    }

    /// Returns `interval` plus a random jitter of 0-50%, so callers waiting
    /// on the same lock do not poll in lockstep.
    #[must_use]
    pub fn jittered(interval: Duration) -> Duration {
        let jitter_range = u64::try_from(interval.as_millis() / 2).unwrap_or(u64::MAX);
        if jitter_range > 0 {
            let jitter = rand::rng().random_range(0..=jitter_range);
            interval.saturating_add(Duration::from_millis(jitter))
        } else {
            interval
        }
    }

    fn validate(&self, poll_interval: Duration) -> Result<(), ConfigError> {
        if let Self::Exponential { factor, max_interval } = *self {
            if !factor.is_finite() {
                return Err(ConfigError::Invalid {
                    field: "poll_backoff.factor",
                    reason: format!("must be a finite number, got {factor}"),
                });
            }
            if factor < 1.0 {
                return Err(ConfigError::BelowMinimum {
                    field: "poll_backoff.factor",
                    min: "1.0".into(),
                    value: factor.to_string(),
                });
            }
            if max_interval < poll_interval {
                return Err(ConfigError::BelowMinimum {
                    field: "poll_backoff.max_interval",
                    min: format!("{poll_interval:?}"),
                    value: format!("{max_interval:?}"),
                });
            }
        }
        Ok(())
    }
}

/// Settings shared by the facade, the memoizer and get-or-compute.
///
/// # Validation
///
/// - `lock_lease` must be `>= 1s`
/// - `poll_interval` must be `>= 1ms`
/// - exponential backoff needs a finite `factor >= 1.0` and `max_interval >= poll_interval`
/// - an empty namespace is treated as no namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KvConfig {
    #[serde(default)]
    namespace: Option<String>,

    #[serde(with = "humantime_serde", default = "default_lock_lease")]
    lock_lease: Duration,

    #[serde(with = "humantime_serde", default = "default_poll_timeout")]
    poll_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    poll_interval: Duration,

    #[serde(default)]
    poll_backoff: PollBackoff,

    #[serde(default)]
    batch: BatchConfig,
}

fn default_lock_lease() -> Duration {
    DEFAULT_LOCK_LEASE
}

fn default_poll_timeout() -> Duration {
    DEFAULT_POLL_TIMEOUT
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            lock_lease: DEFAULT_LOCK_LEASE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_backoff: PollBackoff::Fixed,
            batch: BatchConfig::default(),
        }
    }
}

#[bon::bon]
impl KvConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any field is out of range.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use keyward::{KvConfig, PollBackoff};
    ///
    /// let config = KvConfig::builder()
    ///     .namespace("tenant-a")
    ///     .poll_interval(Duration::from_millis(10))
    ///     .poll_backoff(PollBackoff::Exponential {
    ///         factor: 2.0,
    ///         max_interval: Duration::from_millis(100),
    ///     })
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.namespace(), Some("tenant-a"));
    /// ```
    #[builder]
    pub fn new(
        #[builder(into)] namespace: Option<String>,
        #[builder(default = DEFAULT_LOCK_LEASE)] lock_lease: Duration,
        #[builder(default = DEFAULT_POLL_TIMEOUT)] poll_timeout: Duration,
        #[builder(default = DEFAULT_POLL_INTERVAL)] poll_interval: Duration,
        #[builder(default)] poll_backoff: PollBackoff,
        #[builder(default)] batch: BatchConfig,
    ) -> Result<Self, ConfigError> {
        let config =
            Self { namespace, lock_lease, poll_timeout, poll_interval, poll_backoff, batch };
        config.validate()?;
        Ok(config)
    }

    /// Checks the field constraints. Deserialized configs should be
    /// validated before use.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_lease < MIN_LOCK_LEASE {
            return Err(ConfigError::BelowMinimum {
                field: "lock_lease",
                min: format!("{MIN_LOCK_LEASE:?}"),
                value: format!("{:?}", self.lock_lease),
            });
        }
        if self.poll_interval < MIN_POLL_INTERVAL {
            return Err(ConfigError::BelowMinimum {
                field: "poll_interval",
                min: format!("{MIN_POLL_INTERVAL:?}"),
                value: format!("{:?}", self.poll_interval),
            });
        }
        self.poll_backoff.validate(self.poll_interval)?;
        self.batch.validate()
    }

    /// Returns the configured namespace, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// Returns the lease of compute locks.
    #[must_use]
    pub fn lock_lease(&self) -> Duration {
        self.lock_lease
    }

    /// Returns how long a contended caller waits before giving up.
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Returns the initial delay between reads while waiting.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the poll backoff curve.
    #[must_use]
    pub fn poll_backoff(&self) -> PollBackoff {
        self.poll_backoff
    }

    /// Returns the batch settings.
    #[must_use]
    pub fn batch(&self) -> &BatchConfig {
        &self.batch
    }

    /// Returns the keyspace rooted at the configured namespace.
    #[must_use]
    pub fn keyspace(&self) -> Keyspace {
        Keyspace::new(self.namespace.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults() {
        let config = KvConfig::builder().build().unwrap();
        assert_eq!(config, KvConfig::default());
        assert_eq!(config.namespace(), None);
        assert_eq!(config.lock_lease(), Duration::from_secs(30));
        assert_eq!(config.poll_timeout(), Duration::from_secs(5));
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.poll_backoff(), PollBackoff::Fixed);
        assert_eq!(config.batch().max_batch_size(), 1000);
    }

    #[test]
    fn empty_namespace_is_none() {
        let config = KvConfig::builder().namespace("").build().unwrap();
        assert_eq!(config.namespace(), None);
        assert_eq!(config.keyspace().resolve("k"), "k");
    }

    #[test]
    fn rejects_short_lease() {
        let err = KvConfig::builder().lock_lease(Duration::from_millis(500)).build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "lock_lease", .. }));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = KvConfig::builder().poll_interval(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "poll_interval", .. }));
    }

    #[rstest]
    #[case::factor_below_one(0.5, Duration::from_secs(1), "poll_backoff.factor")]
    #[case::cap_below_interval(2.0, Duration::from_millis(10), "poll_backoff.max_interval")]
    fn rejects_bad_backoff(
        #[case] factor: f64,
        #[case] max_interval: Duration,
        #[case] expected: &str,
    ) {
        let err = KvConfig::builder()
            .poll_backoff(PollBackoff::Exponential { factor, max_interval })
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field, .. } if field == expected));
    }

    #[rstest]
    #[case::nan(f64::NAN)]
    #[case::infinite(f64::INFINITY)]
    fn rejects_non_finite_factor(#[case] factor: f64) {
        let backoff = PollBackoff::Exponential { factor, max_interval: Duration::from_secs(1) };
        let err = KvConfig::builder().poll_backoff(backoff).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "poll_backoff.factor", .. }));
        let message = err.to_string();
        assert!(message.starts_with("invalid poll_backoff.factor: must be a finite number"));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let backoff =
            PollBackoff::Exponential { factor: 2.0, max_interval: Duration::from_millis(300) };
        let mut interval = Duration::from_millis(50);
        let mut seen = Vec::new();
        for _ in 0..5 {
            interval = backoff.next_interval(interval);
            seen.push(interval.as_millis());
        }
        assert_eq!(seen, [100, 200, 300, 300, 300]);
        assert_eq!(PollBackoff::Fixed.next_interval(Duration::from_millis(50)).as_millis(), 50);
    }

    #[test]
    fn jitter_adds_at_most_half_the_interval() {
        for _ in 0..100 {
            let delay = PollBackoff::jittered(Duration::from_millis(100));
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150)); // 100 + up to 50% jitter
        }
        // Nothing to jitter below 2ms
        assert_eq!(PollBackoff::jittered(Duration::from_millis(1)), Duration::from_millis(1));
    }

    #[test]
    fn deserializes_humantime_durations() {
        let config: KvConfig = serde_json::from_str(
            r#"{"lock_lease": "10s", "poll_timeout": "2s", "batch": {"max_batch_size": 50}}"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.lock_lease(), Duration::from_secs(10));
        assert_eq!(config.poll_timeout(), Duration::from_secs(2));
        assert_eq!(config.batch().max_batch_size(), 50);
    }

    #[test]
    fn rejects_unknown_fields() {
        let result = serde_json::from_str::<KvConfig>(r#"{"lock_lease_seconds": 10}"#);
        assert!(result.is_err());
    }
}
