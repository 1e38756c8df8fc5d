//! Error types and result aliases.
//!
//! Two layers of errors exist in this crate:
//!
//! - [`StoreError`] is produced at the [`KvStore`](crate::store::KvStore) boundary. Store
//!   implementations map their client errors onto these variants.
//! - [`CacheError`] is produced by the caching layer (codec, facade, rate limiter,
//!   get-or-compute). Store errors convert into it, with connectivity failures collapsing into
//!   [`CacheError::StoreUnavailable`].
//!
//! [`ConfigError`] is returned by the validating configuration builders.
//!
//! # Propagation
//!
//! | Component | Decode / schema errors | Store unavailable |
//! |-----------|------------------------|-------------------|
//! | Single-key facade reads | returned | returned |
//! | Batch reads (`mget`, `hgetall`) | logged, entry skipped | returned |
//! | [`Memoized`](crate::Memoized) | logged, recomputed | logged, recomputed |
//! | [`RateLimiter`](crate::RateLimiter) | n/a | returned |
//! | `get_or_compute` | returned | returned |

use std::{sync::Arc, time::Duration};

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for caching-layer operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised by a [`KvStore`](crate::store::KvStore) implementation.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The store could not be reached (refused connection, reset, DNS failure).
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying client error.
        #[source]
        source: Option<BoxError>,
    },

    /// The store did not answer in time.
    #[error("Operation timeout")]
    Timeout,

    /// A command was applied to a key holding a different kind of value.
    #[error("Wrong type for key: {key}")]
    WrongType {
        /// The offending key.
        key: String,
    },

    /// An increment targeted a value that is not an integer.
    #[error("Value at {key} is not an integer")]
    NotAnInteger {
        /// The offending key.
        key: String,
    },

    /// The store answered a command with a reply of an unexpected shape.
    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        /// Name of the command.
        command: &'static str,
        /// Debug rendering of the reply.
        reply: String,
    },

    /// Catch-all for store-specific failures.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl StoreError {
    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a new `WrongType` error for the given key.
    #[must_use]
    pub fn wrong_type(key: impl Into<String>) -> Self {
        Self::WrongType { key: key.into() }
    }

    /// Creates a new `NotAnInteger` error for the given key.
    #[must_use]
    pub fn not_an_integer(key: impl Into<String>) -> Self {
        Self::NotAnInteger { key: key.into() }
    }

    /// Creates a new `UnexpectedReply` error.
    #[must_use]
    pub fn unexpected_reply(command: &'static str, reply: impl std::fmt::Debug) -> Self {
        Self::UnexpectedReply { command, reply: format!("{reply:?}") }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Returns `true` when the store itself could not be reached, as opposed to
    /// the store rejecting a well-delivered command.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}

/// Errors raised by the caching layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// Stored bytes are not well-formed for the wire format.
    #[error("Malformed value at {key}: {message}")]
    Decode {
        /// Physical key the bytes were read from.
        key: String,
        /// Parser diagnostic.
        message: String,
        /// The underlying parser error.
        #[source]
        source: Option<BoxError>,
    },

    /// Stored data is well-formed but does not satisfy the target schema.
    #[error("Value at {key} does not match schema {schema}: {message}")]
    SchemaValidation {
        /// Physical key the bytes were read from.
        key: String,
        /// Schema tag of the target record type.
        schema: &'static str,
        /// Which constraint failed.
        message: String,
    },

    /// A value could not be serialized.
    #[error("Failed to encode {schema}: {message}")]
    Encode {
        /// Schema tag of the value.
        schema: &'static str,
        /// Serializer diagnostic.
        message: String,
    },

    /// The store could not be reached.
    #[error("Store unavailable: {source}")]
    StoreUnavailable {
        /// The connectivity error reported by the store.
        #[source]
        source: StoreError,
    },

    /// The store rejected a command.
    #[error(transparent)]
    Store(StoreError),

    /// Invalid rate limit parameters.
    #[error("Invalid rate limit {field}: {message}")]
    RateLimitConfig {
        /// Parameter name.
        field: &'static str,
        /// Why the value was rejected.
        message: String,
    },

    /// Another caller held the compute lock for longer than the poll timeout.
    #[error("Timed out after {waited:?} waiting for {key} to be computed")]
    LockTimeout {
        /// Logical key being computed.
        key: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The compute function passed to `get_or_compute` failed.
    #[error("Compute failed for {key}")]
    Compute {
        /// Logical key being computed.
        key: String,
        /// The compute function's error.
        #[source]
        source: BoxError,
    },
}

impl CacheError {
    /// Creates a new `Decode` error from a parser error.
    #[must_use]
    pub fn decode(
        key: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Decode {
            key: key.into(),
            message: source.to_string(),
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a new `SchemaValidation` error.
    #[must_use]
    pub fn schema_validation(
        key: impl Into<String>,
        schema: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::SchemaValidation { key: key.into(), schema, message: message.into() }
    }

    /// Creates a new `RateLimitConfig` error.
    #[must_use]
    pub fn rate_limit_config(field: &'static str, message: impl Into<String>) -> Self {
        Self::RateLimitConfig { field, message: message.into() }
    }

    /// Returns `true` for errors caused by an unreachable store.
    #[must_use]
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Returns `true` for errors describing corrupt stored data.
    #[must_use]
    pub fn is_corrupt_data(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::SchemaValidation { .. })
    }
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        if err.is_unavailable() { Self::StoreUnavailable { source: err } } else { Self::Store(err) }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric field is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Field name.
        field: &'static str,
        /// Minimum accepted value.
        min: String,
        /// Rejected value.
        value: String,
    },

    /// A field holds an unusable value.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors_become_store_unavailable() {
        let err: CacheError = StoreError::connection("refused").into();
        assert!(err.is_store_unavailable());

        let err: CacheError = StoreError::timeout().into();
        assert!(err.is_store_unavailable());
    }

    #[test]
    fn connection_cause_is_kept_in_the_source_chain() {
        use std::error::Error as _;

        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: CacheError = StoreError::connection_with_source("dial failed", cause).into();
        assert!(err.is_store_unavailable());

        let store = err.source().expect("store error");
        assert_eq!(store.to_string(), "Connection error: dial failed");
        assert_eq!(store.source().expect("io error").to_string(), "refused");
    }

    #[test]
    fn rejected_commands_stay_store_errors() {
        let err: CacheError = StoreError::wrong_type("k").into();
        assert!(matches!(err, CacheError::Store(StoreError::WrongType { .. })));
        assert!(!err.is_store_unavailable());
    }

    #[test]
    fn corrupt_data_classification() {
        let parse = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        assert!(CacheError::decode("k", parse).is_corrupt_data());
        assert!(CacheError::schema_validation("k", "user", "missing name").is_corrupt_data());
        assert!(!CacheError::rate_limit_config("window_seconds", "zero").is_corrupt_data());
    }

    #[test]
    fn config_error_names_field() {
        let err = ConfigError::BelowMinimum {
            field: "poll_interval",
            min: "1ms".into(),
            value: "0ms".into(),
        };
        assert!(err.to_string().contains("poll_interval"));
    }
}
