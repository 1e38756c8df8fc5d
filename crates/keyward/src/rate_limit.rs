//! Sliding-window and fixed-window rate limiting.
//!
//! # Sliding window
//!
//! Each limited key is a sorted set of event timestamps (integer
//! microseconds since the Unix epoch). One atomic pipeline per check:
//!
//! | # | Command | Effect |
//! |---|---------|--------|
//! | 1 | `ZREMRANGEBYSCORE key -inf now-window` | drop events at least `window` old |
//! | 2 | `ZADD key now member` | record this event |
//! | 3 | `ZCARD key` | count events in the window, this one included |
//! | 4 | `EXPIRE key window` | idle keys disappear |
//!
//! Denied events are recorded too, so a caller hammering a limited key
//! stays limited until it backs off for a full window.
//!
//! # Fixed window
//!
//! A counter per bucket `{key}:{floor(now / window)}`. One atomic pipeline
//! per check:
//!
//! | # | Command | Effect |
//! |---|---------|--------|
//! | 1 | `INCRBY bucket 1` | count this event |
//! | 2 | `EXPIRE bucket window NX` | expire the bucket, only if it has no expiry yet |
//!
//! The bucket gets its expiry in the same round trip that creates it, and
//! later increments never push the expiry back.
//!
//! # Errors
//!
//! Invalid parameters are rejected before touching the store. Store
//! failures propagate: whether to fail open or closed is the caller's call.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::{
    error::{CacheError, CacheResult, StoreError, StoreResult},
    facade::KeyValue,
    store::{KvStore, Pipeline, Reply},
};

/// Window accounting strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WindowMode {
    /// Count events within `window_seconds` of now.
    #[default]
    Sliding,
    /// Count events in the current `window_seconds`-long bucket.
    Fixed,
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is within the limit.
    pub allowed: bool,
    /// Requests left in the window, never negative.
    pub remaining: u64,
}

impl RateLimitDecision {
    fn from_count(count: u64, max_requests: u64) -> Self {
        Self { allowed: count <= max_requests, remaining: max_requests.saturating_sub(count) }
    }
}

/// Quota enforcement over a [`KvStore`].
///
/// Keys are resolved in the facade's namespace.
///
/// ```
/// use keyward::{KeyValue, KvConfig, RateLimiter, WindowMode, store::MemoryStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let limiter = RateLimiter::new(KeyValue::new(MemoryStore::new(), KvConfig::default()));
///
/// let first = limiter.check_rate_limit("login:alice", 2, 60, WindowMode::Fixed).await.unwrap();
/// assert!(first.allowed);
/// assert_eq!(first.remaining, 1);
/// # });
/// ```
pub struct RateLimiter<S> {
    kv: KeyValue<S>,
}

impl<S> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self { kv: self.kv.clone() }
    }
}

impl<S> std::fmt::Debug for RateLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("kv", &self.kv).finish()
    }
}

impl<S: KvStore> RateLimiter<S> {
    /// Creates a limiter resolving keys through `kv`.
    #[must_use]
    pub fn new(kv: KeyValue<S>) -> Self {
        Self { kv }
    }

    /// Records one request against `key` and decides whether it is allowed.
    ///
    /// # Errors
    ///
    /// - [`CacheError::RateLimitConfig`] if `window_seconds <= 0`.
    /// - A store error if the check could not be performed.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        max_requests: u64,
        window_seconds: i64,
        mode: WindowMode,
    ) -> CacheResult<RateLimitDecision> {
        self.check_rate_limit_at(key, max_requests, window_seconds, mode, SystemTime::now()).await
    }

    /// Like [`check_rate_limit`](Self::check_rate_limit) with an explicit
    /// clock reading.
    ///
    /// # Errors
    ///
    /// Same as [`check_rate_limit`](Self::check_rate_limit), plus
    /// [`CacheError::RateLimitConfig`] if `now` precedes the Unix epoch.
    #[tracing::instrument(name = "rate_limit_check", skip(self, now))]
    pub async fn check_rate_limit_at(
        &self,
        key: &str,
        max_requests: u64,
        window_seconds: i64,
        mode: WindowMode,
        now: SystemTime,
    ) -> CacheResult<RateLimitDecision> {
        let window = window_duration(window_seconds)?;
        let since_epoch = now.duration_since(UNIX_EPOCH).map_err(|_| {
            CacheError::rate_limit_config("now", "clock reading precedes the Unix epoch")
        })?;

        let physical = self.kv.resolve(key);
        // Position and name of the command whose reply is the event count
        let (pipeline, count_at, command) = match mode {
            WindowMode::Sliding => (sliding_pipeline(&physical, window, since_epoch), 2, "ZCARD"),
            WindowMode::Fixed => (fixed_pipeline(&physical, window, since_epoch), 0, "INCRBY"),
        };
        let replies = self.kv.store().execute(pipeline).await?;
        let count = reply_int(replies, count_at, command)?;
        let decision =
            RateLimitDecision::from_count(u64::try_from(count).unwrap_or(0), max_requests);

        debug!(
            key = %physical,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Rate limit checked"
        );
        Ok(decision)
    }
}

#[allow(clippy::cast_precision_loss)]
fn sliding_pipeline(key: &str, window: Duration, since_epoch: Duration) -> Pipeline {
    let now_us = micros(since_epoch);
    let cutoff_us = now_us.saturating_sub(micros(window));
    let member = format!("{now_us}-{:016x}", rand::random::<u64>());

    let mut pipeline = Pipeline::atomic();
    pipeline
        .zrem_range_by_score(key, f64::NEG_INFINITY, cutoff_us as f64)
        .zadd(key, member, now_us as f64)
        .zcard(key)
        .expire(key, window);
    pipeline
}

fn fixed_pipeline(key: &str, window: Duration, since_epoch: Duration) -> Pipeline {
    let bucket = since_epoch.as_secs() / window.as_secs();
    let bucket_key = format!("{key}:{bucket}");

    let mut pipeline = Pipeline::atomic();
    pipeline.incr_by(&bucket_key, 1).expire_if_persistent(&bucket_key, window);
    pipeline
}

/// The integer reply at `idx`. Any failed command fails the check.
fn reply_int(
    replies: Vec<StoreResult<Reply>>,
    idx: usize,
    command: &'static str,
) -> CacheResult<i64> {
    let mut count = None;
    for (i, reply) in replies.into_iter().enumerate() {
        let reply = reply?;
        if i == idx {
            count = Some(reply.into_int(command)?);
        }
    }
    count.ok_or_else(|| StoreError::unexpected_reply(command, "missing reply").into())
}

fn window_duration(window_seconds: i64) -> CacheResult<Duration> {
    if window_seconds <= 0 {
        return Err(CacheError::rate_limit_config(
            "window_seconds",
            format!("must be positive, got {window_seconds}"),
        ));
    }
    Ok(Duration::from_secs(window_seconds.unsigned_abs()))
}

fn micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        KvConfig,
        store::{KeyTtl, MemoryStore, SetOptions},
        testutil::CountingStore,
    };

    fn limiter() -> RateLimiter<MemoryStore> {
        RateLimiter::new(KeyValue::new(MemoryStore::new(), KvConfig::default()))
    }

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[rstest]
    #[case::sliding(WindowMode::Sliding)]
    #[case::fixed(WindowMode::Fixed)]
    #[tokio::test]
    async fn fourth_call_is_denied(#[case] mode: WindowMode) {
        let limiter = limiter();
        let now = at(1_000_020);

        let mut decisions = Vec::new();
        for _ in 0..4 {
            decisions.push(limiter.check_rate_limit_at("api", 3, 60, mode, now).await.unwrap());
        }

        let observed: Vec<(bool, u64)> =
            decisions.iter().map(|d| (d.allowed, d.remaining)).collect();
        assert_eq!(observed, [(true, 2), (true, 1), (true, 0), (false, 0)]);
    }

    #[rstest]
    #[case::zero(0)]
    #[case::negative(-5)]
    #[tokio::test]
    async fn invalid_window_is_rejected_before_store_access(#[case] window_seconds: i64) {
        let store = CountingStore::new(MemoryStore::new());
        let limiter = RateLimiter::new(KeyValue::new(store, KvConfig::default()));

        let result = limiter.check_rate_limit("k", 10, window_seconds, WindowMode::Sliding).await;
        assert!(matches!(result, Err(CacheError::RateLimitConfig { field: "window_seconds", .. })));
        assert_eq!(limiter.kv.store().round_trips(), 0);
    }

    #[rstest]
    #[case::sliding(WindowMode::Sliding)]
    #[case::fixed(WindowMode::Fixed)]
    #[tokio::test]
    async fn zero_quota_always_denies(#[case] mode: WindowMode) {
        let limiter = limiter();
        let decision = limiter.check_rate_limit("k", 0, 60, mode).await.unwrap();
        assert_eq!(decision, RateLimitDecision { allowed: false, remaining: 0 });
    }

    #[rstest]
    #[case::just_inside(59, 2)]
    #[case::exactly_window(60, 1)]
    #[case::just_outside(61, 1)]
    #[tokio::test]
    async fn sliding_window_boundary(#[case] elapsed: u64, #[case] expected_count: u64) {
        let limiter = limiter();
        let start = 1_700_000_000;

        limiter.check_rate_limit_at("k", 10, 60, WindowMode::Sliding, at(start)).await.unwrap();
        let decision = limiter
            .check_rate_limit_at("k", 10, 60, WindowMode::Sliding, at(start + elapsed))
            .await
            .unwrap();

        assert_eq!(decision.remaining, 10 - expected_count);
    }

    #[tokio::test]
    async fn fixed_window_resets_in_next_bucket() {
        let limiter = limiter();
        // Buckets are aligned to multiples of the window
        let bucket_start = 60 * 30_000_000;
        let limiter = &limiter;
        let check = move |offset: u64| {
            limiter.check_rate_limit_at("k", 2, 60, WindowMode::Fixed, at(bucket_start + offset))
        };

        for _ in 0..2 {
            check(30).await.unwrap();
        }
        assert!(!check(59).await.unwrap().allowed);
        assert_eq!(check(60).await.unwrap(), RateLimitDecision { allowed: true, remaining: 1 });
    }

    #[tokio::test]
    async fn fixed_window_is_one_atomic_round_trip() {
        let store = CountingStore::new(MemoryStore::new());
        let limiter = RateLimiter::new(KeyValue::new(store, KvConfig::default()));
        for _ in 0..3 {
            limiter.check_rate_limit_at("k", 5, 60, WindowMode::Fixed, at(600)).await.unwrap();
        }

        let store = limiter.kv.store();
        assert_eq!(store.round_trips(), 3);
        assert_eq!(store.count("INCRBY"), 3);
        assert_eq!(store.count("EXPIRE NX"), 3);
        assert_eq!(store.count("EXPIRE"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_window_expiry_is_not_extended() {
        let limiter = limiter();
        limiter.check_rate_limit_at("k", 5, 60, WindowMode::Fixed, at(600)).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        limiter.check_rate_limit_at("k", 5, 60, WindowMode::Fixed, at(620)).await.unwrap();

        let ttl = limiter.kv.store().ttl("k:10").await.unwrap();
        assert_eq!(ttl, KeyTtl::Expires(Duration::from_secs(40)));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_bucket_gets_an_expiry() {
        let limiter = limiter();
        // A bucket left without expiry, e.g. written by an interrupted client
        limiter.kv.store().set("k:10", bytes::Bytes::from("3"), SetOptions::new()).await.unwrap();

        let decision =
            limiter.check_rate_limit_at("k", 5, 60, WindowMode::Fixed, at(600)).await.unwrap();
        assert_eq!(decision, RateLimitDecision { allowed: true, remaining: 1 });
        let ttl = limiter.kv.store().ttl("k:10").await.unwrap();
        assert_eq!(ttl, KeyTtl::Expires(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn keys_are_namespaced() {
        let config = KvConfig::builder().namespace("rl").build().unwrap();
        let kv = KeyValue::new(MemoryStore::new(), config);
        let limiter = RateLimiter::new(kv.clone());
        limiter.check_rate_limit_at("k", 5, 60, WindowMode::Sliding, at(100)).await.unwrap();
        limiter.check_rate_limit_at("k", 5, 60, WindowMode::Fixed, at(100)).await.unwrap();

        assert_eq!(kv.store().zcard("rl:k").await.unwrap(), 1);
        assert_eq!(kv.store().get("rl:k:1").await.unwrap(), Some(bytes::Bytes::from("1")));
    }
}
