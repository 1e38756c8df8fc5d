//! Memoizing cache with thundering-herd suppression.
//!
//! [`Memoized`] wraps an async function so repeated calls with the same
//! arguments are served from the store. It is built once per function and
//! carries the invalidation methods:
//!
//! ```
//! use std::time::Duration;
//! use keyward::{KeyValue, KvConfig, MemoizeOptions, store::MemoryStore};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let kv = KeyValue::new(MemoryStore::new(), KvConfig::default());
//! let square = kv.memoize(
//!     "square",
//!     MemoizeOptions::new().ttl(Duration::from_secs(60)),
//!     |(n,): (i64,)| async move { Ok::<_, std::io::Error>(n * n) },
//! );
//!
//! assert_eq!(square.call((7,)).await.unwrap(), 49);
//! assert_eq!(square.call((7,)).await.unwrap(), 49);
//! assert_eq!(square.stats().computations, 1);
//!
//! assert_eq!(square.invalidate(&(7,)).await.unwrap(), 1);
//! # });
//! ```
//!
//! # Call algorithm
//!
//! 1. Derive the cache key from the function name and arguments (see [`cache_key`]).
//! 2. Read it. A hit returns without calling the function.
//! 3. On a miss without herd protection, call the function and store the result unless the skip
//!    predicate matches.
//! 4. On a miss with herd protection, take the lease lock `{key}:lock`. The holder computes,
//!    stores and releases. Other callers poll the key (with the configured backoff) until a value
//!    appears, the lock disappears without a value, or the poll timeout elapses; in the last two
//!    cases they call the function directly and do not store the result.
//!
//! # Degradation
//!
//! The cache is never required for a call to succeed. Any failure of the
//! cache itself (unreachable store, corrupt entry, unencodable result) is
//! logged at `warn` and the function is called directly; its result is
//! returned uncached. Errors returned by the wrapped function propagate
//! unchanged and are never cached.
//!
//! [`cache_key`]: crate::cache_key

use std::{future::Future, marker::PhantomData, sync::Arc, time::Duration};

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::{
    cache_key::{self, CacheArgs},
    codec::{self, Record},
    config::PollBackoff,
    error::{CacheError, CacheResult, StoreError},
    facade::KeyValue,
    lock::{LockOutcome, LockToken, lock_key},
    metrics::{MemoStats, MemoStatsSnapshot},
    store::{Command, KvStore, Pipeline, SetOptions},
};

/// Predicate deciding that a result must not be cached.
pub type SkipPredicate<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// Per-function memoization settings.
pub struct MemoizeOptions<R> {
    ttl: Option<Duration>,
    key_prefix: Option<String>,
    namespace: Option<String>,
    skip_cache_if: Option<SkipPredicate<R>>,
    thundering_herd_protection: bool,
}

impl<R> Default for MemoizeOptions<R> {
    fn default() -> Self {
        Self {
            ttl: None,
            key_prefix: None,
            namespace: None,
            skip_cache_if: None,
            thundering_herd_protection: false,
        }
    }
}

impl<R> Clone for MemoizeOptions<R> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            key_prefix: self.key_prefix.clone(),
            namespace: self.namespace.clone(),
            skip_cache_if: self.skip_cache_if.clone(),
            thundering_herd_protection: self.thundering_herd_protection,
        }
    }
}

impl<R> std::fmt::Debug for MemoizeOptions<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoizeOptions")
            .field("ttl", &self.ttl)
            .field("key_prefix", &self.key_prefix)
            .field("namespace", &self.namespace)
            .field("skip_cache_if", &self.skip_cache_if.is_some())
            .field("thundering_herd_protection", &self.thundering_herd_protection)
            .finish()
    }
}

impl<R> MemoizeOptions<R> {
    /// No expiry, no prefix, configured namespace, herd protection off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached results expire after `ttl`. A zero `ttl` means no expiry.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl).filter(|ttl| !ttl.is_zero());
        self
    }

    /// Extra segment placed before the function name in every key.
    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Resolve keys under `namespace` instead of the configured one.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Results for which `predicate` returns `true` are returned but not
    /// stored.
    #[must_use]
    pub fn skip_cache_if(mut self, predicate: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
        self.skip_cache_if = Some(Arc::new(predicate));
        self
    }

    /// Let only one concurrent caller compute a missing value.
    #[must_use]
    pub fn thundering_herd_protection(mut self, enabled: bool) -> Self {
        self.thundering_herd_protection = enabled;
        self
    }

    fn should_skip(&self, result: &R) -> bool {
        self.skip_cache_if.as_ref().is_some_and(|predicate| predicate(result))
    }
}

/// What a cache lookup found.
enum Lookup<R> {
    Hit(R),
    Miss,
    /// The cache failed; call the function directly.
    Bypass,
}

/// What a contended caller observed while waiting.
enum Wait<R> {
    Value(R),
    LockReleased,
    TimedOut,
    Failed,
}

/// An async function wrapped with a cache.
///
/// `A` is the argument type, converted into a cache key with
/// [`CacheArgs`]; `R` the result type, stored with the [`codec`].
pub struct Memoized<S, A, R, F> {
    kv: KeyValue<S>,
    function: String,
    options: MemoizeOptions<R>,
    f: F,
    stats: MemoStats,
    _args: PhantomData<fn(A)>,
}

impl<S, A, R, F> std::fmt::Debug for Memoized<S, A, R, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoized")
            .field("function", &self.function)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<S: KvStore> KeyValue<S> {
    /// Wraps `f` in a [`Memoized`] cache named `function`.
    ///
    /// `function` is the function identity used in cache keys; two wrappers
    /// with the same name, prefix and namespace share entries.
    pub fn memoize<A, R, F, Fut, E>(
        &self,
        function: impl Into<String>,
        options: MemoizeOptions<R>,
        f: F,
    ) -> Memoized<S, A, R, F>
    where
        A: CacheArgs,
        R: Record,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        Memoized::new(self.clone(), function, options, f)
    }
}

impl<S, A, R, F, Fut, E> Memoized<S, A, R, F>
where
    S: KvStore,
    A: CacheArgs,
    R: Record,
    F: Fn(A) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    /// Wraps `f`. See [`KeyValue::memoize`].
    pub fn new(
        kv: KeyValue<S>,
        function: impl Into<String>,
        options: MemoizeOptions<R>,
        f: F,
    ) -> Self {
        let kv = match options.namespace.as_deref() {
            Some(namespace) => kv.scoped(namespace),
            None => kv,
        };
        Self {
            kv,
            function: function.into(),
            options,
            f,
            stats: MemoStats::new(),
            _args: PhantomData,
        }
    }

    /// The function identity used in cache keys.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Physical cache key for `args`.
    #[must_use]
    pub fn cache_key(&self, args: &A) -> String {
        cache_key::derive_key(
            self.kv.keyspace(),
            self.options.key_prefix.as_deref(),
            &self.function,
            &args.to_call_args(),
        )
    }

    /// Key shared by every cached call of this function.
    fn base_key(&self) -> String {
        cache_key::base_key(self.kv.keyspace(), self.options.key_prefix.as_deref(), &self.function)
    }

    /// Calls the function through the cache.
    ///
    /// # Errors
    ///
    /// Returns exactly the errors of the wrapped function. Cache failures
    /// are never surfaced.
    #[tracing::instrument(name = "memoized_call", skip_all, fields(function = %self.function))]
    pub async fn call(&self, args: A) -> Result<R, E> {
        let key = self.cache_key(&args);

        match self.lookup(&key).await {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Bypass => return self.compute_uncached(args).await,
            Lookup::Miss => {},
        }

        if !self.options.thundering_herd_protection {
            return self.compute_and_store(&key, args).await;
        }

        match LockToken::acquire(self.kv.store(), &key, self.kv.config().lock_lease()).await {
            Ok(LockOutcome::Acquired(token)) => {
                let result = self.compute_and_store(&key, args).await;
                let lock_key = token.key().to_owned();
                if let Err(e) = token.release(self.kv.store()).await {
                    warn!(%lock_key, error = %e, "Failed to release cache lock, lease will expire");
                }
                result
            },
            Ok(LockOutcome::Contended) => {
                self.stats.record_lock_wait();
                match self.wait_for_value(&key).await {
                    Wait::Value(value) => {
                        self.stats.record_hit();
                        Ok(value)
                    },
                    Wait::LockReleased | Wait::Failed => self.compute_uncached(args).await,
                    Wait::TimedOut => {
                        self.stats.record_lock_wait_timeout();
                        warn!(%key, "Timed out waiting for cache fill, computing uncached");
                        self.compute_uncached(args).await
                    },
                }
            },
            Err(e) => {
                self.degrade(&key, &CacheError::from(e));
                self.compute_uncached(args).await
            },
        }
    }

    /// Deletes the cached result for `args`, returning the number of keys
    /// removed (0 or 1).
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails.
    #[tracing::instrument(
        name = "memoized_invalidate",
        skip_all,
        fields(function = %self.function)
    )]
    pub async fn invalidate(&self, args: &A) -> CacheResult<u64> {
        let key = self.cache_key(args);
        let deleted = self.kv.delete_resolved(std::slice::from_ref(&key)).await?;
        info!(%key, deleted, "Invalidated cache entry");
        Ok(deleted)
    }

    /// Deletes every cached result of this function, returning the number
    /// of keys removed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the scan or delete fails.
    #[tracing::instrument(
        name = "memoized_invalidate_all",
        skip_all,
        fields(function = %self.function)
    )]
    pub async fn invalidate_all(&self) -> CacheResult<u64> {
        let base = self.base_key();
        let nested = format!("{base}:");
        let keys: Vec<String> = self
            .kv
            .scan_resolved(&base)
            .await?
            .into_iter()
            .filter(|key| *key == base || key.starts_with(&nested))
            .collect();

        let deleted = self.kv.delete_resolved(&keys).await?;
        info!(prefix = %base, deleted, "Invalidated all cache entries");
        Ok(deleted)
    }

    /// Counters describing how calls were served.
    #[must_use]
    pub fn stats(&self) -> MemoStatsSnapshot {
        self.stats.snapshot()
    }

    // ── Internals ──────────────────────────────────────────────────────

    async fn lookup(&self, key: &str) -> Lookup<R> {
        let bytes = match self.kv.store().get(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.degrade(key, &CacheError::from(e));
                return Lookup::Bypass;
            },
        };
        match codec::decode_opt::<R>(key, bytes.as_deref()) {
            Ok(Some(value)) => {
                self.stats.record_hit();
                debug!(%key, "Cache hit");
                Lookup::Hit(value)
            },
            Ok(None) => {
                self.stats.record_miss();
                debug!(%key, "Cache miss");
                Lookup::Miss
            },
            Err(e) => {
                self.degrade(key, &e);
                Lookup::Bypass
            },
        }
    }

    /// Polls `key` until a value appears, the lock goes away or the poll
    /// timeout elapses. Each poll reads the value and the lock in one atomic
    /// round trip.
    async fn wait_for_value(&self, key: &str) -> Wait<R> {
        let config = self.kv.config();
        let deadline = Instant::now() + config.poll_timeout();
        let backoff = config.poll_backoff();
        let mut interval = config.poll_interval();
        let lock = lock_key(key);

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Wait::TimedOut;
            }
            sleep(PollBackoff::jittered(interval).min(deadline - now)).await;
            interval = backoff.next_interval(interval);

            let mut pipeline = Pipeline::atomic();
            pipeline
                .push(Command::Get { key: key.to_owned() })
                .push(Command::Exists { keys: vec![lock.clone()] });

            match self.poll_once(key, pipeline).await {
                Ok((Some(value), _)) => return Wait::Value(value),
                Ok((None, false)) => {
                    debug!(%key, "Lock released without a cached value");
                    return Wait::LockReleased;
                },
                Ok((None, true)) => {},
                Err(e) => {
                    self.degrade(key, &e);
                    return Wait::Failed;
                },
            }
        }
    }

    async fn poll_once(&self, key: &str, pipeline: Pipeline) -> CacheResult<(Option<R>, bool)> {
        let mut replies = self.kv.store().execute(pipeline).await?.into_iter();
        let (Some(value), Some(lock)) = (replies.next(), replies.next()) else {
            return Err(StoreError::unexpected_reply("GET+EXISTS", "missing replies").into());
        };
        let bytes = value?.into_value("GET")?;
        let lock_held = lock?.into_int("EXISTS")? > 0;
        Ok((codec::decode_opt(key, bytes.as_deref())?, lock_held))
    }

    async fn compute_and_store(&self, key: &str, args: A) -> Result<R, E> {
        self.stats.record_computation();
        let result = (self.f)(args).await?;

        if self.options.should_skip(&result) {
            self.stats.record_skipped_write();
            debug!(%key, "Skip predicate matched, result not cached");
            return Ok(result);
        }

        let written = match codec::encode(&result) {
            Ok(bytes) => self
                .kv
                .store()
                .set(key, bytes, SetOptions::new().maybe_ttl(self.options.ttl))
                .await
                .map_err(CacheError::from),
            Err(e) => Err(e),
        };
        match written {
            Ok(_) => {
                debug!(%key, ttl = ?self.options.ttl, "Cached result");
            },
            Err(e) => self.degrade(key, &e),
        }
        Ok(result)
    }

    async fn compute_uncached(&self, args: A) -> Result<R, E> {
        self.stats.record_computation();
        (self.f)(args).await
    }

    fn degrade(&self, key: &str, error: &CacheError) {
        self.stats.record_degraded();
        warn!(%key, function = %self.function, error = %error, "Cache unavailable, bypassing");
    }
}
