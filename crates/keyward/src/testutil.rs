//! Shared test utilities.
//!
//! Stores with injected behavior, key helpers and assertion macros for
//! [`CacheResult`] values. Feature-gated behind `testutil` so none of it
//! leaks into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! keyward = { path = "../keyward", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use keyward::testutil::{CountingStore, FaultyStore, UnavailableStore, make_key};
//! ```

use std::{
    collections::{HashMap, HashSet},
    io,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    error::{CacheError, CacheResult, StoreError, StoreResult},
    store::{KvStore, MemoryStore, Pipeline, Reply, SetOptions},
};

/// Create a deterministic test key from a prefix and index.
///
/// Produces keys like `"prefix:000042"`.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> String {
    format!("{prefix}:{idx:06}")
}

/// Create a [`MemoryStore`] holding `count` raw values at physical keys
/// `"{prefix}:{idx:06}"`.
///
/// # Panics
///
/// Panics if any write fails (should not happen with `MemoryStore`).
pub async fn populated_store(prefix: &str, count: usize) -> MemoryStore {
    let store = MemoryStore::new();
    for i in 0..count {
        store
            .set(&make_key(prefix, i), Bytes::from(i.to_string()), SetOptions::new())
            .await
            .unwrap_or_else(|e| panic!("populate set failed: {e}"));
    }
    store
}

// ── UnavailableStore ────────────────────────────────────────────────────

/// A store that is never reachable: every round trip fails with
/// [`StoreError::Connection`] caused by a refused connection.
#[derive(Debug, Default)]
pub struct UnavailableStore {
    attempts: AtomicUsize,
}

impl UnavailableStore {
    /// Creates the store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of round trips attempted against this store.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KvStore for UnavailableStore {
    async fn execute(&self, _pipeline: Pipeline) -> StoreResult<Vec<StoreResult<Reply>>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(refused("store unreachable"))
    }
}

// ── CountingStore ───────────────────────────────────────────────────────

/// Wraps a store and counts round trips and commands by name.
#[derive(Debug)]
pub struct CountingStore<S> {
    inner: S,
    round_trips: AtomicUsize,
    commands: Mutex<HashMap<&'static str, usize>>,
}

impl<S> CountingStore<S> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self { inner, round_trips: AtomicUsize::new(0), commands: Mutex::new(HashMap::new()) }
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of `execute` calls so far.
    #[must_use]
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    /// Number of commands named `name` (e.g. `"GET"`) sent so far.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.commands.lock().get(name).copied().unwrap_or(0)
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        self.round_trips.store(0, Ordering::SeqCst);
        self.commands.lock().clear();
    }
}

#[async_trait]
impl<S: KvStore> KvStore for CountingStore<S> {
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<Vec<StoreResult<Reply>>> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        {
            let mut commands = self.commands.lock();
            for command in pipeline.commands() {
                *commands.entry(command.name()).or_insert(0) += 1;
            }
        }
        self.inner.execute(pipeline).await
    }
}

// ── FaultyStore ─────────────────────────────────────────────────────────

/// Wraps a store and injects connection failures.
///
/// The store can be taken offline as a whole, or made to fail every round
/// trip that contains one of the configured command names.
#[derive(Debug)]
pub struct FaultyStore<S> {
    inner: S,
    offline: AtomicBool,
    failing: Mutex<HashSet<&'static str>>,
}

impl<S> FaultyStore<S> {
    /// Wraps `inner`, initially healthy.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self { inner, offline: AtomicBool::new(false), failing: Mutex::new(HashSet::new()) }
    }

    /// Fails every round trip containing a command named `name`.
    #[must_use]
    pub fn fail_on(self, name: &'static str) -> Self {
        self.failing.lock().insert(name);
        self
    }

    /// Takes the store offline or brings it back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: KvStore> KvStore for FaultyStore<S> {
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<Vec<StoreResult<Reply>>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(refused("store offline"));
        }
        let failing = {
            let failing = self.failing.lock();
            pipeline
                .commands()
                .iter()
                .map(|command| command.name())
                .find(|name| failing.contains(name))
        };
        if let Some(name) = failing {
            return Err(refused(&format!("injected failure on {name}")));
        }
        self.inner.execute(pipeline).await
    }
}

fn refused(message: &str) -> StoreError {
    let cause = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
    StoreError::connection_with_source(message, cause)
}

// ── Assertions ──────────────────────────────────────────────────────────

/// Assert that a [`CacheResult`] is a [`CacheError::StoreUnavailable`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use keyward::assert_store_unavailable;
/// use keyward::error::{CacheError, CacheResult, StoreError};
///
/// let result: CacheResult<()> = Err(StoreError::timeout().into());
/// assert_store_unavailable!(result);
/// ```
#[macro_export]
macro_rules! assert_store_unavailable {
    ($result:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err($crate::error::CacheError::StoreUnavailable { .. })),
            "expected CacheError::StoreUnavailable, got: {:?}",
            result,
        );
    }};
}

/// Assert that a [`CacheResult`] reports corrupt stored data
/// ([`CacheError::Decode`] or [`CacheError::SchemaValidation`]).
#[macro_export]
macro_rules! assert_corrupt_data {
    ($result:expr) => {{
        let result = &$result;
        assert!(
            matches!(
                result,
                Err($crate::error::CacheError::Decode { .. }
                    | $crate::error::CacheError::SchemaValidation { .. })
            ),
            "expected corrupt data error, got: {:?}",
            result,
        );
    }};
}

/// Assert that a [`CacheResult`] is `Ok`, returning the inner value.
#[macro_export]
macro_rules! assert_cache_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got CacheError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got CacheError: {e:?}", $msg),
        }
    };
}

/// Returns `true` if the result is a [`CacheError::StoreUnavailable`].
pub fn is_store_unavailable<T>(result: &CacheResult<T>) -> bool {
    matches!(result, Err(CacheError::StoreUnavailable { .. }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_make_key_ordering() {
        assert_eq!(make_key("k", 42), "k:000042");
        assert!(make_key("k", 9) < make_key("k", 10));
    }

    #[tokio::test]
    async fn test_populated_store() {
        let store = populated_store("item", 3).await;
        assert_eq!(store.get("item:000002").await.unwrap(), Some(Bytes::from("2")));
    }

    #[tokio::test]
    async fn test_unavailable_store_counts_attempts() {
        let store = UnavailableStore::new();
        assert!(store.get("k").await.unwrap_err().is_unavailable());
        assert!(store.ping().await.is_err());
        assert_eq!(store.attempts(), 2);
    }

    #[tokio::test]
    async fn test_counting_store() {
        let store = CountingStore::new(MemoryStore::new());
        store.set("a", Bytes::from("1"), SetOptions::new()).await.unwrap();
        store.get("a").await.unwrap();
        store.get("b").await.unwrap();

        assert_eq!(store.round_trips(), 3);
        assert_eq!(store.count("GET"), 2);
        assert_eq!(store.count("SET"), 1);

        store.reset();
        assert_eq!(store.count("GET"), 0);
    }

    #[tokio::test]
    async fn test_faulty_store() {
        let store = FaultyStore::new(MemoryStore::new()).fail_on("SET");
        assert!(store.set("a", Bytes::from("1"), SetOptions::new()).await.is_err());
        assert_eq!(store.get("a").await.unwrap(), None);

        store.set_offline(true);
        assert!(store.get("a").await.unwrap_err().is_unavailable());
    }

    #[test]
    fn test_assert_macros() {
        let result: CacheResult<()> = Err(StoreError::connection("down").into());
        assert_store_unavailable!(result);
        assert!(is_store_unavailable(&result));

        let result: CacheResult<()> = Err(CacheError::schema_validation("k", "user", "bad"));
        assert_corrupt_data!(result);

        let result: CacheResult<i32> = Ok(7);
        assert_eq!(assert_cache_ok!(result), 7);
    }
}
