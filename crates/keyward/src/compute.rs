//! Read-through computation guarded by a lease lock.
//!
//! [`KeyValue::get_or_compute`] reads a key and, on a miss, lets exactly one
//! concurrent caller compute the value. The winner of `SET key:lock NX EX`
//! computes, writes the value and releases the lock. Everyone else re-reads
//! at the poll interval and takes part in the next lock round if the lock
//! disappears without a value. Waiting callers never compute while the lock
//! is held; after the poll timeout they fail with
//! [`CacheError::LockTimeout`] and may retry.
//!
//! Unlike [`Memoized`](crate::Memoized) there is no fallback: store errors
//! propagate.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::{
    codec::{self, Record},
    config::{MIN_LOCK_LEASE, PollBackoff},
    error::{CacheError, CacheResult},
    facade::KeyValue,
    lock::{LockOutcome, LockToken},
    store::{KvStore, SetOptions},
};

impl<S: KvStore> KeyValue<S> {
    /// Returns the value at `key`, computing and storing it on a miss.
    ///
    /// The value is written with `ttl` if given; a zero `ttl` means no
    /// expiry. The lock lease is `ttl` when given, otherwise the configured
    /// lock lease, and never shorter than [`MIN_LOCK_LEASE`].
    ///
    /// # Errors
    ///
    /// - [`CacheError::Compute`] if `compute` fails; nothing is stored.
    /// - [`CacheError::LockTimeout`] if another caller held the lock for
    ///   longer than the poll timeout.
    /// - Corrupt-data and store errors as for [`get`](Self::get).
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use keyward::{KeyValue, KvConfig, store::MemoryStore};
    ///
    /// # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    /// # rt.block_on(async {
    /// let kv = KeyValue::new(MemoryStore::new(), KvConfig::default());
    ///
    /// let report: u64 = kv
    ///     .get_or_compute(
    ///         "report",
    ///         || async { Ok::<_, std::io::Error>(42) },
    ///         Some(Duration::from_secs(60)),
    ///     )
    ///     .await
    ///     .unwrap();
    /// assert_eq!(report, 42);
    ///
    /// // Served from the store, the closure is not called
    /// let again: u64 = kv
    ///     .get_or_compute("report", || async { Err(std::io::Error::other("not called")) }, None)
    ///     .await
    ///     .unwrap();
    /// assert_eq!(again, 42);
    /// # });
    /// ```
    #[tracing::instrument(
        name = "kv_get_or_compute",
        skip(self, compute),
        fields(schema = T::SCHEMA)
    )]
    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        key: &str,
        compute: F,
        ttl: Option<Duration>,
    ) -> CacheResult<T>
    where
        T: Record,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let physical = self.resolve(key);
        let ttl = ttl.filter(|ttl| !ttl.is_zero());
        let lease = ttl.unwrap_or_else(|| self.config().lock_lease()).max(MIN_LOCK_LEASE);
        let backoff = self.config().poll_backoff();
        let started = Instant::now();
        let deadline = started + self.config().poll_timeout();
        let mut interval = self.config().poll_interval();

        let token = loop {
            if let Some(bytes) = self.store().get(&physical).await? {
                return codec::decode(&physical, &bytes);
            }

            match LockToken::acquire(self.store(), &physical, lease).await? {
                LockOutcome::Acquired(token) => break token,
                LockOutcome::Contended => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(CacheError::LockTimeout {
                            key: key.to_owned(),
                            waited: now - started,
                        });
                    }
                    sleep(PollBackoff::jittered(interval).min(deadline - now)).await;
                    interval = backoff.next_interval(interval);
                },
            }
        };

        let outcome = async {
            let value = compute()
                .await
                .map_err(|e| CacheError::Compute { key: key.to_owned(), source: Arc::new(e) })?;
            let bytes = codec::encode(&value)?;
            self.store().set(&physical, bytes, SetOptions::new().maybe_ttl(ttl)).await?;
            debug!(key = %physical, "Computed and stored value");
            Ok::<T, CacheError>(value)
        }
        .await;

        let lock_key = token.key().to_owned();
        if let Err(e) = token.release(self.store()).await {
            warn!(%lock_key, error = %e, "Failed to release compute lock");
        }
        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::store::KeyTtl;
    use crate::{
        KvConfig, assert_store_unavailable, store::MemoryStore, testutil::UnavailableStore,
    };

    fn kv() -> KeyValue<MemoryStore> {
        KeyValue::new(MemoryStore::new(), KvConfig::default())
    }

    #[tokio::test]
    async fn compute_error_releases_lock() {
        let kv = kv();
        let result: CacheResult<u64> = kv
            .get_or_compute("k", || async { Err(std::io::Error::other("boom")) }, None)
            .await;
        assert!(matches!(result, Err(CacheError::Compute { ref key, .. }) if key == "k"));
        assert_eq!(kv.store().get("k:lock").await.unwrap(), None);
        assert_eq!(kv.store().get("k").await.unwrap(), None);

        let value: u64 =
            kv.get_or_compute("k", || async { Ok::<_, std::io::Error>(5) }, None).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_times_out_while_lock_is_held() {
        let kv = kv();
        kv.store()
            .set("k:lock", Bytes::from("someone"), SetOptions::new().ttl(Duration::from_secs(30)))
            .await
            .unwrap();

        let calls = AtomicUsize::new(0);
        let result: CacheResult<u64> = kv
            .get_or_compute(
                "k",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(1)
                },
                None,
            )
            .await;

        assert!(matches!(result, Err(CacheError::LockTimeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_takes_over_after_lease_expiry() {
        let kv = KeyValue::new(
            MemoryStore::new(),
            KvConfig::builder().poll_timeout(Duration::from_secs(10)).build().unwrap(),
        );
        kv.store()
            .set("k:lock", Bytes::from("crashed"), SetOptions::new().ttl(Duration::from_secs(2)))
            .await
            .unwrap();

        let value: u64 =
            kv.get_or_compute("k", || async { Ok::<_, std::io::Error>(9) }, None).await.unwrap();
        assert_eq!(value, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn value_is_written_with_ttl() {
        let kv = kv();
        let _: u64 = kv
            .get_or_compute(
                "k",
                || async { Ok::<_, std::io::Error>(1) },
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(kv.get::<u64>("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_stores_without_expiry() {
        let kv = kv();
        let _: u64 = kv
            .get_or_compute("k", || async { Ok::<_, std::io::Error>(1) }, Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(kv.ttl("k").await.unwrap(), KeyTtl::Persistent);
        assert_eq!(kv.get::<u64>("k").await.unwrap(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_ttl_keeps_minimum_lock_lease() {
        let kv = kv();
        let lease_seen = parking_lot::Mutex::new(None);
        let _: u64 = kv
            .get_or_compute(
                "k",
                || async {
                    *lease_seen.lock() = Some(kv.ttl("k:lock").await.unwrap());
                    Ok::<_, std::io::Error>(1)
                },
                Some(Duration::from_millis(300)),
            )
            .await
            .unwrap();
        assert_eq!(*lease_seen.lock(), Some(KeyTtl::Expires(MIN_LOCK_LEASE)));
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        let kv = KeyValue::new(UnavailableStore::new(), KvConfig::default());
        let result: CacheResult<u64> =
            kv.get_or_compute("k", || async { Ok::<_, std::io::Error>(1) }, None).await;
        assert_store_unavailable!(result);
    }
}
