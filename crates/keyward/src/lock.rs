//! Lease locks guarding a single computation.
//!
//! A lock is a key `"{cache_key}:lock"` written with `SET NX EX lease`
//! holding a random holder identity. The store expires it after the lease,
//! so a crashed holder never blocks other callers for longer than that.
//! Release deletes the key only while it still holds the same identity: a
//! holder whose lease ran out cannot delete a lock taken over by someone
//! else.
//!
//! Losing a lock mid-computation only costs a duplicate computation.

use std::time::Duration;

use bytes::Bytes;
use fail::fail_point;
use tracing::debug;

use crate::{
    error::StoreResult,
    store::{KvStore, SetOptions},
};

/// Suffix appended to a cache key to form its lock key.
pub(crate) const LOCK_SUFFIX: &str = ":lock";

/// Returns the lock key guarding `cache_key`.
pub(crate) fn lock_key(cache_key: &str) -> String {
    format!("{cache_key}{LOCK_SUFFIX}")
}

/// Result of a lock attempt.
#[derive(Debug)]
pub(crate) enum LockOutcome {
    /// This caller holds the lock.
    Acquired(LockToken),
    /// Another caller holds the lock.
    Contended,
}

/// Proof of holding a lock.
#[derive(Debug)]
pub(crate) struct LockToken {
    key: String,
    holder: Bytes,
    lease: Duration,
}

impl LockToken {
    /// Tries to take the lock guarding `cache_key` for `lease`.
    pub(crate) async fn acquire<S: KvStore + ?Sized>(
        store: &S,
        cache_key: &str,
        lease: Duration,
    ) -> StoreResult<LockOutcome> {
        let key = lock_key(cache_key);
        let holder = Bytes::from(holder_identity());
        let options = SetOptions::new().ttl(lease).if_absent();
        let acquired = store.set(&key, holder.clone(), options).await?;

        if acquired {
            debug!(lock_key = %key, lease = ?lease, "Lock acquired");
            Ok(LockOutcome::Acquired(Self { key, holder, lease }))
        } else {
            debug!(lock_key = %key, "Lock held by another caller");
            Ok(LockOutcome::Contended)
        }
    }

    /// Releases the lock if this token still owns it.
    ///
    /// Returns `false` when the lease had already expired or the lock was
    /// taken over.
    pub(crate) async fn release<S: KvStore + ?Sized>(self, store: &S) -> StoreResult<bool> {
        fail_point!("lock-release", |_| {
            Err(crate::error::StoreError::connection("injected lock release failure"))
        });

        let released = store.compare_and_delete(&self.key, self.holder).await?;
        if !released {
            debug!(lock_key = %self.key, lease = ?self.lease, "Lock lost before release");
        }
        Ok(released)
    }

    /// The lock key.
    pub(crate) fn key(&self) -> &str {
        &self.key
    }
}

fn holder_identity() -> String {
    let (high, low) = (rand::random::<u64>(), rand::random::<u64>());
    format!("{}-{high:016x}{low:016x}", std::process::id())
}
