//! Memoizer counters.
//!
//! Each [`Memoized`](crate::Memoized) owns a [`MemoStats`] recording how its
//! calls were served. Counters are independent and use `Ordering::Relaxed`;
//! a [`snapshot`](MemoStats::snapshot) may observe them at slightly
//! different instants, which is fine for telemetry.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one memoized function.
#[derive(Debug, Default)]
pub struct MemoStats {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    lock_waits: AtomicU64,
    lock_wait_timeouts: AtomicU64,
    degraded: AtomicU64,
    skipped_writes: AtomicU64,
}

/// Point-in-time copy of [`MemoStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStatsSnapshot {
    /// Calls served from the cache, including values found while waiting on a lock.
    pub hits: u64,
    /// Calls that found no cached value.
    pub misses: u64,
    /// Invocations of the wrapped function.
    pub computations: u64,
    /// Calls that waited on another caller's lock.
    pub lock_waits: u64,
    /// Waits that ran out of time and computed uncached.
    pub lock_wait_timeouts: u64,
    /// Cache operations that failed and were bypassed.
    pub degraded: u64,
    /// Results not stored because the skip predicate matched.
    pub skipped_writes: u64,
}

impl MemoStatsSnapshot {
    /// Fraction of lookups served from the cache, `0.0` without lookups.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 { 0.0 } else { self.hits as f64 / lookups as f64 }
    }
}

impl MemoStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_computation(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_wait(&self) {
        self.lock_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_wait_timeout(&self) {
        self.lock_wait_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped_write(&self) {
        self.skipped_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> MemoStatsSnapshot {
        MemoStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            lock_waits: self.lock_waits.load(Ordering::Relaxed),
            lock_wait_timeouts: self.lock_wait_timeouts.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            skipped_writes: self.skipped_writes.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.computations,
            &self.lock_waits,
            &self.lock_wait_timeouts,
            &self.degraded,
            &self.skipped_writes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_and_reset() {
        let stats = MemoStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_degraded();

        let snap = stats.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.degraded, 1);
        assert!((snap.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);

        stats.reset();
        assert_eq!(stats.snapshot(), MemoStatsSnapshot::default());
        assert_eq!(stats.snapshot().hit_rate(), 0.0);
    }
}
