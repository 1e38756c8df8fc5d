//! Multi-key reads and writes.
//!
//! [`BatchCoordinator`] turns many single-key operations into as few round
//! trips as possible. Reads are split into chunks of at most
//! [`BatchConfig::max_batch_size`] keys, one `MGET` per chunk. Writes send
//! `MSET` and, when a TTL is requested, one `EXPIRE` per key in the same
//! atomic pipeline, since the store has no multi-key write with expiry.
//!
//! # Partial failures
//!
//! Batch reads degrade per entry: absent keys are omitted from the result,
//! and entries that fail to decode are logged at `warn` and skipped. A
//! store failure still fails the whole call.
//!
//! ```
//! use std::collections::HashMap;
//! use keyward::{
//!     batch::{BatchConfig, BatchCoordinator},
//!     namespace::Keyspace,
//!     store::MemoryStore,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemoryStore::new();
//! let config = BatchConfig::default();
//! let keyspace = Keyspace::new(Some("app".into()));
//! let batch = BatchCoordinator::new(&store, &config);
//!
//! let entries = vec![("a".to_string(), 1_u64), ("b".to_string(), 2)];
//! batch.multi_set(&keyspace, &entries, None).await.unwrap();
//!
//! let found: HashMap<String, u64> =
//!     batch.multi_get(&keyspace, &["a", "b", "missing"]).await.unwrap();
//! assert_eq!(found.len(), 2);
//! # });
//! ```

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    codec::{self, Record},
    error::{CacheError, CacheResult, ConfigError},
    namespace::Keyspace,
    store::{KvStore, Pipeline, Reply},
};

/// Default maximum number of keys per round trip.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Configuration for batch operations.
///
/// # Validation
///
/// - `max_batch_size` must be `>= 1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Maximum number of keys per round trip.
    #[serde(default = "default_max_batch_size")]
    pub(crate) max_batch_size: usize,
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_batch_size: DEFAULT_MAX_BATCH_SIZE }
    }
}

#[bon::bon]
impl BatchConfig {
    /// Creates a new batch configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `max_batch_size` is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_MAX_BATCH_SIZE)] max_batch_size: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self { max_batch_size };
        config.validate()?;
        Ok(config)
    }

    /// Checks the field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `max_batch_size` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_batch_size",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Returns the maximum number of keys per round trip.
    #[must_use]
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn chunk_size(&self) -> usize {
        self.max_batch_size.max(1)
    }
}

/// Counters describing one batch call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Keys (or entries) the caller asked for.
    pub requested: usize,
    /// Entries returned or written.
    pub returned: usize,
    /// Entries present in the store but skipped because they failed to decode.
    pub skipped: usize,
    /// Store round trips issued.
    pub round_trips: usize,
}

/// Groups single-key operations into batched round trips.
#[derive(Debug)]
pub struct BatchCoordinator<'a, S: ?Sized> {
    store: &'a S,
    config: &'a BatchConfig,
}

impl<'a, S: KvStore + ?Sized> BatchCoordinator<'a, S> {
    /// Creates a coordinator over `store`.
    #[must_use]
    pub fn new(store: &'a S, config: &'a BatchConfig) -> Self {
        Self { store, config }
    }

    /// Reads many keys, keyed by logical key in the result.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StoreUnavailable`] or [`CacheError::Store`] if a
    /// round trip fails. Decode failures never fail the call.
    pub async fn multi_get<T: Record, K: AsRef<str>>(
        &self,
        keyspace: &Keyspace,
        keys: &[K],
    ) -> CacheResult<HashMap<String, T>> {
        self.multi_get_with_stats(keyspace, keys).await.map(|(found, _)| found)
    }

    /// Like [`multi_get`](Self::multi_get), also returning [`BatchStats`].
    ///
    /// # Errors
    ///
    /// Same as [`multi_get`](Self::multi_get).
    pub async fn multi_get_with_stats<T: Record, K: AsRef<str>>(
        &self,
        keyspace: &Keyspace,
        keys: &[K],
    ) -> CacheResult<(HashMap<String, T>, BatchStats)> {
        let mut stats = BatchStats { requested: keys.len(), ..BatchStats::default() };
        let mut found = HashMap::with_capacity(keys.len());

        for chunk in keys.chunks(self.config.chunk_size()) {
            let physical = keyspace.resolve_all(chunk);
            let values = self.store.mget(&physical).await?;
            stats.round_trips += 1;

            for ((logical, physical), value) in chunk.iter().zip(&physical).zip(values) {
                let Some(bytes) = value else { continue };
                match decode_or_skip::<T>(physical, &bytes) {
                    Some(record) => {
                        found.insert(logical.as_ref().to_owned(), record);
                    },
                    None => stats.skipped += 1,
                }
            }
        }

        stats.returned = found.len();
        debug!(
            requested = stats.requested,
            returned = stats.returned,
            skipped = stats.skipped,
            round_trips = stats.round_trips,
            "Batch read complete"
        );
        Ok((found, stats))
    }

    /// Writes many entries. With a `ttl`, every key expires after it.
    ///
    /// Each chunk is one atomic pipeline: `MSET` followed by one `EXPIRE`
    /// per key, so no key of the chunk is ever visible without its expiry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Encode`] before any write if an entry cannot be
    /// encoded, and a store error if a round trip or command fails.
    pub async fn multi_set<T: Record, K: AsRef<str>>(
        &self,
        keyspace: &Keyspace,
        entries: &[(K, T)],
        ttl: Option<Duration>,
    ) -> CacheResult<BatchStats> {
        let encoded = entries
            .iter()
            .map(|(key, value)| Ok((keyspace.resolve(key.as_ref()), codec::encode(value)?)))
            .collect::<CacheResult<Vec<(String, Bytes)>>>()?;

        let mut stats = BatchStats { requested: entries.len(), ..BatchStats::default() };
        for chunk in encoded.chunks(self.config.chunk_size()) {
            let mut pipeline = Pipeline::atomic();
            pipeline.mset(chunk.to_vec());
            if let Some(ttl) = ttl {
                for (key, _) in chunk {
                    pipeline.expire(key.clone(), ttl);
                }
            }

            let replies = self.store.execute(pipeline).await?;
            stats.round_trips += 1;
            for reply in replies {
                check_reply(reply)?;
            }
            stats.returned += chunk.len();
        }

        debug!(
            entries = stats.returned,
            round_trips = stats.round_trips,
            ?ttl,
            "Batch write complete"
        );
        Ok(stats)
    }
}

fn check_reply(reply: crate::error::StoreResult<Reply>) -> CacheResult<()> {
    reply.map(drop).map_err(CacheError::from)
}

/// Decodes one entry of a batch, logging and discarding corrupt data.
pub(crate) fn decode_or_skip<T: Record>(key: &str, bytes: &[u8]) -> Option<T> {
    match codec::decode(key, bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(key, schema = T::SCHEMA, error = %e, "Skipping corrupt batch entry");
            None
        },
    }
}
