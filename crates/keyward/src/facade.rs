//! Key-value facade.
//!
//! [`KeyValue`] is the entry point for reading and writing values. Every
//! operation resolves its logical keys through the active [`Keyspace`],
//! encodes or decodes structured values with the [`codec`], and delegates
//! to the [`KvStore`].
//!
//! # Error asymmetry
//!
//! A single-key read of corrupt data fails with [`CacheError::Decode`] or
//! [`CacheError::SchemaValidation`]: the caller asked for that key and must
//! learn it is broken. Batch reads ([`mget`](KeyValue::mget),
//! [`hgetall`](KeyValue::hgetall), [`lrange`](KeyValue::lrange)) log and skip
//! corrupt entries instead and return the valid subset.
//!
//! # Collections
//!
//! Hash values and list elements are encoded records. Set and sorted-set
//! members are plain strings, so they stay comparable and ordered in the
//! store. Collection names are namespaced like any other key; fields and
//! members are not.
//!
//! # Example
//!
//! ```
//! use keyward::{KeyValue, KvConfig, store::{KvStore, MemoryStore, SetOptions}};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let config = KvConfig::builder().namespace("app").build().unwrap();
//! let kv = KeyValue::new(MemoryStore::new(), config);
//!
//! kv.set("greeting", &"hello".to_string(), SetOptions::new()).await.unwrap();
//! let value: Option<String> = kv.get("greeting").await.unwrap();
//! assert_eq!(value.as_deref(), Some("hello"));
//!
//! // The physical key carries the namespace
//! assert!(kv.store().get("app:greeting").await.unwrap().is_some());
//! # });
//! ```

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use tracing::{debug, info};

use crate::{
    batch::{BatchCoordinator, BatchStats, decode_or_skip},
    codec::{self, Record},
    config::KvConfig,
    error::CacheResult,
    namespace::Keyspace,
    store::{KeyTtl, KvStore, SetOptions},
};

/// Namespaced, codec-aware access to a [`KvStore`].
///
/// Cloning is cheap: the store and the configuration are shared.
pub struct KeyValue<S> {
    store: Arc<S>,
    config: Arc<KvConfig>,
    keyspace: Keyspace,
}

impl<S> Clone for KeyValue<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            keyspace: self.keyspace.clone(),
        }
    }
}

impl<S> std::fmt::Debug for KeyValue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValue")
            .field("keyspace", &self.keyspace)
            .field("config", &self.config)
            .finish()
    }
}

impl<S: KvStore> KeyValue<S> {
    /// Creates a facade over `store`.
    #[must_use]
    pub fn new(store: S, config: KvConfig) -> Self {
        Self::from_shared(Arc::new(store), Arc::new(config))
    }

    /// Creates a facade over an already shared store and configuration.
    #[must_use]
    pub fn from_shared(store: Arc<S>, config: Arc<KvConfig>) -> Self {
        let keyspace = config.keyspace();
        Self { store, config, keyspace }
    }

    /// Returns a facade resolving keys under `namespace` instead of the
    /// configured one. The store and configuration stay shared.
    #[must_use]
    pub fn scoped(&self, namespace: impl Into<String>) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            keyspace: self.keyspace.scoped(namespace),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &KvConfig {
        &self.config
    }

    /// The keyspace logical keys are resolved in.
    #[must_use]
    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Physical key for `logical_key`.
    #[must_use]
    pub fn resolve(&self, logical_key: &str) -> String {
        self.keyspace.resolve(logical_key)
    }

    fn batch(&self) -> BatchCoordinator<'_, S> {
        BatchCoordinator::new(&*self.store, self.config.batch())
    }

    // ── Single keys ────────────────────────────────────────────────────

    /// Reads and decodes the value at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Decode`](crate::CacheError::Decode) or
    /// [`CacheError::SchemaValidation`](crate::CacheError::SchemaValidation)
    /// if the stored data is corrupt, and a store error if the read fails.
    #[tracing::instrument(name = "kv_get", skip(self), fields(schema = T::SCHEMA))]
    pub async fn get<T: Record>(&self, key: &str) -> CacheResult<Option<T>> {
        let physical = self.resolve(key);
        let bytes = self.store.get(&physical).await?;
        codec::decode_opt(&physical, bytes.as_deref())
    }

    /// Encodes and writes `value` at `key`. Returns whether the write
    /// happened (conditional writes may be refused).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Encode`](crate::CacheError::Encode) if the value
    /// cannot be encoded, and a store error if the write fails.
    #[tracing::instrument(name = "kv_set", skip(self, value), fields(schema = T::SCHEMA))]
    pub async fn set<T: Record>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> CacheResult<bool> {
        let bytes = codec::encode(value)?;
        let physical = self.resolve(key);
        let written = self.store.set(&physical, bytes, options).await?;
        debug!(key = %physical, written, "Stored value");
        Ok(written)
    }

    /// Reads the raw bytes at `key`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    #[tracing::instrument(name = "kv_get_raw", skip(self))]
    pub async fn get_raw(&self, key: &str) -> CacheResult<Option<Bytes>> {
        Ok(self.store.get(&self.resolve(key)).await?)
    }

    /// Writes raw bytes at `key`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    #[tracing::instrument(name = "kv_set_raw", skip(self, value), fields(len = value.len()))]
    pub async fn set_raw(&self, key: &str, value: Bytes, options: SetOptions) -> CacheResult<bool> {
        Ok(self.store.set(&self.resolve(key), value, options).await?)
    }

    /// Deletes `keys`, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails.
    #[tracing::instrument(name = "kv_delete", skip_all, fields(count = keys.len()))]
    pub async fn delete<K: AsRef<str>>(&self, keys: &[K]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted = self.store.delete(&self.keyspace.resolve_all(keys)).await?;
        info!(deleted, "Deleted keys");
        Ok(deleted)
    }

    /// Whether `key` exists.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    #[tracing::instrument(name = "kv_exists", skip(self))]
    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.store.exists(&[self.resolve(key)]).await? > 0)
    }

    /// Sets the expiry of `key`. Returns `false` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns a store error if the command fails.
    #[tracing::instrument(name = "kv_expire", skip(self))]
    pub async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        Ok(self.store.expire(&self.resolve(key), ttl).await?)
    }

    /// Remaining lifetime of `key`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the command fails.
    #[tracing::instrument(name = "kv_ttl", skip(self))]
    pub async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        Ok(self.store.ttl(&self.resolve(key)).await?)
    }

    /// Increments the counter at `key` by `by`, returning the new value.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`](crate::CacheError::Store) if the key holds
    /// a non-integer, and a store error if the command fails.
    #[tracing::instrument(name = "kv_incr", skip(self))]
    pub async fn incr(&self, key: &str, by: i64) -> CacheResult<i64> {
        Ok(self.store.incr_by(&self.resolve(key), by).await?)
    }

    /// Decrements the counter at `key` by `by`, returning the new value.
    ///
    /// # Errors
    ///
    /// Same as [`incr`](Self::incr).
    #[tracing::instrument(name = "kv_decr", skip(self))]
    pub async fn decr(&self, key: &str, by: i64) -> CacheResult<i64> {
        Ok(self.store.incr_by(&self.resolve(key), by.saturating_neg()).await?)
    }

    /// Verifies the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::StoreUnavailable`](crate::CacheError::StoreUnavailable)
    /// if it is not.
    #[tracing::instrument(name = "kv_ping", skip(self))]
    pub async fn ping(&self) -> CacheResult<()> {
        Ok(self.store.ping().await?)
    }

    // ── Batches ────────────────────────────────────────────────────────

    /// Reads many keys. Absent and corrupt entries are omitted.
    ///
    /// # Errors
    ///
    /// Returns a store error if a round trip fails.
    #[tracing::instrument(
        name = "kv_mget",
        skip_all,
        fields(count = keys.len(), schema = T::SCHEMA)
    )]
    pub async fn mget<T: Record, K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> CacheResult<HashMap<String, T>> {
        self.batch().multi_get(&self.keyspace, keys).await
    }

    /// Like [`mget`](Self::mget), also returning [`BatchStats`].
    ///
    /// # Errors
    ///
    /// Same as [`mget`](Self::mget).
    #[tracing::instrument(
        name = "kv_mget_with_stats",
        skip_all,
        fields(count = keys.len(), schema = T::SCHEMA)
    )]
    pub async fn mget_with_stats<T: Record, K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> CacheResult<(HashMap<String, T>, BatchStats)> {
        self.batch().multi_get_with_stats(&self.keyspace, keys).await
    }

    /// Writes many entries, each expiring after `ttl` if given.
    ///
    /// # Errors
    ///
    /// Returns an encode error before any write, or a store error.
    #[tracing::instrument(name = "kv_mset", skip_all, fields(count = entries.len(), ttl = ?ttl))]
    pub async fn mset<T: Record, K: AsRef<str>>(
        &self,
        entries: &[(K, T)],
        ttl: Option<Duration>,
    ) -> CacheResult<BatchStats> {
        let stats = self.batch().multi_set(&self.keyspace, entries, ttl).await?;
        info!(count = stats.returned, "Stored batch");
        Ok(stats)
    }

    // ── Hashes ─────────────────────────────────────────────────────────

    /// Reads and decodes one hash field. The hash name is namespaced.
    ///
    /// # Errors
    ///
    /// Returns a corrupt-data error if the field holds invalid data, and a
    /// store error if the read fails.
    #[tracing::instrument(name = "kv_hget", skip(self), fields(schema = T::SCHEMA))]
    pub async fn hget<T: Record>(&self, name: &str, field: &str) -> CacheResult<Option<T>> {
        let physical = self.resolve(name);
        let bytes = self.store.hget(&physical, field).await?;
        codec::decode_opt(&format!("{physical}#{field}"), bytes.as_deref())
    }

    /// Encodes and writes one hash field. Returns `true` if the field is new.
    ///
    /// # Errors
    ///
    /// Returns an encode error or a store error.
    #[tracing::instrument(name = "kv_hset", skip(self, value), fields(schema = T::SCHEMA))]
    pub async fn hset<T: Record>(&self, name: &str, field: &str, value: &T) -> CacheResult<bool> {
        let bytes = codec::encode(value)?;
        Ok(self.store.hset(&self.resolve(name), field, bytes).await?)
    }

    /// Reads every field of a hash. Corrupt fields are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    #[tracing::instrument(name = "kv_hgetall", skip(self), fields(schema = T::SCHEMA))]
    pub async fn hgetall<T: Record>(&self, name: &str) -> CacheResult<HashMap<String, T>> {
        let physical = self.resolve(name);
        let fields = self.store.hgetall(&physical).await?;
        let total = fields.len();
        let decoded: HashMap<String, T> = fields
            .into_iter()
            .filter_map(|(field, bytes)| {
                let record = decode_or_skip::<T>(&format!("{physical}#{field}"), &bytes)?;
                Some((field, record))
            })
            .collect();
        debug!(fields = total, decoded = decoded.len(), "Read hash");
        Ok(decoded)
    }

    /// Deletes hash fields, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the command fails.
    #[tracing::instrument(name = "kv_hdel", skip(self))]
    pub async fn hdel(&self, name: &str, fields: &[String]) -> CacheResult<u64> {
        Ok(self.store.hdel(&self.resolve(name), fields).await?)
    }

    // ── Lists ──────────────────────────────────────────────────────────

    /// Encodes `values` and pushes them onto the head of the list, one after
    /// another. Returns the new length.
    ///
    /// # Errors
    ///
    /// Returns an encode error before any write, or a store error.
    #[tracing::instrument(name = "kv_lpush", skip(self, values), fields(count = values.len()))]
    pub async fn lpush<T: Record>(&self, key: &str, values: &[T]) -> CacheResult<u64> {
        let encoded = encode_all(values)?;
        Ok(self.store.lpush(&self.resolve(key), encoded).await?)
    }

    /// Encodes `values` and appends them to the tail of the list. Returns the
    /// new length.
    ///
    /// # Errors
    ///
    /// Returns an encode error before any write, or a store error.
    #[tracing::instrument(name = "kv_rpush", skip(self, values), fields(count = values.len()))]
    pub async fn rpush<T: Record>(&self, key: &str, values: &[T]) -> CacheResult<u64> {
        let encoded = encode_all(values)?;
        Ok(self.store.rpush(&self.resolve(key), encoded).await?)
    }

    /// Removes and decodes the head of the list.
    ///
    /// # Errors
    ///
    /// Returns a corrupt-data error if the element is invalid (it is removed
    /// either way), and a store error if the command fails.
    #[tracing::instrument(name = "kv_lpop", skip(self), fields(schema = T::SCHEMA))]
    pub async fn lpop<T: Record>(&self, key: &str) -> CacheResult<Option<T>> {
        let physical = self.resolve(key);
        let bytes = self.store.lpop(&physical).await?;
        codec::decode_opt(&physical, bytes.as_deref())
    }

    /// Removes and decodes the tail of the list.
    ///
    /// # Errors
    ///
    /// Same as [`lpop`](Self::lpop).
    #[tracing::instrument(name = "kv_rpop", skip(self), fields(schema = T::SCHEMA))]
    pub async fn rpop<T: Record>(&self, key: &str) -> CacheResult<Option<T>> {
        let physical = self.resolve(key);
        let bytes = self.store.rpop(&physical).await?;
        codec::decode_opt(&physical, bytes.as_deref())
    }

    /// Reads the elements between `start` and `stop` inclusive. Negative
    /// indexes count from the end, so `(0, -1)` is the whole list. Corrupt
    /// elements are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    #[tracing::instrument(name = "kv_lrange", skip(self), fields(schema = T::SCHEMA))]
    pub async fn lrange<T: Record>(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<T>> {
        let physical = self.resolve(key);
        let items = self.store.lrange(&physical, start, stop).await?;
        let total = items.len();
        let decoded: Vec<T> =
            items.iter().filter_map(|bytes| decode_or_skip::<T>(&physical, bytes)).collect();
        debug!(items = total, decoded = decoded.len(), "Read list");
        Ok(decoded)
    }

    // ── Sets ───────────────────────────────────────────────────────────

    /// Adds members to a set, returning how many were new.
    ///
    /// # Errors
    ///
    /// Returns a store error if the command fails.
    #[tracing::instrument(name = "kv_sadd", skip(self))]
    pub async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        Ok(self.store.sadd(&self.resolve(key), members).await?)
    }

    /// Every member of a set.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    #[tracing::instrument(name = "kv_smembers", skip(self))]
    pub async fn smembers(&self, key: &str) -> CacheResult<BTreeSet<String>> {
        let members = self.store.smembers(&self.resolve(key)).await?;
        Ok(members.into_iter().collect())
    }

    /// Removes members from a set, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the command fails.
    #[tracing::instrument(name = "kv_srem", skip(self))]
    pub async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        Ok(self.store.srem(&self.resolve(key), members).await?)
    }

    // ── Sorted sets ────────────────────────────────────────────────────

    /// Adds scored members, returning how many were new. Existing members
    /// take the new score.
    ///
    /// # Errors
    ///
    /// Returns a store error if the command fails.
    #[tracing::instrument(name = "kv_zadd", skip(self, members), fields(count = members.len()))]
    pub async fn zadd(&self, key: &str, members: &[(String, f64)]) -> CacheResult<u64> {
        Ok(self.store.zadd(&self.resolve(key), members).await?)
    }

    /// Members ranked `start` to `stop` inclusive, lowest score first.
    /// Negative ranks count from the highest score.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    #[tracing::instrument(name = "kv_zrange", skip(self))]
    pub async fn zrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        Ok(self.store.zrange(&self.resolve(key), start, stop).await?)
    }

    /// Members scored between `min` and `max` inclusive, lowest first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    #[tracing::instrument(name = "kv_zrange_by_score", skip(self))]
    pub async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>> {
        Ok(self.store.zrange_by_score(&self.resolve(key), min, max).await?)
    }

    /// Removes members from a sorted set, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the command fails.
    #[tracing::instrument(name = "kv_zrem", skip(self))]
    pub async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        Ok(self.store.zrem(&self.resolve(key), members).await?)
    }

    /// Physical keys starting with the resolved `prefix`.
    pub(crate) async fn scan_resolved(&self, physical_prefix: &str) -> CacheResult<Vec<String>> {
        Ok(self.store.scan_prefix(physical_prefix).await?)
    }

    /// Deletes physical keys as-is.
    pub(crate) async fn delete_resolved(&self, physical_keys: &[String]) -> CacheResult<u64> {
        if physical_keys.is_empty() {
            return Ok(0);
        }
        Ok(self.store.delete(physical_keys).await?)
    }
}

fn encode_all<T: Record>(values: &[T]) -> CacheResult<Vec<Bytes>> {
    values.iter().map(codec::encode).collect()
}
