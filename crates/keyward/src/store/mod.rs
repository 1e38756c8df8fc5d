//! Key-value store boundary.
//!
//! This module defines the [`KvStore`] trait, the abstraction over the
//! external key-value store everything else in the crate is built on.
//!
//! # Design
//!
//! The trait has a single required method, [`execute`](KvStore::execute),
//! which sends a [`Pipeline`] of [`Command`]s in one round trip. Every
//! single-command operation (`get`, `set`, `incr_by`, ...) is a provided
//! method built on it, so a store adapter only has to translate commands
//! to its client and map its errors to [`StoreError`].
//!
//! Two error levels are distinguished:
//!
//! - The outer `Err` of `execute` means the round trip failed: the store is unreachable or timed
//!   out. Use [`StoreError::connection`] / [`StoreError::timeout`].
//! - An inner `Err` in the per-command reply list means the store rejected that command (wrong
//!   type, not an integer). The other commands still have replies.
//!
//! See [`MemoryStore`] for a reference implementation.

mod memory;
mod pipeline;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

pub use memory::MemoryStore;
pub use pipeline::{Command, KeyTtl, Pipeline, Reply, SetCondition, SetOptions};

use crate::error::{StoreError, StoreResult};

/// Abstract key-value store.
///
/// Implementations must be thread-safe and support concurrent callers.
/// Single commands are atomic; atomic pipelines are applied without
/// interleaving commands from other callers.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use keyward::store::{KvStore, MemoryStore, SetOptions};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryStore::new();
///
/// store.set("greeting", Bytes::from("hello"), SetOptions::new()).await.unwrap();
/// assert_eq!(store.get("greeting").await.unwrap(), Some(Bytes::from("hello")));
///
/// // NX write on an existing key is refused
/// let nx = SetOptions::new().if_absent();
/// assert!(!store.set("greeting", Bytes::from("hi"), nx).await.unwrap());
/// # });
/// ```
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Sends every command of `pipeline` in one round trip.
    ///
    /// Returns one result per command, in submission order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] or [`StoreError::Timeout`] if the
    /// round trip itself failed.
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<Vec<StoreResult<Reply>>>;

    /// Sends a single command.
    async fn call(&self, command: Command) -> StoreResult<Reply> {
        let name = command.name();
        let mut pipeline = Pipeline::new();
        pipeline.push(command);
        match self.execute(pipeline).await?.pop() {
            Some(reply) => reply,
            None => Err(StoreError::unexpected_reply(name, "no reply")),
        }
    }

    /// `GET`: the value at `key`, or `None` if absent.
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.call(Command::Get { key: key.to_owned() }).await?.into_value("GET")
    }

    /// `SET`: returns whether the write happened (always `true` for
    /// unconditional writes).
    async fn set(&self, key: &str, value: Bytes, options: SetOptions) -> StoreResult<bool> {
        self.call(Command::Set { key: key.to_owned(), value, options }).await?.into_bool("SET")
    }

    /// `MGET`: values in request order, `None` where absent.
    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<Bytes>>> {
        self.call(Command::MGet { keys: keys.to_vec() }).await?.into_values("MGET")
    }

    /// `MSET`: writes every entry without expiry.
    async fn mset(&self, entries: Vec<(String, Bytes)>) -> StoreResult<()> {
        self.call(Command::MSet { entries }).await?.into_ok("MSET")
    }

    /// `DEL`: returns the number of keys removed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        self.call(Command::Del { keys: keys.to_vec() }).await?.into_count("DEL")
    }

    /// Deletes `key` only if it holds exactly `expected`.
    async fn compare_and_delete(&self, key: &str, expected: Bytes) -> StoreResult<bool> {
        self.call(Command::DelIfEquals { key: key.to_owned(), expected })
            .await?
            .into_bool("DELIFEQ")
    }

    /// `EXISTS`: returns how many of `keys` exist.
    async fn exists(&self, keys: &[String]) -> StoreResult<u64> {
        self.call(Command::Exists { keys: keys.to_vec() }).await?.into_count("EXISTS")
    }

    /// `EXPIRE`: returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.call(Command::Expire { key: key.to_owned(), ttl }).await?.into_bool("EXPIRE")
    }

    /// `TTL`: remaining lifetime of `key`.
    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.call(Command::Ttl { key: key.to_owned() }).await?.into_ttl("TTL")
    }

    /// `INCRBY`: returns the value after the increment. A missing key
    /// counts as zero.
    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.call(Command::IncrBy { key: key.to_owned(), delta }).await?.into_int("INCRBY")
    }

    /// `HGET`.
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Bytes>> {
        self.call(Command::HGet { key: key.to_owned(), field: field.to_owned() })
            .await?
            .into_value("HGET")
    }

    /// `HSET`: returns `true` if the field was newly added.
    async fn hset(&self, key: &str, field: &str, value: Bytes) -> StoreResult<bool> {
        self.call(Command::HSet { key: key.to_owned(), field: field.to_owned(), value })
            .await?
            .into_bool("HSET")
    }

    /// `HGETALL`.
    async fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, Bytes)>> {
        self.call(Command::HGetAll { key: key.to_owned() }).await?.into_fields("HGETALL")
    }

    /// `HDEL`: returns the number of fields removed.
    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
        self.call(Command::HDel { key: key.to_owned(), fields: fields.to_vec() })
            .await?
            .into_count("HDEL")
    }

    /// `LPUSH`: returns the list length after the push. Each value is
    /// pushed to the head in turn, so the last one ends up first.
    async fn lpush(&self, key: &str, values: Vec<Bytes>) -> StoreResult<u64> {
        self.call(Command::LPush { key: key.to_owned(), values }).await?.into_count("LPUSH")
    }

    /// `RPUSH`: returns the list length after the push.
    async fn rpush(&self, key: &str, values: Vec<Bytes>) -> StoreResult<u64> {
        self.call(Command::RPush { key: key.to_owned(), values }).await?.into_count("RPUSH")
    }

    /// `LPOP`: removes and returns the first element.
    async fn lpop(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.call(Command::LPop { key: key.to_owned() }).await?.into_value("LPOP")
    }

    /// `RPOP`: removes and returns the last element.
    async fn rpop(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.call(Command::RPop { key: key.to_owned() }).await?.into_value("RPOP")
    }

    /// `LRANGE` with inclusive indexes; negative indexes count from the end.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<Bytes>> {
        self.call(Command::LRange { key: key.to_owned(), start, stop })
            .await?
            .into_items("LRANGE")
    }

    /// `SADD`: returns the number of members newly added.
    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        self.call(Command::SAdd { key: key.to_owned(), members: members.to_vec() })
            .await?
            .into_count("SADD")
    }

    /// `SMEMBERS`.
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.call(Command::SMembers { key: key.to_owned() }).await?.into_members("SMEMBERS")
    }

    /// `SREM`: returns the number of members removed.
    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        self.call(Command::SRem { key: key.to_owned(), members: members.to_vec() })
            .await?
            .into_count("SREM")
    }

    /// `ZADD`: returns the number of members newly added. Existing members
    /// get their score updated.
    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> StoreResult<u64> {
        self.call(Command::ZAdd { key: key.to_owned(), members: members.to_vec() })
            .await?
            .into_count("ZADD")
    }

    /// `ZRANGE` by rank with inclusive indexes, lowest score first.
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.call(Command::ZRange { key: key.to_owned(), start, stop })
            .await?
            .into_members("ZRANGE")
    }

    /// `ZRANGEBYSCORE` with inclusive bounds, ordered by score.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
        self.call(Command::ZRangeByScore { key: key.to_owned(), min, max })
            .await?
            .into_members("ZRANGEBYSCORE")
    }

    /// `ZREM`: returns the number of members removed.
    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        self.call(Command::ZRem { key: key.to_owned(), members: members.to_vec() })
            .await?
            .into_count("ZREM")
    }

    /// `ZREMRANGEBYSCORE` with inclusive bounds: returns the number removed.
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        self.call(Command::ZRemRangeByScore { key: key.to_owned(), min, max })
            .await?
            .into_count("ZREMRANGEBYSCORE")
    }

    /// `ZCARD`.
    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.call(Command::ZCard { key: key.to_owned() }).await?.into_count("ZCARD")
    }

    /// Every live key starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.call(Command::ScanPrefix { prefix: prefix.to_owned() }).await?.into_members("SCAN")
    }

    /// `PING`: verifies the store is reachable.
    async fn ping(&self) -> StoreResult<()> {
        self.call(Command::Ping).await?.into_ok("PING")
    }
}

/// Shared stores. Every method is forwarded, so adapters overriding
/// provided methods keep their behavior behind an `Arc`.
#[async_trait]
impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<Vec<StoreResult<Reply>>> {
        (**self).execute(pipeline).await
    }

    async fn call(&self, command: Command) -> StoreResult<Reply> {
        (**self).call(command).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, options: SetOptions) -> StoreResult<bool> {
        (**self).set(key, value, options).await
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<Bytes>>> {
        (**self).mget(keys).await
    }

    async fn mset(&self, entries: Vec<(String, Bytes)>) -> StoreResult<()> {
        (**self).mset(entries).await
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        (**self).delete(keys).await
    }

    async fn compare_and_delete(&self, key: &str, expected: Bytes) -> StoreResult<bool> {
        (**self).compare_and_delete(key, expected).await
    }

    async fn exists(&self, keys: &[String]) -> StoreResult<u64> {
        (**self).exists(keys).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        (**self).expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        (**self).ttl(key).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        (**self).incr_by(key, delta).await
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Bytes>> {
        (**self).hget(key, field).await
    }

    async fn hset(&self, key: &str, field: &str, value: Bytes) -> StoreResult<bool> {
        (**self).hset(key, field, value).await
    }

    async fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, Bytes)>> {
        (**self).hgetall(key).await
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
        (**self).hdel(key, fields).await
    }

    async fn lpush(&self, key: &str, values: Vec<Bytes>) -> StoreResult<u64> {
        (**self).lpush(key, values).await
    }

    async fn rpush(&self, key: &str, values: Vec<Bytes>) -> StoreResult<u64> {
        (**self).rpush(key, values).await
    }

    async fn lpop(&self, key: &str) -> StoreResult<Option<Bytes>> {
        (**self).lpop(key).await
    }

    async fn rpop(&self, key: &str) -> StoreResult<Option<Bytes>> {
        (**self).rpop(key).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<Bytes>> {
        (**self).lrange(key, start, stop).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        (**self).sadd(key, members).await
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        (**self).smembers(key).await
    }

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        (**self).srem(key, members).await
    }

    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> StoreResult<u64> {
        (**self).zadd(key, members).await
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        (**self).zrange(key, start, stop).await
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
        (**self).zrange_by_score(key, min, max).await
    }

    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        (**self).zrem(key, members).await
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        (**self).zrem_range_by_score(key, min, max).await
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        (**self).zcard(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        (**self).scan_prefix(prefix).await
    }

    async fn ping(&self) -> StoreResult<()> {
        (**self).ping().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    /// Answers `GET` from a fixed value without touching `execute`.
    struct FixedGet;

    #[async_trait]
    impl KvStore for FixedGet {
        async fn execute(&self, _pipeline: Pipeline) -> StoreResult<Vec<StoreResult<Reply>>> {
            Err(StoreError::connection("execute must not be reached"))
        }

        async fn get(&self, _key: &str) -> StoreResult<Option<Bytes>> {
            Ok(Some(Bytes::from_static(b"fixed")))
        }
    }

    #[tokio::test]
    async fn arc_keeps_overridden_methods() {
        let shared: Arc<FixedGet> = Arc::new(FixedGet);
        assert_eq!(shared.get("k").await.unwrap(), Some(Bytes::from_static(b"fixed")));

        let dynamic: Arc<dyn KvStore> = Arc::new(FixedGet);
        assert_eq!(dynamic.get("k").await.unwrap(), Some(Bytes::from_static(b"fixed")));
        assert!(dynamic.ping().await.unwrap_err().is_unavailable());
    }
}
