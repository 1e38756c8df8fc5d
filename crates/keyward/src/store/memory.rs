//! In-memory store implementation.
//!
//! [`MemoryStore`] implements [`KvStore`] over a [`BTreeMap`] guarded by a
//! [`parking_lot::RwLock`]. It is intended for tests and development.
//!
//! # Features
//!
//! - **Strings, hashes, lists, sets and sorted sets** with Redis-style type checking
//! - **Atomic pipelines**: every pipeline is applied under a single write lock
//! - **TTL support**: expired keys are invisible immediately and purged by a background sweep
//! - **Ordered keys**: prefix scans are range queries on the map
//!
//! # Limitations
//!
//! - Data is not persisted
//! - The sweep runs every second; memory of expired keys is reclaimed lazily until then

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    ops::RangeInclusive,
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use parking_lot::RwLock;
use tokio::{
    select,
    sync::watch,
    time::{Duration, Instant, sleep},
};

use super::{
    KvStore,
    pipeline::{Command, KeyTtl, Pipeline, Reply, SetCondition},
};
use crate::error::{StoreError, StoreResult};

/// Interval between background sweeps of expired keys.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the sweep task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Debug, Clone)]
enum Value {
    Str(Bytes),
    Hash(BTreeMap<String, Bytes>),
    List(VecDeque<Bytes>),
    Set(BTreeSet<String>),
    ZSet(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn persistent(value: Value) -> Self {
        Self { value, expires_at: None }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Keyspace = BTreeMap<String, Slot>;

/// In-memory [`KvStore`].
///
/// # Cloning
///
/// Clones share the same data. The background sweep stops when the last
/// clone is dropped, or earlier via [`shutdown`](Self::shutdown).
///
/// # Time
///
/// Expiry uses [`tokio::time::Instant`], so tests running with a paused
/// tokio clock can advance past TTLs deterministically.
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<Keyspace>>,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("keys", &self.data.read().len()).finish()
    }
}

impl MemoryStore {
    /// Creates an empty store and spawns its expiry sweep on the current
    /// tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let store = Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        // The task holds only the data, so dropping every handle closes the channel.
        let data = Arc::clone(&store.data);
        tokio::spawn(async move {
            sweep_expired(data, shutdown_rx).await;
        });

        store
    }

    /// Stops the background sweep. Expired keys stay invisible to reads.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Number of keys currently held, expired or not.
    #[must_use]
    pub fn raw_len(&self) -> usize {
        self.data.read().len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

async fn sweep_expired(data: Arc<RwLock<Keyspace>>, mut shutdown_rx: watch::Receiver<()>) {
    loop {
        select! {
            _ = sleep(SWEEP_INTERVAL) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let now = Instant::now();
        let expired: Vec<String> = data
            .read()
            .iter()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        if !expired.is_empty() {
            let mut guard = data.write();
            for key in expired {
                // Re-check: the key may have been rewritten since the scan.
                if guard.get(&key).is_some_and(|slot| slot.is_expired(now)) {
                    guard.remove(&key);
                }
            }
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    #[tracing::instrument(
        name = "memory_execute",
        skip_all,
        fields(commands = pipeline.len(), atomic = pipeline.is_atomic())
    )]
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<Vec<StoreResult<Reply>>> {
        fail_point!("memory-store-execute", |_| {
            Err(StoreError::connection("injected connection failure"))
        });

        // Atomic and plain pipelines alike run under one write lock.
        let now = Instant::now();
        let mut data = self.data.write();
        Ok(pipeline
            .into_commands()
            .into_iter()
            .map(|command| apply(&mut data, command, now))
            .collect())
    }
}

/// Drops `key` if its TTL has elapsed, then returns the live slot.
fn live<'a>(data: &'a mut Keyspace, key: &str, now: Instant) -> Option<&'a mut Slot> {
    if data.get(key).is_some_and(|slot| slot.is_expired(now)) {
        data.remove(key);
    }
    data.get_mut(key)
}

fn is_live(data: &mut Keyspace, key: &str, now: Instant) -> bool {
    live(data, key, now).is_some()
}

fn count(n: usize) -> Reply {
    Reply::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// Returns the live value at `key`, creating it with `empty` when absent.
fn live_or_insert<'a>(
    data: &'a mut Keyspace,
    key: &str,
    now: Instant,
    empty: impl FnOnce() -> Value,
) -> &'a mut Value {
    if data.get(key).is_some_and(|slot| slot.is_expired(now)) {
        data.remove(key);
    }
    &mut data.entry(key.to_owned()).or_insert_with(|| Slot::persistent(empty())).value
}

/// `LPOP`/`RPOP`: takes one element with `take`, dropping an emptied list.
fn pop(
    data: &mut Keyspace,
    key: String,
    now: Instant,
    take: fn(&mut VecDeque<Bytes>) -> Option<Bytes>,
) -> StoreResult<Reply> {
    let (popped, emptied) = match live(data, &key, now) {
        None => return Ok(Reply::Nil),
        Some(Slot { value: Value::List(items), .. }) => (take(items), items.is_empty()),
        Some(_) => return Err(StoreError::wrong_type(key)),
    };
    drop_if_emptied(data, &key, emptied);
    Ok(popped.map_or(Reply::Nil, Reply::Value))
}

/// Removes `key` once a pop or removal left its collection empty.
fn drop_if_emptied(data: &mut Keyspace, key: &str, emptied: bool) {
    if emptied {
        data.remove(key);
    }
}

/// Inclusive index range for `LRANGE`/`ZRANGE` semantics: negative indexes
/// count from the end, out-of-range bounds are clamped.
fn rank_range(len: usize, start: i64, stop: i64) -> Option<RangeInclusive<usize>> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some(usize::try_from(start).ok()?..=usize::try_from(stop).ok()?)
}

fn apply(data: &mut Keyspace, command: Command, now: Instant) -> StoreResult<Reply> {
    match command {
        Command::Get { key } => match live(data, &key, now) {
            None => Ok(Reply::Nil),
            Some(Slot { value: Value::Str(bytes), .. }) => Ok(Reply::Value(bytes.clone())),
            Some(_) => Err(StoreError::wrong_type(key)),
        },

        Command::Set { key, value, options } => {
            let exists = is_live(data, &key, now);
            let allowed = match options.condition() {
                SetCondition::Always => true,
                SetCondition::IfAbsent => !exists,
                SetCondition::IfPresent => exists,
            };
            if !allowed {
                return Ok(Reply::Bool(false));
            }
            let expires_at = options.expiry().map(|ttl| now + ttl);
            data.insert(key, Slot { value: Value::Str(value), expires_at });
            Ok(Reply::Bool(true))
        },

        Command::MGet { keys } => {
            let values = keys
                .iter()
                .map(|key| match live(data, key, now) {
                    Some(Slot { value: Value::Str(bytes), .. }) => Some(bytes.clone()),
                    _ => None,
                })
                .collect();
            Ok(Reply::Values(values))
        },

        Command::MSet { entries } => {
            for (key, value) in entries {
                data.insert(key, Slot::persistent(Value::Str(value)));
            }
            Ok(Reply::Ok)
        },

        Command::Del { keys } => {
            let removed = keys.iter().filter(|key| is_live(data, key, now)).count();
            for key in &keys {
                data.remove(key);
            }
            Ok(count(removed))
        },

        Command::DelIfEquals { key, expected } => {
            let matches = matches!(
                live(data, &key, now),
                Some(Slot { value: Value::Str(current), .. }) if *current == expected
            );
            if matches {
                data.remove(&key);
            }
            Ok(Reply::Bool(matches))
        },

        Command::Exists { keys } => {
            Ok(count(keys.iter().filter(|key| is_live(data, key, now)).count()))
        },

        Command::Expire { key, ttl } => match live(data, &key, now) {
            Some(slot) => {
                slot.expires_at = Some(now + ttl);
                Ok(Reply::Bool(true))
            },
            None => Ok(Reply::Bool(false)),
        },

        Command::ExpireIfPersistent { key, ttl } => match live(data, &key, now) {
            Some(slot) if slot.expires_at.is_none() => {
                slot.expires_at = Some(now + ttl);
                Ok(Reply::Bool(true))
            },
            _ => Ok(Reply::Bool(false)),
        },

        Command::Ttl { key } => {
            let ttl = match live(data, &key, now) {
                None => KeyTtl::Missing,
                Some(Slot { expires_at: None, .. }) => KeyTtl::Persistent,
                Some(Slot { expires_at: Some(at), .. }) => KeyTtl::Expires(*at - now),
            };
            Ok(Reply::Ttl(ttl))
        },

        Command::IncrBy { key, delta } => {
            let (current, expires_at) = match live(data, &key, now) {
                None => (0, None),
                Some(Slot { value: Value::Str(bytes), expires_at }) => {
                    let parsed = std::str::from_utf8(bytes)
                        .ok()
                        .and_then(|text| text.parse::<i64>().ok())
                        .ok_or_else(|| StoreError::not_an_integer(key.clone()))?;
                    (parsed, *expires_at)
                },
                Some(_) => return Err(StoreError::wrong_type(key)),
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| StoreError::internal(format!("increment of {key} would overflow")))?;
            data.insert(key, Slot { value: Value::Str(Bytes::from(next.to_string())), expires_at });
            Ok(Reply::Int(next))
        },

        Command::HGet { key, field } => match live(data, &key, now) {
            None => Ok(Reply::Nil),
            Some(Slot { value: Value::Hash(fields), .. }) => {
                Ok(fields.get(&field).cloned().map_or(Reply::Nil, Reply::Value))
            },
            Some(_) => Err(StoreError::wrong_type(key)),
        },

        Command::HSet { key, field, value } => {
            match live_or_insert(data, &key, now, || Value::Hash(BTreeMap::new())) {
                Value::Hash(fields) => Ok(Reply::Bool(fields.insert(field, value).is_none())),
                _ => Err(StoreError::wrong_type(key)),
            }
        },

        Command::HGetAll { key } => match live(data, &key, now) {
            None => Ok(Reply::Fields(Vec::new())),
            Some(Slot { value: Value::Hash(fields), .. }) => Ok(Reply::Fields(
                fields.iter().map(|(field, value)| (field.clone(), value.clone())).collect(),
            )),
            Some(_) => Err(StoreError::wrong_type(key)),
        },

        Command::HDel { key, fields } => {
            let (removed, emptied) = match live(data, &key, now) {
                None => (0, false),
                Some(Slot { value: Value::Hash(existing), .. }) => {
                    let removed =
                        fields.iter().filter(|field| existing.remove(*field).is_some()).count();
                    (removed, existing.is_empty())
                },
                Some(_) => return Err(StoreError::wrong_type(key)),
            };
            drop_if_emptied(data, &key, emptied);
            Ok(count(removed))
        },

        Command::LPush { key, values } | Command::RPush { key, values } if values.is_empty() => {
            match live(data, &key, now) {
                None => Ok(Reply::Int(0)),
                Some(Slot { value: Value::List(items), .. }) => Ok(count(items.len())),
                Some(_) => Err(StoreError::wrong_type(key)),
            }
        },

        Command::LPush { key, values } => {
            match live_or_insert(data, &key, now, || Value::List(VecDeque::new())) {
                Value::List(items) => {
                    for value in values {
                        items.push_front(value);
                    }
                    Ok(count(items.len()))
                },
                _ => Err(StoreError::wrong_type(key)),
            }
        },

        Command::RPush { key, values } => {
            match live_or_insert(data, &key, now, || Value::List(VecDeque::new())) {
                Value::List(items) => {
                    items.extend(values);
                    Ok(count(items.len()))
                },
                _ => Err(StoreError::wrong_type(key)),
            }
        },

        Command::LPop { key } => pop(data, key, now, VecDeque::pop_front),

        Command::RPop { key } => pop(data, key, now, VecDeque::pop_back),

        Command::LRange { key, start, stop } => match live(data, &key, now) {
            None => Ok(Reply::Items(Vec::new())),
            Some(Slot { value: Value::List(items), .. }) => {
                let selected: Vec<Bytes> = rank_range(items.len(), start, stop)
                    .map(|range| items.range(range).cloned().collect())
                    .unwrap_or_default();
                Ok(Reply::Items(selected))
            },
            Some(_) => Err(StoreError::wrong_type(key)),
        },

        Command::SAdd { key, members } if members.is_empty() => match live(data, &key, now) {
            None | Some(Slot { value: Value::Set(_), .. }) => Ok(Reply::Int(0)),
            Some(_) => Err(StoreError::wrong_type(key)),
        },

        Command::SAdd { key, members } => {
            match live_or_insert(data, &key, now, || Value::Set(BTreeSet::new())) {
                Value::Set(existing) => {
                    Ok(count(members.into_iter().filter(|m| existing.insert(m.clone())).count()))
                },
                _ => Err(StoreError::wrong_type(key)),
            }
        },

        Command::SMembers { key } => match live(data, &key, now) {
            None => Ok(Reply::Members(Vec::new())),
            Some(Slot { value: Value::Set(members), .. }) => {
                Ok(Reply::Members(members.iter().cloned().collect()))
            },
            Some(_) => Err(StoreError::wrong_type(key)),
        },

        Command::SRem { key, members } => {
            let (removed, emptied) = match live(data, &key, now) {
                None => (0, false),
                Some(Slot { value: Value::Set(existing), .. }) => {
                    let removed = members.iter().filter(|m| existing.remove(*m)).count();
                    (removed, existing.is_empty())
                },
                Some(_) => return Err(StoreError::wrong_type(key)),
            };
            drop_if_emptied(data, &key, emptied);
            Ok(count(removed))
        },

        Command::ZAdd { key, members } if members.is_empty() => match live(data, &key, now) {
            None | Some(Slot { value: Value::ZSet(_), .. }) => Ok(Reply::Int(0)),
            Some(_) => Err(StoreError::wrong_type(key)),
        },

        Command::ZAdd { key, members } => {
            match live_or_insert(data, &key, now, || Value::ZSet(HashMap::new())) {
                Value::ZSet(existing) => {
                    let added = members
                        .into_iter()
                        .filter(|(member, score)| existing.insert(member.clone(), *score).is_none())
                        .count();
                    Ok(count(added))
                },
                _ => Err(StoreError::wrong_type(key)),
            }
        },

        Command::ZRange { key, start, stop } => match live(data, &key, now) {
            None => Ok(Reply::Members(Vec::new())),
            Some(Slot { value: Value::ZSet(members), .. }) => {
                let ordered = by_score(members.iter());
                let selected = rank_range(ordered.len(), start, stop)
                    .map(|range| ordered[range].to_vec())
                    .unwrap_or_default();
                Ok(Reply::Members(selected))
            },
            Some(_) => Err(StoreError::wrong_type(key)),
        },

        Command::ZRangeByScore { key, min, max } => match live(data, &key, now) {
            None => Ok(Reply::Members(Vec::new())),
            Some(Slot { value: Value::ZSet(members), .. }) => Ok(Reply::Members(by_score(
                members.iter().filter(|(_, score)| **score >= min && **score <= max),
            ))),
            Some(_) => Err(StoreError::wrong_type(key)),
        },

        Command::ZRem { key, members } => {
            let (removed, emptied) = match live(data, &key, now) {
                None => (0, false),
                Some(Slot { value: Value::ZSet(existing), .. }) => {
                    let removed = members.iter().filter(|m| existing.remove(*m).is_some()).count();
                    (removed, existing.is_empty())
                },
                Some(_) => return Err(StoreError::wrong_type(key)),
            };
            drop_if_emptied(data, &key, emptied);
            Ok(count(removed))
        },

        Command::ZRemRangeByScore { key, min, max } => {
            let (removed, emptied) = match live(data, &key, now) {
                None => (0, false),
                Some(Slot { value: Value::ZSet(members), .. }) => {
                    let before = members.len();
                    members.retain(|_, score| *score < min || *score > max);
                    (before - members.len(), members.is_empty())
                },
                Some(_) => return Err(StoreError::wrong_type(key)),
            };
            drop_if_emptied(data, &key, emptied);
            Ok(count(removed))
        },

        Command::ZCard { key } => match live(data, &key, now) {
            None => Ok(Reply::Int(0)),
            Some(Slot { value: Value::ZSet(members), .. }) => Ok(count(members.len())),
            Some(_) => Err(StoreError::wrong_type(key)),
        },

        Command::ScanPrefix { prefix } => {
            let keys = data
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .filter(|(_, slot)| !slot.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            Ok(Reply::Members(keys))
        },

        Command::Ping => Ok(Reply::Ok),
    }
}

/// Sorted-set members ordered by score, ties broken by member.
fn by_score<'a>(members: impl Iterator<Item = (&'a String, &'a f64)>) -> Vec<String> {
    let mut ordered: Vec<(&String, f64)> =
        members.map(|(member, score)| (member, *score)).collect();
    ordered.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    ordered.into_iter().map(|(member, _)| member.clone()).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::SetOptions;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_owned()).collect()
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let store = MemoryStore::new();

        store.set("key1", Bytes::from("value1"), SetOptions::new()).await.unwrap();
        assert_eq!(store.get("key1").await.unwrap(), Some(Bytes::from("value1")));

        assert_eq!(store.delete(&keys(&["key1", "missing"])).await.unwrap(), 1);
        assert_eq!(store.get("key1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_conditions() {
        let store = MemoryStore::new();

        assert!(!store.set("k", Bytes::from("a"), SetOptions::new().if_present()).await.unwrap());
        assert!(store.set("k", Bytes::from("a"), SetOptions::new().if_absent()).await.unwrap());
        assert!(!store.set("k", Bytes::from("b"), SetOptions::new().if_absent()).await.unwrap());
        assert!(store.set("k", Bytes::from("c"), SetOptions::new().if_present()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from("c")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();

        store
            .set("temp", Bytes::from("v"), SetOptions::new().ttl(Duration::from_secs(2)))
            .await
            .unwrap();
        assert!(matches!(store.ttl("temp").await.unwrap(), KeyTtl::Expires(_)));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(store.get("temp").await.unwrap(), None);
        assert_eq!(store.ttl("temp").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_set_clears_ttl() {
        let store = MemoryStore::new();

        store
            .set("key", Bytes::from("temp"), SetOptions::new().ttl(Duration::from_secs(1)))
            .await
            .unwrap();
        store.set("key", Bytes::from("permanent"), SetOptions::new()).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("key").await.unwrap(), Some(Bytes::from("permanent")));
        assert_eq!(store.ttl("key").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn test_mget_mset() {
        let store = MemoryStore::new();
        store
            .mset(vec![("a".into(), Bytes::from("1")), ("b".into(), Bytes::from("2"))])
            .await
            .unwrap();

        let values = store.mget(&keys(&["a", "missing", "b"])).await.unwrap();
        assert_eq!(values, vec![Some(Bytes::from("1")), None, Some(Bytes::from("2"))]);
    }

    #[tokio::test]
    async fn test_incr_by() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_by("counter", 1).await.unwrap(), 1);
        assert_eq!(store.incr_by("counter", 5).await.unwrap(), 6);
        assert_eq!(store.incr_by("counter", -2).await.unwrap(), 4);

        store.set("text", Bytes::from("abc"), SetOptions::new()).await.unwrap();
        assert!(matches!(
            store.incr_by("text", 1).await,
            Err(StoreError::NotAnInteger { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_keeps_expiry() {
        let store = MemoryStore::new();
        store.incr_by("bucket", 1).await.unwrap();
        store.expire("bucket", Duration::from_secs(10)).await.unwrap();
        store.incr_by("bucket", 1).await.unwrap();
        assert!(matches!(store.ttl("bucket").await.unwrap(), KeyTtl::Expires(_)));
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.hset("h", "f", Bytes::from("v")).await.unwrap();
        assert!(matches!(store.get("h").await, Err(StoreError::WrongType { .. })));
        assert!(matches!(store.zcard("h").await, Err(StoreError::WrongType { .. })));
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = MemoryStore::new();
        assert!(store.hset("users", "1", Bytes::from("ann")).await.unwrap());
        assert!(!store.hset("users", "1", Bytes::from("anne")).await.unwrap());
        assert!(store.hset("users", "2", Bytes::from("bob")).await.unwrap());

        assert_eq!(store.hget("users", "1").await.unwrap(), Some(Bytes::from("anne")));
        assert_eq!(store.hgetall("users").await.unwrap().len(), 2);

        assert_eq!(store.hdel("users", &keys(&["1", "2", "3"])).await.unwrap(), 2);
        assert_eq!(store.exists(&keys(&["users"])).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sorted_set_operations() {
        let store = MemoryStore::new();
        let scored = [("a".to_owned(), 1.0), ("b".to_owned(), 2.0), ("c".to_owned(), 3.0)];
        assert_eq!(store.zadd("z", &scored).await.unwrap(), 3);
        // Re-adding updates the score without counting as new
        assert_eq!(store.zadd("z", &[("a".to_owned(), 4.0)]).await.unwrap(), 0);

        assert_eq!(store.zrange("z", 0, -1).await.unwrap(), keys(&["b", "c", "a"]));
        assert_eq!(store.zrange("z", -2, 10).await.unwrap(), keys(&["c", "a"]));
        assert_eq!(store.zrange_by_score("z", 2.0, 3.0).await.unwrap(), keys(&["b", "c"]));

        assert_eq!(store.zrem("z", &keys(&["a", "missing"])).await.unwrap(), 1);
        assert_eq!(store.zrem_range_by_score("z", f64::NEG_INFINITY, 2.0).await.unwrap(), 1);
        assert_eq!(store.zcard("z").await.unwrap(), 1);

        assert_eq!(store.zrem("z", &keys(&["c"])).await.unwrap(), 1);
        assert_eq!(store.exists(&keys(&["z"])).await.unwrap(), 0);
    }

    #[test]
    fn test_rank_range() {
        assert_eq!(rank_range(5, 0, -1), Some(0..=4));
        assert_eq!(rank_range(5, -2, 100), Some(3..=4));
        assert_eq!(rank_range(5, -100, 1), Some(0..=1));
        assert_eq!(rank_range(5, 5, 10), None);
        assert_eq!(rank_range(5, 3, 1), None);
        assert_eq!(rank_range(0, 0, -1), None);
    }

    #[tokio::test]
    async fn test_list_operations() {
        let store = MemoryStore::new();
        let items = |names: &[&str]| -> Vec<Bytes> {
            names.iter().map(|name| Bytes::copy_from_slice(name.as_bytes())).collect()
        };

        assert_eq!(store.rpush("l", items(&["b", "c"])).await.unwrap(), 2);
        // LPUSH a0 a1 leaves a1 at the head
        assert_eq!(store.lpush("l", items(&["a0", "a1"])).await.unwrap(), 4);
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), items(&["a1", "a0", "b", "c"]));
        assert_eq!(store.lrange("l", 1, 2).await.unwrap(), items(&["a0", "b"]));
        assert_eq!(store.lrange("l", -2, 100).await.unwrap(), items(&["b", "c"]));
        assert!(store.lrange("l", 3, 1).await.unwrap().is_empty());
        assert!(store.lrange("l", 0, -10).await.unwrap().is_empty());

        assert_eq!(store.lpop("l").await.unwrap(), Some(Bytes::from("a1")));
        assert_eq!(store.rpop("l").await.unwrap(), Some(Bytes::from("c")));
        assert_eq!(store.rpush("l", Vec::new()).await.unwrap(), 2);
        store.lpop("l").await.unwrap();
        store.lpop("l").await.unwrap();

        assert_eq!(store.lpop("l").await.unwrap(), None);
        assert_eq!(store.exists(&keys(&["l"])).await.unwrap(), 0);
        assert_eq!(store.lpush("empty", Vec::new()).await.unwrap(), 0);
        assert_eq!(store.exists(&keys(&["empty"])).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.sadd("s", &keys(&["b", "a", "b"])).await.unwrap(), 2);
        assert_eq!(store.sadd("s", &keys(&["a", "c"])).await.unwrap(), 1);
        assert_eq!(store.smembers("s").await.unwrap(), keys(&["a", "b", "c"]));

        assert_eq!(store.srem("s", &keys(&["a", "z"])).await.unwrap(), 1);
        assert_eq!(store.srem("s", &keys(&["b", "c"])).await.unwrap(), 2);
        assert!(store.smembers("s").await.unwrap().is_empty());
        assert_eq!(store.exists(&keys(&["s"])).await.unwrap(), 0);

        store.sadd("s", &keys(&["x"])).await.unwrap();
        assert!(matches!(store.lpop("s").await, Err(StoreError::WrongType { .. })));
        assert!(matches!(store.zrange("s", 0, -1).await, Err(StoreError::WrongType { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_if_persistent() {
        let store = MemoryStore::new();
        store.incr_by("counter", 1).await.unwrap();

        let mut pipe = Pipeline::atomic();
        pipe.expire_if_persistent("counter", Duration::from_secs(60));
        pipe.expire_if_persistent("missing", Duration::from_secs(60));
        let replies = store.execute(pipe).await.unwrap();
        assert_eq!(replies[0].as_ref().unwrap(), &Reply::Bool(true));
        assert_eq!(replies[1].as_ref().unwrap(), &Reply::Bool(false));

        tokio::time::advance(Duration::from_secs(10)).await;
        let mut pipe = Pipeline::atomic();
        pipe.expire_if_persistent("counter", Duration::from_secs(60));
        let replies = store.execute(pipe).await.unwrap();
        assert_eq!(replies[0].as_ref().unwrap(), &Reply::Bool(false));
        assert_eq!(store.ttl("counter").await.unwrap(), KeyTtl::Expires(Duration::from_secs(50)));
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let store = MemoryStore::new();
        store.set("lock", Bytes::from("holder-1"), SetOptions::new()).await.unwrap();

        assert!(!store.compare_and_delete("lock", Bytes::from("holder-2")).await.unwrap());
        assert!(store.compare_and_delete("lock", Bytes::from("holder-1")).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let store = MemoryStore::new();
        for key in ["app:a", "app:b", "apple", "other"] {
            store.set(key, Bytes::from("v"), SetOptions::new()).await.unwrap();
        }
        assert_eq!(store.scan_prefix("app:").await.unwrap(), keys(&["app:a", "app:b"]));
    }

    #[tokio::test]
    async fn test_pipeline_replies_per_command() {
        let store = MemoryStore::new();
        store.hset("h", "f", Bytes::from("v")).await.unwrap();

        let mut pipe = Pipeline::atomic();
        pipe.incr_by("n", 2).incr_by("h", 1).zcard("z");
        let replies = store.execute(pipe).await.unwrap();

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0].as_ref().unwrap(), &Reply::Int(2));
        assert!(matches!(replies[1], Err(StoreError::WrongType { .. })));
        assert_eq!(replies[2].as_ref().unwrap(), &Reply::Int(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_reclaims_expired_keys() {
        let store = MemoryStore::new();
        store
            .set("short", Bytes::from("v"), SetOptions::new().ttl(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(store.raw_len(), 1);

        tokio::time::sleep(SWEEP_INTERVAL * 2).await;
        assert_eq!(store.raw_len(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let store = MemoryStore::new();
        store.shutdown();
        store.shutdown();

        store.set("key", Bytes::from("value"), SetOptions::new()).await.unwrap();
        assert_eq!(store.get("key").await.unwrap(), Some(Bytes::from("value")));
    }

    #[tokio::test]
    async fn test_clone_shares_data() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("key", Bytes::from("value"), SetOptions::new()).await.unwrap();
        assert_eq!(other.get("key").await.unwrap(), Some(Bytes::from("value")));
    }
}
