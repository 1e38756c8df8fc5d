//! Commands, replies and pipelines.
//!
//! Every interaction with a [`KvStore`](super::KvStore) is expressed as a
//! [`Command`]. Commands are grouped into a [`Pipeline`], sent in one round
//! trip, and answered with one [`Reply`] per command in submission order.
//!
//! An atomic pipeline is applied by the store without interleaving commands
//! from other callers (MULTI/EXEC or a server-side script, depending on the
//! store). A non-atomic pipeline only saves round trips.

use std::time::Duration;

use bytes::Bytes;

use crate::error::{StoreError, StoreResult};

/// Precondition attached to a `SET`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetCondition {
    /// Write unconditionally.
    #[default]
    Always,
    /// Write only if the key does not exist (`NX`).
    IfAbsent,
    /// Write only if the key already exists (`XX`).
    IfPresent,
}

/// Options for a `SET`.
///
/// A `SET` without a TTL clears any expiry previously attached to the key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    ttl: Option<Duration>,
    condition: SetCondition,
}

impl SetOptions {
    /// Unconditional write without expiry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire the key after `ttl` (`EX`).
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets or clears the expiry.
    #[must_use]
    pub fn maybe_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Only write if the key is absent (`NX`).
    #[must_use]
    pub fn if_absent(mut self) -> Self {
        self.condition = SetCondition::IfAbsent;
        self
    }

    /// Only write if the key is present (`XX`).
    #[must_use]
    pub fn if_present(mut self) -> Self {
        self.condition = SetCondition::IfPresent;
        self
    }

    /// Returns the expiry, if any.
    #[must_use]
    pub fn expiry(&self) -> Option<Duration> {
        self.ttl
    }

    /// Returns the write precondition.
    #[must_use]
    pub fn condition(&self) -> SetCondition {
        self.condition
    }
}

/// Remaining lifetime of a key, as reported by `TTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires after the given duration.
    Expires(Duration),
}

/// A single store command.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Command {
    /// `GET key`
    Get { key: String },
    /// `SET key value [EX ttl] [NX|XX]`
    Set { key: String, value: Bytes, options: SetOptions },
    /// `MGET key...`
    MGet { keys: Vec<String> },
    /// `MSET key value...`
    MSet { entries: Vec<(String, Bytes)> },
    /// `DEL key...`
    Del { keys: Vec<String> },
    /// Delete `key` only if it currently holds `expected`.
    DelIfEquals { key: String, expected: Bytes },
    /// `EXISTS key...`
    Exists { keys: Vec<String> },
    /// `EXPIRE key ttl`
    Expire { key: String, ttl: Duration },
    /// `EXPIRE key ttl NX`: only sets the expiry of a key that has none.
    ExpireIfPersistent { key: String, ttl: Duration },
    /// `TTL key`
    Ttl { key: String },
    /// `INCRBY key delta`
    IncrBy { key: String, delta: i64 },
    /// `HGET key field`
    HGet { key: String, field: String },
    /// `HSET key field value`
    HSet { key: String, field: String, value: Bytes },
    /// `HGETALL key`
    HGetAll { key: String },
    /// `HDEL key field...`
    HDel { key: String, fields: Vec<String> },
    /// `LPUSH key value...`
    LPush { key: String, values: Vec<Bytes> },
    /// `RPUSH key value...`
    RPush { key: String, values: Vec<Bytes> },
    /// `LPOP key`
    LPop { key: String },
    /// `RPOP key`
    RPop { key: String },
    /// `LRANGE key start stop` (inclusive, negative indexes count from the end)
    LRange { key: String, start: i64, stop: i64 },
    /// `SADD key member...`
    SAdd { key: String, members: Vec<String> },
    /// `SMEMBERS key`
    SMembers { key: String },
    /// `SREM key member...`
    SRem { key: String, members: Vec<String> },
    /// `ZADD key score member...`
    ZAdd { key: String, members: Vec<(String, f64)> },
    /// `ZRANGE key start stop` by rank, lowest score first
    ZRange { key: String, start: i64, stop: i64 },
    /// `ZRANGEBYSCORE key min max` (both bounds inclusive)
    ZRangeByScore { key: String, min: f64, max: f64 },
    /// `ZREMRANGEBYSCORE key min max` (both bounds inclusive)
    ZRemRangeByScore { key: String, min: f64, max: f64 },
    /// `ZREM key member...`
    ZRem { key: String, members: Vec<String> },
    /// `ZCARD key`
    ZCard { key: String },
    /// Every live key starting with `prefix` (`SCAN MATCH prefix*`).
    ScanPrefix { prefix: String },
    /// `PING`
    Ping,
}

impl Command {
    /// Returns the command name, used in logs and error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "GET",
            Self::Set { .. } => "SET",
            Self::MGet { .. } => "MGET",
            Self::MSet { .. } => "MSET",
            Self::Del { .. } => "DEL",
            Self::DelIfEquals { .. } => "DELIFEQ",
            Self::Exists { .. } => "EXISTS",
            Self::Expire { .. } => "EXPIRE",
            Self::ExpireIfPersistent { .. } => "EXPIRE NX",
            Self::Ttl { .. } => "TTL",
            Self::IncrBy { .. } => "INCRBY",
            Self::HGet { .. } => "HGET",
            Self::HSet { .. } => "HSET",
            Self::HGetAll { .. } => "HGETALL",
            Self::HDel { .. } => "HDEL",
            Self::LPush { .. } => "LPUSH",
            Self::RPush { .. } => "RPUSH",
            Self::LPop { .. } => "LPOP",
            Self::RPop { .. } => "RPOP",
            Self::LRange { .. } => "LRANGE",
            Self::SAdd { .. } => "SADD",
            Self::SMembers { .. } => "SMEMBERS",
            Self::SRem { .. } => "SREM",
            Self::ZAdd { .. } => "ZADD",
            Self::ZRange { .. } => "ZRANGE",
            Self::ZRangeByScore { .. } => "ZRANGEBYSCORE",
            Self::ZRemRangeByScore { .. } => "ZREMRANGEBYSCORE",
            Self::ZRem { .. } => "ZREM",
            Self::ZCard { .. } => "ZCARD",
            Self::ScanPrefix { .. } => "SCAN",
            Self::Ping => "PING",
        }
    }
}

/// The store's answer to one [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Absent value.
    Nil,
    /// Acknowledgement without payload.
    Ok,
    /// Whether a conditional command took effect.
    Bool(bool),
    /// A count or counter value.
    Int(i64),
    /// A single stored value.
    Value(Bytes),
    /// Values in request order, `None` for absent keys.
    Values(Vec<Option<Bytes>>),
    /// Hash fields and their values.
    Fields(Vec<(String, Bytes)>),
    /// List elements in order.
    Items(Vec<Bytes>),
    /// Keys, set members or sorted-set members.
    Members(Vec<String>),
    /// Remaining lifetime of a key.
    Ttl(KeyTtl),
}

impl Reply {
    /// Interprets the reply as an optional single value.
    pub fn into_value(self, command: &'static str) -> StoreResult<Option<Bytes>> {
        match self {
            Self::Nil => Ok(None),
            Self::Value(bytes) => Ok(Some(bytes)),
            other => Err(StoreError::unexpected_reply(command, other)),
        }
    }

    /// Interprets the reply as a flag.
    pub fn into_bool(self, command: &'static str) -> StoreResult<bool> {
        match self {
            Self::Bool(flag) => Ok(flag),
            Self::Ok => Ok(true),
            Self::Nil => Ok(false),
            other => Err(StoreError::unexpected_reply(command, other)),
        }
    }

    /// Interprets the reply as an integer.
    pub fn into_int(self, command: &'static str) -> StoreResult<i64> {
        match self {
            Self::Int(n) => Ok(n),
            other => Err(StoreError::unexpected_reply(command, other)),
        }
    }

    /// Interprets the reply as a non-negative count.
    pub fn into_count(self, command: &'static str) -> StoreResult<u64> {
        let n = self.into_int(command)?;
        u64::try_from(n).map_err(|_| StoreError::unexpected_reply(command, n))
    }

    /// Interprets the reply as list elements.
    pub fn into_items(self, command: &'static str) -> StoreResult<Vec<Bytes>> {
        match self {
            Self::Items(items) => Ok(items),
            Self::Nil => Ok(Vec::new()),
            other => Err(StoreError::unexpected_reply(command, other)),
        }
    }

    /// Interprets the reply as a list of optional values.
    pub fn into_values(self, command: &'static str) -> StoreResult<Vec<Option<Bytes>>> {
        match self {
            Self::Values(values) => Ok(values),
            other => Err(StoreError::unexpected_reply(command, other)),
        }
    }

    /// Interprets the reply as hash fields.
    pub fn into_fields(self, command: &'static str) -> StoreResult<Vec<(String, Bytes)>> {
        match self {
            Self::Fields(fields) => Ok(fields),
            Self::Nil => Ok(Vec::new()),
            other => Err(StoreError::unexpected_reply(command, other)),
        }
    }

    /// Interprets the reply as a list of keys or members.
    pub fn into_members(self, command: &'static str) -> StoreResult<Vec<String>> {
        match self {
            Self::Members(members) => Ok(members),
            Self::Nil => Ok(Vec::new()),
            other => Err(StoreError::unexpected_reply(command, other)),
        }
    }

    /// Interprets the reply as a key lifetime.
    pub fn into_ttl(self, command: &'static str) -> StoreResult<KeyTtl> {
        match self {
            Self::Ttl(ttl) => Ok(ttl),
            other => Err(StoreError::unexpected_reply(command, other)),
        }
    }

    /// Interprets the reply as an acknowledgement.
    pub fn into_ok(self, command: &'static str) -> StoreResult<()> {
        match self {
            Self::Ok => Ok(()),
            other => Err(StoreError::unexpected_reply(command, other)),
        }
    }
}

/// A batch of commands sent to the store in one round trip.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use bytes::Bytes;
/// use keyward::store::Pipeline;
///
/// let mut pipe = Pipeline::atomic();
/// pipe.incr_by("hits", 1).expire("hits", Duration::from_secs(60));
/// assert_eq!(pipe.len(), 2);
/// assert!(pipe.is_atomic());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    commands: Vec<Command>,
    atomic: bool,
}

impl Pipeline {
    /// Creates an empty, non-atomic pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty pipeline whose commands the store applies atomically.
    #[must_use]
    pub fn atomic() -> Self {
        Self { commands: Vec::new(), atomic: true }
    }

    /// Whether the commands must be applied without interleaving.
    #[must_use]
    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    /// Number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether no command is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Queued commands in submission order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Consumes the pipeline, yielding its commands.
    #[must_use]
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    /// Queues an arbitrary command.
    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Queues `SET`.
    pub fn set(&mut self, key: impl Into<String>, value: Bytes, options: SetOptions) -> &mut Self {
        self.push(Command::Set { key: key.into(), value, options })
    }

    /// Queues `MSET`.
    pub fn mset(&mut self, entries: Vec<(String, Bytes)>) -> &mut Self {
        self.push(Command::MSet { entries })
    }

    /// Queues `EXPIRE`.
    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.push(Command::Expire { key: key.into(), ttl })
    }

    /// Queues `EXPIRE NX`.
    pub fn expire_if_persistent(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.push(Command::ExpireIfPersistent { key: key.into(), ttl })
    }

    /// Queues `INCRBY`.
    pub fn incr_by(&mut self, key: impl Into<String>, delta: i64) -> &mut Self {
        self.push(Command::IncrBy { key: key.into(), delta })
    }

    /// Queues `ZADD` of a single member.
    pub fn zadd(
        &mut self,
        key: impl Into<String>,
        member: impl Into<String>,
        score: f64,
    ) -> &mut Self {
        self.push(Command::ZAdd { key: key.into(), members: vec![(member.into(), score)] })
    }

    /// Queues `ZREMRANGEBYSCORE`.
    pub fn zrem_range_by_score(
        &mut self,
        key: impl Into<String>,
        min: f64,
        max: f64,
    ) -> &mut Self {
        self.push(Command::ZRemRangeByScore { key: key.into(), min, max })
    }

    /// Queues `ZCARD`.
    pub fn zcard(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::ZCard { key: key.into() })
    }
}
