//! Caching, rate limiting and key namespacing over a key-value store.
//!
//! This crate layers application-level data access on top of any store
//! implementing [`KvStore`](store::KvStore): typed reads and writes through a
//! [`KeyValue`] facade, memoized async functions that let only one concurrent
//! caller compute a missing value, read-through computation, and quota
//! enforcement with sliding or fixed windows. Every key passes through the
//! namespace resolver, so several tenants or environments can share one store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Application                            │
//! ├───────────────┬─────────────────┬───────────────────────────┤
//! │   Memoized    │ get_or_compute  │       RateLimiter         │
//! │ (herd-safe    │ (lease lock,    │  (sorted-set sliding or   │
//! │  memoization) │  read-through)  │   INCR fixed windows)     │
//! ├───────────────┴─────────────────┴───────────────────────────┤
//! │                 KeyValue facade                             │
//! │  Keyspace (namespacing) │ codec (Record) │ BatchCoordinator │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 KvStore trait                               │
//! │        execute(Pipeline) -> per-command replies             │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │ MemoryStore  │      any other backend (Redis, ...)          │
//! │ (testing)    │                                              │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use keyward::{
//!     KeyValue, KvConfig, MemoizeOptions, RateLimiter, WindowMode,
//!     store::{MemoryStore, SetOptions},
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = KvConfig::builder().namespace("app").build()?;
//!     let kv = KeyValue::new(MemoryStore::new(), config);
//!
//!     // Typed values, stored as JSON under "app:greeting"
//!     kv.set("greeting", &"hello".to_owned(), SetOptions::new()).await?;
//!     let greeting: Option<String> = kv.get("greeting").await?;
//!     assert_eq!(greeting.as_deref(), Some("hello"));
//!
//!     // Memoized function
//!     let double = kv.memoize(
//!         "double",
//!         MemoizeOptions::new().ttl(Duration::from_secs(60)).thundering_herd_protection(true),
//!         |(n,): (u64,)| async move { Ok::<_, std::io::Error>(n * 2) },
//!     );
//!     assert_eq!(double.call((21,)).await?, 42);
//!
//!     // Quotas
//!     let limiter = RateLimiter::new(kv.clone());
//!     let decision = limiter.check_rate_limit("login:alice", 5, 60, WindowMode::Sliding).await?;
//!     assert!(decision.allowed);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Store operations return [`StoreResult<T>`]; everything above the store
//! returns [`CacheResult<T>`]. Connection failures and timeouts surface as
//! [`CacheError::StoreUnavailable`], unreadable stored bytes as
//! [`CacheError::Decode`] or [`CacheError::SchemaValidation`]. The memoizer
//! is the exception: it never surfaces cache errors and falls back to calling
//! the wrapped function.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers (failing and counting
//!   stores, key generators, assertion macros). Enable this in `[dev-dependencies]` for
//!   integration tests.
//! - **`failpoints`**: Compiles the `fail` fail points in the memory store (`memory-store-execute`)
//!   and the lease lock (`lock-release`).

#![deny(unsafe_code)]

pub mod batch;
pub mod cache_key;
pub mod codec;
mod compute;
pub mod config;
pub mod error;
mod facade;
mod lock;
pub mod memoize;
pub mod metrics;
pub mod namespace;
pub mod rate_limit;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use batch::{BatchConfig, BatchCoordinator, BatchStats};
pub use cache_key::{CacheArgs, CallArgs};
pub use codec::Record;
pub use config::{KvConfig, PollBackoff};
pub use error::{BoxError, CacheError, CacheResult, ConfigError, StoreError, StoreResult};
pub use facade::KeyValue;
pub use memoize::{MemoizeOptions, Memoized, SkipPredicate};
pub use metrics::{MemoStats, MemoStatsSnapshot};
pub use namespace::Keyspace;
pub use rate_limit::{RateLimitDecision, RateLimiter, WindowMode};
pub use store::{KvStore, MemoryStore};
