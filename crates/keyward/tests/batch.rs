//! Batch reads and writes through the facade.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use keyward::{
    BatchConfig, KeyValue, KvConfig, KvStore,
    store::{KeyTtl, MemoryStore, SetOptions},
    testutil::{CountingStore, FaultyStore, make_key},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    user: String,
    scopes: Vec<String>,
}

impl keyward::Record for Session {
    const SCHEMA: &'static str = "session";
}

fn session(user: &str) -> Session {
    Session { user: user.to_owned(), scopes: vec!["read".into()] }
}

#[tokio::test]
async fn mixed_batch_returns_only_decodable_entries() {
    let config = KvConfig::builder().namespace("auth").build().unwrap();
    let kv = KeyValue::new(MemoryStore::new(), config);
    kv.set("s1", &session("alice"), SetOptions::new()).await.unwrap();
    kv.set_raw("s3", Bytes::from_static(b"\x00\x01not json"), SetOptions::new()).await.unwrap();

    let (found, stats) = kv.mget_with_stats::<Session, _>(&["s1", "s2", "s3"]).await.unwrap();

    assert_eq!(found, HashMap::from([("s1".to_owned(), session("alice"))]));
    assert_eq!(stats.requested, 3);
    assert_eq!(stats.returned, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.round_trips, 1);
}

#[tokio::test]
async fn schema_mismatch_is_skipped_not_fatal() {
    let kv = KeyValue::new(MemoryStore::new(), KvConfig::default());
    kv.set_raw("s1", Bytes::from_static(br#"{"user":7}"#), SetOptions::new()).await.unwrap();
    kv.set("s2", &session("bob"), SetOptions::new()).await.unwrap();

    let found: HashMap<String, Session> = kv.mget(&["s1", "s2"]).await.unwrap();
    assert_eq!(found.keys().collect::<Vec<_>>(), ["s2"]);
}

#[tokio::test(start_paused = true)]
async fn chunked_write_then_read_round_trips() {
    let batch = BatchConfig::builder().max_batch_size(4).build().unwrap();
    let config = KvConfig::builder().batch(batch).build().unwrap();
    let kv = KeyValue::new(CountingStore::new(MemoryStore::new()), config);

    let entries: Vec<(String, Session)> =
        (0..10).map(|i| (make_key("s", i), session(&format!("user-{i}")))).collect();
    let written = kv.mset(&entries, Some(Duration::from_secs(30))).await.unwrap();
    assert_eq!(written.returned, 10);
    assert_eq!(written.round_trips, 3);
    assert_eq!(kv.store().count("MSET"), 3);
    assert_eq!(kv.store().count("EXPIRE"), 10);

    let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
    let found: HashMap<String, Session> = kv.mget(&keys).await.unwrap();
    assert_eq!(found.len(), 10);
    assert_eq!(found["s:000007"].user, "user-7");
    assert_eq!(kv.store().count("MGET"), 3);

    let ttl = kv.ttl("s:000009").await.unwrap();
    assert!(matches!(ttl, KeyTtl::Expires(ttl) if ttl <= Duration::from_secs(30)), "got {ttl:?}");

    tokio::time::advance(Duration::from_secs(31)).await;
    let found: HashMap<String, Session> = kv.mget(&keys).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn store_failure_fails_the_whole_batch() {
    let store = FaultyStore::new(MemoryStore::new()).fail_on("MGET");
    let kv = KeyValue::new(store, KvConfig::default());
    kv.set("s1", &session("alice"), SetOptions::new()).await.unwrap();

    let result = kv.mget::<Session, _>(&["s1"]).await;
    keyward::assert_store_unavailable!(result);

    // Writes are unaffected
    assert!(kv.store().inner().exists(&["s1".to_owned()]).await.unwrap() == 1);
}
