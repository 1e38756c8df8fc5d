//! Read-through computation with concurrent callers.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use keyward::{
    CacheError, KeyValue, KvConfig, PollBackoff, store::MemoryStore, testutil::CountingStore,
};
use rstest::rstest;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Report {
    rows: u32,
    title: String,
}

impl keyward::Record for Report {
    const SCHEMA: &'static str = "report";

    fn validate(&self) -> Result<(), String> {
        if self.title.is_empty() { Err("title must not be empty".into()) } else { Ok(()) }
    }
}

async fn build_report(calls: Arc<AtomicUsize>) -> Result<Report, std::io::Error> {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(250)).await;
    Ok(Report { rows: 12, title: "daily".into() })
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_computation() {
    let config = KvConfig::builder().namespace("reports").build().unwrap();
    let kv = KeyValue::new(MemoryStore::new(), config);
    let calls = Arc::new(AtomicUsize::new(0));

    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        let kv = kv.clone();
        let calls = Arc::clone(&calls);
        tasks.spawn(async move {
            kv.get_or_compute("daily", || build_report(calls), Some(Duration::from_secs(60))).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let report = joined.expect("task panicked").expect("get_or_compute failed");
        assert_eq!(report, Report { rows: 12, title: "daily".into() });
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stored: Option<Report> = kv.get("daily").await.unwrap();
    assert_eq!(stored.map(|r| r.rows), Some(12));
}

#[rstest]
#[case::zero(Duration::ZERO)]
#[case::sub_second(Duration::from_millis(300))]
#[tokio::test(start_paused = true)]
async fn short_ttl_still_guards_the_computation(#[case] ttl: Duration) {
    let kv = KeyValue::new(MemoryStore::new(), KvConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut tasks = JoinSet::new();
    for _ in 0..5 {
        let kv = kv.clone();
        let calls = Arc::clone(&calls);
        tasks.spawn(async move {
            kv.get_or_compute("z", || build_report(calls), Some(ttl)).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        joined.expect("task panicked").expect("get_or_compute failed");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn exponential_backoff_reduces_polling() {
    let config = KvConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .poll_backoff(PollBackoff::Exponential {
            factor: 2.0,
            max_interval: Duration::from_millis(160),
        })
        .build()
        .unwrap();
    let kv = KeyValue::new(CountingStore::new(MemoryStore::new()), config);
    let calls = Arc::new(AtomicUsize::new(0));

    let holder = {
        let kv = kv.clone();
        let calls = Arc::clone(&calls);
        tokio::spawn(async move { kv.get_or_compute("daily", || build_report(calls), None).await })
    };
    // Let the holder take the lock first
    tokio::time::sleep(Duration::from_millis(1)).await;

    let must_not_compute = || async { Err(std::io::Error::other("waiter must not compute")) };
    let waited: Report = kv.get_or_compute("daily", must_not_compute, None).await.unwrap();
    assert_eq!(waited.rows, 12);
    holder.await.unwrap().unwrap();

    // 250ms of waiting at 10, 20, 40, 80, 160ms intervals is a handful of
    // polls, not the 25 a fixed 10ms interval would take
    assert!(kv.store().count("GET") < 12, "too many polls: {}", kv.store().count("GET"));
}

#[tokio::test]
async fn invalid_computed_value_is_not_stored() {
    let kv = KeyValue::new(MemoryStore::new(), KvConfig::default());

    let result = kv
        .get_or_compute(
            "empty",
            || async { Ok::<_, std::io::Error>(Report { rows: 0, title: String::new() }) },
            None,
        )
        .await;

    assert!(matches!(result, Err(CacheError::Encode { schema: "report", .. })), "got {result:?}");
    assert_eq!(kv.get_raw("empty").await.unwrap(), None);
    assert!(!kv.exists("empty:lock").await.unwrap());
}

#[tokio::test]
async fn corrupt_stored_value_is_reported() {
    let kv = KeyValue::new(MemoryStore::new(), KvConfig::default());
    kv.set_raw("daily", bytes::Bytes::from_static(b"{\"rows\":"), keyward::store::SetOptions::new())
        .await
        .unwrap();

    let fresh = || async { Ok::<_, std::io::Error>(Report { rows: 1, title: "x".into() }) };
    let result = kv.get_or_compute("daily", fresh, None).await;
    assert!(result.as_ref().is_err_and(CacheError::is_corrupt_data), "got {result:?}");
}
