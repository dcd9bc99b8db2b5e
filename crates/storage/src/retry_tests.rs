// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::memory::MemoryStore;

fn wrapped(store: &Arc<MemoryStore>) -> RetryStore {
    RetryStore::new(Arc::clone(store) as Arc<dyn KvStore>, RetryConfig::default())
}

#[tokio::test(start_paused = true)]
async fn retries_transient_failures() {
    let backing = Arc::new(MemoryStore::new());
    let store = wrapped(&backing);

    backing.fail_next(2);
    store.put("door-1", "payload".into()).await.unwrap();
    assert_eq!(backing.raw("door-1"), Some("payload".into()));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_as_error() {
    let backing = Arc::new(MemoryStore::new());
    let store = RetryStore::new(
        Arc::clone(&backing) as Arc<dyn KvStore>,
        RetryConfig { retries: 2, ..RetryConfig::default() },
    );

    backing.fail_next(10);
    let err = store.put("door-1", "payload".into()).await.unwrap_err();
    match err {
        StoreError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn without_retry_fails_on_first_error() {
    let backing = Arc::new(MemoryStore::new());
    let store = wrapped(&backing).without_retry();

    backing.fail_next(1);
    assert!(store.put("door-1", "payload".into()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn read_cache_serves_repeat_reads() {
    let backing = Arc::new(MemoryStore::new());
    let store = wrapped(&backing).with_read_cache();

    backing.put("door-1", "payload".into()).await.unwrap();
    assert_eq!(store.get("door-1").await.unwrap(), Some("payload".into()));
    assert_eq!(store.get("door-1").await.unwrap(), Some("payload".into()));

    // One backing read; the second came from the cache.
    assert_eq!(backing.read_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn throttled_writes_coalesce_latest_wins() {
    let backing = Arc::new(MemoryStore::new());
    let store = wrapped(&backing).throttle_writes(Duration::from_secs(1));

    store.put("door-1", "v1".into()).await.unwrap();
    assert_eq!(backing.raw("door-1"), Some("v1".into()));

    // Inside the window: both coalesce; only the latest survives.
    store.put("door-1", "v2".into()).await.unwrap();
    store.put("door-1", "v3".into()).await.unwrap();
    assert_eq!(backing.raw("door-1"), Some("v1".into()));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(backing.raw("door-1"), Some("v3".into()));
    assert_eq!(backing.write_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn throttle_cache_reads_see_latest_value() {
    let backing = Arc::new(MemoryStore::new());
    let store =
        wrapped(&backing).throttle_writes(Duration::from_secs(1)).with_read_cache();

    store.put("door-1", "v1".into()).await.unwrap();
    store.put("door-1", "v2".into()).await.unwrap();

    // The flush has not happened, but readers observe the coalesced value.
    assert_eq!(store.get("door-1").await.unwrap(), Some("v2".into()));
}

#[tokio::test(start_paused = true)]
async fn remove_clears_cache_and_throttle() {
    let backing = Arc::new(MemoryStore::new());
    let store = wrapped(&backing).throttle_writes(Duration::from_secs(1)).with_read_cache();

    store.put("door-1", "v1".into()).await.unwrap();
    store.remove("door-1").await.unwrap();

    assert_eq!(store.get("door-1").await.unwrap(), None);
    // A write after removal is outside any window and goes straight through.
    store.put("door-1", "v2".into()).await.unwrap();
    assert_eq!(backing.raw("door-1"), Some("v2".into()));
}
