// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn put_get_remove_round_trip() {
    let store = MemoryStore::new();

    store.put("door-1", "payload".into()).await.unwrap();
    assert_eq!(store.get("door-1").await.unwrap(), Some("payload".into()));

    store.remove("door-1").await.unwrap();
    assert_eq!(store.get("door-1").await.unwrap(), None);
    assert!(store.is_empty());
}

#[tokio::test]
async fn missing_key_reads_none() {
    let store = MemoryStore::new();
    assert_eq!(store.get("nothing").await.unwrap(), None);
}

#[tokio::test]
async fn injected_failures_surface_then_clear() {
    let store = MemoryStore::new();
    store.fail_next(2);

    assert!(store.put("k", "v".into()).await.is_err());
    assert!(store.get("k").await.is_err());
    // Budget spent; operations succeed again.
    store.put("k", "v".into()).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some("v".into()));
}

#[tokio::test]
async fn counters_track_successful_operations() {
    let store = MemoryStore::new();
    store.put("a", "1".into()).await.unwrap();
    store.put("b", "2".into()).await.unwrap();
    store.get("a").await.unwrap();

    assert_eq!(store.write_count(), 2);
    assert_eq!(store.read_count(), 1);
}
