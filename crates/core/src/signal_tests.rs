// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};

#[test]
fn connect_receives_every_fire() {
    let signal: Signal<u32> = Signal::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let _conn = signal.connect(move |v| sink.lock().push(*v));

    signal.fire(1);
    signal.fire(2);
    assert_eq!(*seen.lock(), vec![1, 2]);
}

#[test]
fn once_fires_a_single_time() {
    let signal: Signal<()> = Signal::new();
    let count = Arc::new(AtomicU32::new(0));

    let sink = Arc::clone(&count);
    let _conn = signal.once(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    signal.fire(());
    signal.fire(());
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(signal.handler_count(), 0);
}

#[test]
fn disconnect_stops_delivery() {
    let signal: Signal<u32> = Signal::new();
    let count = Arc::new(AtomicU32::new(0));

    let sink = Arc::clone(&count);
    let conn = signal.connect(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    signal.fire(1);
    conn.disconnect();
    signal.fire(2);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn handlers_run_in_connect_order() {
    let signal: Signal<()> = Signal::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for tag in ["a", "b", "c"] {
        let sink = Arc::clone(&order);
        // Connections held by the signal; scoped cleanup is not under test.
        std::mem::forget(signal.connect(move |_| sink.lock().push(tag)));
    }

    signal.fire(());
    assert_eq!(*order.lock(), vec!["a", "b", "c"]);
}

#[test]
fn handler_may_reenter_the_signal() {
    let signal: Signal<u32> = Signal::new();
    let count = Arc::new(AtomicU32::new(0));

    let inner_signal = signal.clone();
    let sink = Arc::clone(&count);
    let _conn = signal.connect(move |v| {
        sink.fetch_add(1, Ordering::SeqCst);
        if *v == 1 {
            inner_signal.fire(2);
        }
    });

    signal.fire(1);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn clear_removes_handlers() {
    let signal: Signal<()> = Signal::new();
    let count = Arc::new(AtomicU32::new(0));

    let sink = Arc::clone(&count);
    std::mem::forget(signal.connect(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    }));

    signal.clear();
    signal.fire(());
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn wait_resumes_on_fire() {
    let signal: Signal<u32> = Signal::new();

    let waiter = signal.clone();
    let handle = tokio::spawn(async move { waiter.wait(None).await });
    tokio::task::yield_now().await;

    signal.fire(7);
    assert_eq!(handle.await.unwrap(), Some(7));
}

#[tokio::test(start_paused = true)]
async fn wait_times_out_to_none() {
    let signal: Signal<u32> = Signal::new();
    let got = signal.wait(Some(Duration::from_millis(50))).await;
    assert_eq!(got, None);
}
