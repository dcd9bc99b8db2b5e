// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local multicast signals.
//!
//! A [`Signal`] fans one fired value out to every connected handler and
//! every pending waiter. Handlers run on the firing thread, in connect
//! order, after the signal's internal lock has been released, so a handler
//! may freely connect, disconnect, or fire again. Asynchronous consumers
//! use [`Signal::wait`], which parks on a oneshot channel until the next
//! fire (or a timeout).

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

type HandlerFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Handler<T> {
    id: u64,
    callback: HandlerFn<T>,
    once: bool,
}

struct SignalInner<T> {
    next_id: u64,
    handlers: Vec<Handler<T>>,
    waiters: Vec<oneshot::Sender<T>>,
    fire_count: u64,
}

impl<T> Default for SignalInner<T> {
    fn default() -> Self {
        Self { next_id: 0, handlers: Vec::new(), waiters: Vec::new(), fire_count: 0 }
    }
}

/// Multi-producer multi-consumer local event.
pub struct Signal<T> {
    inner: Arc<Mutex<SignalInner<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Send + 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Signal<T> {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(SignalInner::default())) }
    }

    fn register(&self, callback: HandlerFn<T>, once: bool) -> Connection {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.handlers.push(Handler { id, callback, once });
            id
        };
        let weak = Arc::downgrade(&self.inner);
        Connection::new(move || disconnect_handler(&weak, id))
    }

    /// Connect a handler invoked on every fire until disconnected.
    pub fn connect(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Connection {
        self.register(Arc::new(callback), false)
    }

    /// Connect a handler invoked on the next fire only.
    pub fn once(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Connection {
        self.register(Arc::new(callback), true)
    }

    /// Number of currently connected handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    /// Total number of fires since creation.
    pub fn fire_count(&self) -> u64 {
        self.inner.lock().fire_count
    }

    /// Disconnect every handler and drop every waiter.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.handlers.clear();
        inner.waiters.clear();
    }
}

impl<T: Clone + Send + 'static> Signal<T> {
    /// Fire the signal, delivering `value` to all handlers and waiters.
    ///
    /// Handlers run on the calling thread in connect order; once-handlers
    /// are removed before any handler runs.
    pub fn fire(&self, value: T) {
        let (callbacks, waiters) = {
            let mut inner = self.inner.lock();
            inner.fire_count += 1;
            let callbacks: Vec<HandlerFn<T>> =
                inner.handlers.iter().map(|h| Arc::clone(&h.callback)).collect();
            inner.handlers.retain(|h| !h.once);
            let waiters = std::mem::take(&mut inner.waiters);
            (callbacks, waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(value.clone());
        }
        for callback in callbacks {
            callback(&value);
        }
    }

    /// Wait for the next fire, returning its value, or `None` on timeout.
    pub async fn wait(&self, timeout: Option<Duration>) -> Option<T> {
        let rx = {
            let (tx, rx) = oneshot::channel();
            self.inner.lock().waiters.push(tx);
            rx
        };
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(Ok(value)) => Some(value),
                _ => None,
            },
            None => rx.await.ok(),
        }
    }
}

fn disconnect_handler<T>(weak: &Weak<Mutex<SignalInner<T>>>, id: u64) {
    if let Some(inner) = weak.upgrade() {
        inner.lock().handlers.retain(|h| h.id != id);
    }
}

/// Handle to a connected signal handler.
///
/// Dropping the connection does NOT disconnect; call [`Connection::disconnect`]
/// or hand it to an entity/machine via `manage` for scoped cleanup.
pub struct Connection {
    disconnect: Option<Box<dyn FnOnce() + Send>>,
}

impl Connection {
    pub(crate) fn new(disconnect: impl FnOnce() + Send + 'static) -> Self {
        Self { disconnect: Some(Box::new(disconnect)) }
    }

    /// Remove the handler from its signal. Idempotent by construction.
    pub fn disconnect(mut self) {
        if let Some(f) = self.disconnect.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("armed", &self.disconnect.is_some()).finish()
    }
}

#[cfg(test)]
#[path = "signal_tests.rs"]
mod tests;
