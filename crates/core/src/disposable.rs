// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Managed cleanup resources.
//!
//! Entities and machines accept disposables via `manage` and release them
//! LIFO on destruction. Anything that can be reduced to a one-shot
//! callable fits: signal connections, abort handles, custom teardown.

use crate::signal::Connection;

/// A one-shot cleanup action.
pub struct Disposable {
    run: Option<Box<dyn FnOnce() + Send>>,
    label: &'static str,
}

impl Disposable {
    /// Wrap an arbitrary cleanup closure.
    pub fn call(f: impl FnOnce() + Send + 'static) -> Self {
        Self { run: Some(Box::new(f)), label: "callback" }
    }

    /// Invoke the cleanup. Idempotent by construction.
    pub fn dispose(mut self) {
        self.run_once();
    }

    pub(crate) fn run_once(&mut self) {
        if let Some(f) = self.run.take() {
            f();
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl From<Connection> for Disposable {
    fn from(conn: Connection) -> Self {
        Self { run: Some(Box::new(move || conn.disconnect())), label: "connection" }
    }
}

impl From<tokio::task::JoinHandle<()>> for Disposable {
    fn from(handle: tokio::task::JoinHandle<()>) -> Self {
        Self { run: Some(Box::new(move || handle.abort())), label: "task" }
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("label", &self.label)
            .field("armed", &self.run.is_some())
            .finish()
    }
}
