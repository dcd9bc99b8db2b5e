// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The key-value store seam.
//!
//! The runtime treats persistent storage as an opaque string-keyed,
//! string-valued store behind this trait. Hosts plug in their real
//! backend; tests use [`crate::MemoryStore`]; production callers usually
//! wrap either in [`crate::RetryStore`].

use async_trait::async_trait;
use thiserror::Error;

/// Store operation failure.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("io failure: {0}")]
    Io(String),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Abstract external key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
