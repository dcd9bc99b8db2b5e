// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! aviary-storage: key-value store abstraction with retry and write
//! throttling, plus the versioned persistence envelope for entities.

pub mod memory;
pub mod persistence;
pub mod retry;
pub mod store;

pub use memory::MemoryStore;
pub use persistence::{
    Envelope, PersistConfig, PersistError, PersistenceController, ENVELOPE_VERSION,
};
pub use retry::{RetryConfig, RetryStore};
pub use store::{KvStore, StoreError};
