// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entity persistence: the versioned string envelope.
//!
//! Persist-flagged entity fields travel as a JSON string payload:
//!
//! ```json
//! { "version": 1, "updated_at": 1700000000, "data": { ... }, "meta": { ... } }
//! ```
//!
//! The envelope is kept exactly as it appears on the wire so future
//! migrations can branch on `version` before any data merges into an
//! entity.

use crate::store::{KvStore, StoreError};
use aviary_core::{epoch_ms, ChangeSet, Entity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Current payload version.
pub const ENVELOPE_VERSION: u32 = 1;

/// Versioned persistence payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    /// Unix seconds of the last save.
    pub updated_at: u64,
    pub data: ChangeSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl Envelope {
    fn fresh() -> Self {
        Self {
            version: ENVELOPE_VERSION,
            updated_at: epoch_ms() / 1000,
            data: ChangeSet::new(),
            meta: None,
        }
    }
}

/// Persistence failure.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("payload decode failed: {0}")]
    Decode(String),

    #[error("payload encode failed: {0}")]
    Encode(String),

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),
}

/// Controller configuration.
#[derive(Debug, Clone, Default)]
pub struct PersistConfig {
    /// Prepended (with a `/`) to every storage key.
    pub key_prefix: Option<String>,
}

/// Entity save/load over an abstract store.
pub struct PersistenceController {
    store: Arc<dyn KvStore>,
    key_prefix: Option<String>,
}

impl PersistenceController {
    pub fn new(store: Arc<dyn KvStore>, config: PersistConfig) -> Self {
        Self { store, key_prefix: config.key_prefix }
    }

    fn storage_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    fn decode(payload: &str) -> Result<Envelope, PersistError> {
        serde_json::from_str(payload).map_err(|e| PersistError::Decode(e.to_string()))
    }

    fn encode(envelope: &Envelope) -> Result<String, PersistError> {
        serde_json::to_string(envelope).map_err(|e| PersistError::Encode(e.to_string()))
    }

    /// Migration hook: runs before any payload data reaches an entity.
    fn migrate(envelope: &mut Envelope) -> Result<(), PersistError> {
        match envelope.version {
            ENVELOPE_VERSION => Ok(()),
            version => Err(PersistError::UnsupportedVersion(version)),
        }
    }

    /// Serialize the entity's persist fields and write the envelope.
    pub async fn save(
        &self,
        entity: &Entity,
        key: &str,
        meta: Option<serde_json::Value>,
    ) -> Result<(), PersistError> {
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            updated_at: epoch_ms() / 1000,
            data: entity.serialize(),
            meta,
        };
        let payload = Self::encode(&envelope)?;
        self.store.put(&self.storage_key(key), payload).await?;
        tracing::debug!(entity = %entity.id(), key, "entity saved");
        Ok(())
    }

    /// Read, migrate, and merge a payload into the entity's data.
    ///
    /// A missing key is not an error: the entity simply has no saved
    /// state yet.
    pub async fn load(&self, entity: &Entity, key: &str) -> Result<Option<Envelope>, PersistError> {
        let Some(payload) = self.store.get(&self.storage_key(key)).await? else {
            return Ok(None);
        };
        let mut envelope = Self::decode(&payload)?;
        Self::migrate(&mut envelope)?;
        entity.deserialize(envelope.data.clone());
        tracing::debug!(entity = %entity.id(), key, "entity loaded");
        Ok(Some(envelope))
    }

    /// Atomic read-modify-write of the decoded payload. Starts from an
    /// empty envelope when the key is missing.
    pub async fn update(
        &self,
        key: &str,
        mutator: impl FnOnce(&mut Envelope),
    ) -> Result<(), PersistError> {
        let storage_key = self.storage_key(key);
        let mut envelope = match self.store.get(&storage_key).await? {
            Some(payload) => {
                let mut envelope = Self::decode(&payload)?;
                Self::migrate(&mut envelope)?;
                envelope
            }
            None => Envelope::fresh(),
        };
        mutator(&mut envelope);
        envelope.updated_at = epoch_ms() / 1000;
        let payload = Self::encode(&envelope)?;
        self.store.put(&storage_key, payload).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), PersistError> {
        self.store.remove(&self.storage_key(key)).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "persistence_tests.rs"]
mod tests;
