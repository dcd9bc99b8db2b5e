// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replication and command payloads.

use aviary_core::{ChangeSet, EntityId};
use serde::{Deserialize, Serialize};

/// Server → clients broadcast.
///
/// Serializes with `{"type": "entity:update", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Broadcast {
    /// Committed deltas of replicate-flagged fields for one entity.
    #[serde(rename = "entity:update")]
    EntityUpdate { entity_id: EntityId, packet: ChangeSet },
}

/// Client → server fire-and-forget command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCommand {
    pub entity_id: EntityId,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<aviary_core::Value>,
}

impl EntityCommand {
    pub fn new(entity_id: impl Into<EntityId>, command: impl Into<String>) -> Self {
        Self { entity_id: entity_id.into(), command: command.into(), args: Vec::new() }
    }

    pub fn arg(mut self, value: impl Into<aviary_core::Value>) -> Self {
        self.args.push(value.into());
        self
    }
}

/// Minimum data a client needs to seed one local entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySeed {
    pub entity_id: EntityId,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Current committed data (schema fields).
    pub data: ChangeSet,
    /// Persist-flagged subset, for clients that mirror saved state.
    #[serde(default, skip_serializing_if = "ChangeSet::is_empty")]
    pub persist: ChangeSet,
}
