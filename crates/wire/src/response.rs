// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service manager responses.

use crate::message::EntitySeed;
use aviary_core::Value;
use serde::{Deserialize, Serialize};

/// Reply to a [`crate::ServiceRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceResponse {
    Ok,
    Snapshot { snapshot: serde_json::Value },
    EntitySnapshot { entities: Vec<EntitySeed> },
    /// Result of a named request handler.
    Value {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    Error { message: String },
}

impl ServiceResponse {
    pub fn error(message: impl Into<String>) -> Self {
        ServiceResponse::Error { message: message.into() }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ServiceResponse::Error { .. })
    }
}
