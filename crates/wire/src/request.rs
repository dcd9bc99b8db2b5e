// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service manager requests.

use aviary_core::{MachineId, TaskName, Value};
use serde::{Deserialize, Serialize};

/// Admin-gated request/response channel payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceRequest {
    /// Sanitized view of machines, entities, logs, and scheduler stats.
    Snapshot,
    /// Seed data for client-side entity reconstruction.
    RequestEntitySnapshot,
    /// Mutate scheduler settings.
    UpdateSettings { settings: serde_json::Value },
    /// State machine management.
    Fsm { action: FsmAction },
    /// Named server-side action.
    ConsoleCommand {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Value>,
    },
    /// Forwarded scheduler operation.
    Scheduler { op: SchedulerOp },
    /// Application-registered request handler.
    Named {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Value>,
    },
}

/// State machine management actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FsmAction {
    Cancel { machine_id: MachineId },
    Retry { machine_id: MachineId },
}

/// Forwarded scheduler operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchedulerOp {
    Deschedule { name: TaskName },
    Execute { name: TaskName },
    Reset { name: TaskName },
    Clear,
}
