// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime error taxonomy.

use aviary_core::{EntityId, MachineId};
use aviary_wire::TransportError;
use thiserror::Error;

/// Failure from an orchestrator operation. Boundary surfaces log these
/// and carry on; nothing here tears the kernel down.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("components not registered")]
    NotRegistered,

    #[error("unknown entity class '{0}'")]
    UnknownEntityClass(String),

    #[error("unknown machine class '{0}'")]
    UnknownMachineClass(String),

    #[error("entity '{0}' not found")]
    EntityNotFound(EntityId),

    #[error("state machine '{0}' not found")]
    MachineNotFound(MachineId),

    #[error("entity creation requires a bound instance")]
    MissingInstance,

    #[error("operation requires the {0} role")]
    WrongRole(&'static str),

    #[error("transport not attached")]
    NoTransport,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
