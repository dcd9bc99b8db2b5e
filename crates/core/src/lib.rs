// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! aviary-core: data model for the Aviary entity–behavior runtime.
//!
//! Identity types, clock abstraction, local signals, the ring logger,
//! dynamic values with schema validation, instance handles, and the
//! entity data authority.

pub mod macros;

pub mod clock;
pub mod disposable;
pub mod entity;
pub mod id;
pub mod instance;
pub mod logger;
pub mod schema;
pub mod signal;
pub mod value;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{epoch_ms, Clock, FakeClock, SharedClock, SystemClock};
pub use disposable::Disposable;
pub use entity::{
    ApplyChanges, ApplyError, CommitError, Entity, EntityClass, EntityLock, EntityParams,
    WriteError,
};
pub use id::{short, EntityId, MachineId, TaskName};
pub use instance::{Instance, InstanceRef};
pub use logger::{LogEntry, LogLevel, RingLogger};
pub use schema::{PropertyDef, Schema, SchemaError};
pub use signal::{Connection, Signal};
pub use value::{ChangeSet, Value};

#[cfg(any(test, feature = "test-support"))]
pub use test_support::FakeInstance;
