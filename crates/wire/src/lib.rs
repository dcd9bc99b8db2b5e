// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replication and command protocol for the Aviary runtime.
//!
//! Three transport-agnostic channels:
//! 1. [`Broadcast`]: server to clients entity deltas (fire-and-forget).
//! 2. [`EntityCommand`]: clients to server commands (fire-and-forget).
//! 3. [`ServiceRequest`]/[`ServiceResponse`]: admin-gated request/response.
//!
//! Byte-stream backends frame messages with a 4-byte big-endian length
//! prefix + JSON ([`encode`]/[`decode`]); in-process embeddings use the
//! [`loopback`] channel transport.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod loopback;
mod message;
mod request;
mod response;
mod transport;
mod wire;

pub use loopback::{loopback, ClientHandle, ServerEndpoint};
pub use message::{Broadcast, EntityCommand, EntitySeed};
pub use request::{FsmAction, SchedulerOp, ServiceRequest};
pub use response::ServiceResponse;
pub use transport::{Broadcaster, CommandSender, InboundRequest, RequestResponder, TransportError};
pub use wire::{decode, encode, read_message, write_message, ProtocolError, MAX_MESSAGE_SIZE};

#[cfg(test)]
mod property_tests;
