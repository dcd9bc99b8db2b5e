// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport seams.
//!
//! The runtime never talks to a concrete transport: the server side
//! broadcasts through a [`Broadcaster`] and drains inbound channels, the
//! client side sends through [`CommandSender`] and [`RequestResponder`].
//! The host plugs in its real mechanism at registration time; tests and
//! single-process embeddings use [`crate::loopback`].

use crate::message::{Broadcast, EntityCommand};
use crate::request::ServiceRequest;
use crate::response::ServiceResponse;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

/// Transport failure. Broadcasts are best-effort and never surface one.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,

    #[error("request timed out")]
    Timeout,

    #[error("send failed: {0}")]
    Send(String),
}

/// Server → clients fan-out.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, message: Broadcast) -> Result<(), TransportError>;
}

/// Client → server fire-and-forget commands.
#[async_trait]
pub trait CommandSender: Send + Sync {
    async fn send_command(&self, command: EntityCommand) -> Result<(), TransportError>;
}

/// Client → server request with a reply.
#[async_trait]
pub trait RequestResponder: Send + Sync {
    async fn request(&self, request: ServiceRequest) -> Result<ServiceResponse, TransportError>;
}

/// A request as the server sees it: payload, caller's auth token, and the
/// reply slot. Dropping `reply` without sending reads as a transport
/// failure on the caller's side.
pub struct InboundRequest {
    pub request: ServiceRequest,
    pub token: Option<String>,
    pub reply: oneshot::Sender<ServiceResponse>,
}

impl std::fmt::Debug for InboundRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundRequest").field("request", &self.request).finish()
    }
}
