// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process transport.
//!
//! [`loopback`] builds one server endpoint and a cloneable client handle
//! wired over tokio channels: commands and requests flow client → server
//! through mpsc, broadcasts fan server → clients through a broadcast
//! channel. This backs tests and single-process embeddings; networked
//! hosts supply their own transport behind the same traits.

use crate::message::{Broadcast, EntityCommand};
use crate::request::ServiceRequest;
use crate::response::ServiceResponse;
use crate::transport::{
    Broadcaster, CommandSender, InboundRequest, RequestResponder, TransportError,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Default reply timeout for client requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a connected (server, client) pair. Clone the client handle for
/// additional clients; each [`ClientHandle::subscribe`] gets the full
/// broadcast stream from that point on.
pub fn loopback(buffer: usize) -> (ServerEndpoint, ClientHandle) {
    let (command_tx, command_rx) = mpsc::channel(buffer);
    let (request_tx, request_rx) = mpsc::channel(buffer);
    let (broadcast_tx, _) = broadcast::channel(buffer);

    let server = ServerEndpoint {
        commands: command_rx,
        requests: request_rx,
        broadcast_tx: broadcast_tx.clone(),
    };
    let client = ClientHandle {
        commands: command_tx,
        requests: request_tx,
        broadcast_tx,
        token: None,
        request_timeout: DEFAULT_REQUEST_TIMEOUT,
    };
    (server, client)
}

/// Server side of a loopback pair.
pub struct ServerEndpoint {
    /// Inbound fire-and-forget commands.
    pub commands: mpsc::Receiver<EntityCommand>,
    /// Inbound requests with reply slots.
    pub requests: mpsc::Receiver<InboundRequest>,
    broadcast_tx: broadcast::Sender<Broadcast>,
}

impl ServerEndpoint {
    /// Broadcaster handle for the replication bridge.
    pub fn broadcaster(&self) -> Arc<dyn Broadcaster> {
        Arc::new(LoopbackBroadcaster { tx: self.broadcast_tx.clone() })
    }
}

struct LoopbackBroadcaster {
    tx: broadcast::Sender<Broadcast>,
}

#[async_trait]
impl Broadcaster for LoopbackBroadcaster {
    async fn broadcast(&self, message: Broadcast) -> Result<(), TransportError> {
        // Best-effort: a send with no subscribers is not a failure.
        let _ = self.tx.send(message);
        Ok(())
    }
}

/// Client side of a loopback pair.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<EntityCommand>,
    requests: mpsc::Sender<InboundRequest>,
    broadcast_tx: broadcast::Sender<Broadcast>,
    token: Option<String>,
    request_timeout: Duration,
}

impl ClientHandle {
    /// Attach an auth token carried on every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Subscribe to the broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.broadcast_tx.subscribe()
    }
}

#[async_trait]
impl CommandSender for ClientHandle {
    async fn send_command(&self, command: EntityCommand) -> Result<(), TransportError> {
        self.commands.send(command).await.map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl RequestResponder for ClientHandle {
    async fn request(&self, request: ServiceRequest) -> Result<ServiceResponse, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(InboundRequest { request, token: self.token.clone(), reply: reply_tx })
            .await
            .map_err(|_| TransportError::Closed)?;
        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

#[cfg(test)]
#[path = "loopback_tests.rs"]
mod tests;
