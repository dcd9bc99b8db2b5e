// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replication bridge and command/request plumbing.
//!
//! Server side: every successful commit is filtered down to its
//! replicate-flagged fields and broadcast as an entity delta. Client
//! side: inbound deltas write straight into the mirrored entity's data
//! (the server is authoritative); deltas for unknown entities trigger a
//! seed request and are parked until the seed arrives.

use super::Orchestrator;
use crate::config::Role;
use crate::error::RuntimeError;
use aviary_core::{ChangeSet, Entity, EntityId, Value};
use aviary_wire::{
    Broadcast, Broadcaster, ClientHandle, CommandSender, EntityCommand, EntitySeed,
    RequestResponder, ServiceRequest, ServiceResponse,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

impl Orchestrator {
    /// Server: filter a committed change set and broadcast the
    /// replicate-flagged remainder.
    pub(crate) fn replicate_commit(&self, entity: &Arc<Entity>, changes: &ChangeSet) {
        let schema = entity.valid_properties();
        let packet: ChangeSet = changes
            .iter()
            .filter(|(field, _)| schema.get(field).is_some_and(|def| def.replicate))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        if packet.is_empty() {
            return;
        }

        let Some(broadcaster) = self.state.lock().broadcaster.clone() else {
            tracing::debug!(entity = %entity.id(), "commit with no transport attached");
            return;
        };
        let message = Broadcast::EntityUpdate { entity_id: entity.id().clone(), packet };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    // Best-effort: failures are logged, never propagated.
                    if let Err(err) = broadcaster.broadcast(message).await {
                        tracing::warn!(error = %err, "entity delta broadcast failed");
                    }
                });
            }
            Err(_) => tracing::debug!("no async runtime; entity delta dropped"),
        }
    }

    /// Client: connect the transport, request the entity seed set, and
    /// pump inbound broadcasts until cancelled.
    pub fn run_client(self: &Arc<Self>, client: ClientHandle) -> CancellationToken {
        let token = CancellationToken::new();
        let stop = token.clone();
        {
            let mut state = self.state.lock();
            state.command_sender = Some(Arc::new(client.clone()));
            state.responder = Some(Arc::new(client.clone()));
        }

        let orch = Arc::clone(self);
        let mut broadcasts = client.subscribe();
        tokio::spawn(async move {
            orch.request_entity_seeds().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    received = broadcasts.recv() => match received {
                        Ok(Broadcast::EntityUpdate { entity_id, packet }) => {
                            orch.apply_update(entity_id, packet).await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "broadcast stream lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
        token
    }

    /// Client: apply one inbound delta, deferring it when the entity is
    /// not known yet.
    pub(crate) async fn apply_update(self: &Arc<Self>, entity_id: EntityId, packet: ChangeSet) {
        if let Some(entity) = self.get_entity(&entity_id) {
            entity.apply_packet(packet, self.config.validate_replication);
            return;
        }

        let first_miss = {
            let mut state = self.state.lock();
            state.deferred_packets.entry(entity_id.clone()).or_default().push(packet);
            let first = !state.snapshot_requested;
            state.snapshot_requested = true;
            first
        };
        tracing::debug!(entity = %entity_id, "delta for unknown entity deferred");
        if first_miss {
            self.request_entity_seeds().await;
        }
    }

    /// Client: fetch the seed set and materialize local entities.
    pub(crate) async fn request_entity_seeds(self: &Arc<Self>) {
        let Some(responder) = self.state.lock().responder.clone() else {
            return;
        };
        match responder.request(ServiceRequest::RequestEntitySnapshot).await {
            Ok(ServiceResponse::EntitySnapshot { entities }) => {
                self.seed_entities(entities);
                self.state.lock().snapshot_requested = false;
            }
            Ok(other) => {
                tracing::warn!(response = ?other, "unexpected seed response");
            }
            Err(err) => {
                tracing::warn!(error = %err, "entity seed request failed");
            }
        }
    }

    /// Client: build local mirrors from seeds, then drain any deltas that
    /// arrived while the seed request was in flight.
    pub(crate) fn seed_entities(self: &Arc<Self>, seeds: Vec<EntitySeed>) {
        for seed in seeds {
            if self.get_entity(&seed.entity_id).is_some() {
                continue;
            }
            let instance = self
                .resolver
                .as_ref()
                .and_then(|resolver| resolver.resolve(&seed))
                .unwrap_or_else(|| {
                    crate::detached::DetachedInstance::new(
                        seed.entity_id.as_str(),
                        seed.class_name.clone(),
                    )
                    .handle()
                });

            let created = self.create_entity(super::CreateEntityParams {
                entity_class: seed.class_name.clone(),
                entity_id: Some(seed.entity_id.clone()),
                owner_id: seed.owner_id.clone(),
                instance: Some(instance),
                context: Vec::new(),
            });
            let entity = match created {
                Ok(entity) => entity,
                Err(err) => {
                    tracing::warn!(entity = %seed.entity_id, error = %err, "seed rejected");
                    continue;
                }
            };
            if !seed.data.is_empty() {
                entity.apply_packet(seed.data, false);
            }

            let parked = self.state.lock().deferred_packets.remove(&seed.entity_id);
            for packet in parked.unwrap_or_default() {
                entity.apply_packet(packet, self.config.validate_replication);
            }
        }
    }

    // ---- commands ----

    /// Client: fire-and-forget a command at a server-side entity. A
    /// no-op (with a log) on the server role.
    pub fn send_command(&self, entity_id: &EntityId, command: &str, args: Vec<Value>) {
        if self.config.role != Role::Client {
            tracing::debug!(entity = %entity_id, command, "send_command ignored on server role");
            return;
        }
        let Some(sender) = self.state.lock().command_sender.clone() else {
            tracing::warn!(entity = %entity_id, command, "send_command with no transport");
            return;
        };
        let message = EntityCommand {
            entity_id: entity_id.clone(),
            command: command.to_string(),
            args,
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = sender.send_command(message).await {
                        tracing::warn!(error = %err, "command send failed");
                    }
                });
            }
            Err(_) => tracing::debug!("no async runtime; command dropped"),
        }
    }

    /// Server: register a handler for `(entity, command)` pairs arriving
    /// from clients. Handlers are trapped: an `Err` is logged, never
    /// propagated.
    pub fn register_command_handler(
        &self,
        entity_id: &EntityId,
        command: impl Into<String>,
        handler: impl Fn(&Arc<Entity>, &[Value]) -> Result<(), String> + Send + Sync + 'static,
    ) {
        self.state
            .lock()
            .command_handlers
            .insert((entity_id.clone(), command.into()), Arc::new(handler));
    }

    /// Server: register a named request handler.
    pub fn register_request_handler(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&[Value]) -> Result<Option<Value>, String> + Send + Sync + 'static,
    ) {
        self.state.lock().request_handlers.insert(name.into(), Arc::new(handler));
    }

    /// Server: register a console command exposed through the service
    /// manager API.
    pub fn register_console_command(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&[Value]) -> Result<Option<Value>, String> + Send + Sync + 'static,
    ) {
        self.state.lock().console_commands.insert(name.into(), Arc::new(handler));
    }

    /// Client: call a named server-side request handler. Timeouts and
    /// handler failures read as absent.
    pub async fn request(&self, name: &str, args: Vec<Value>) -> Option<Value> {
        let responder = self.state.lock().responder.clone()?;
        let request = ServiceRequest::Named { name: name.to_string(), args };
        match tokio::time::timeout(self.config.request_timeout, responder.request(request)).await {
            Ok(Ok(ServiceResponse::Value { value })) => value,
            Ok(Ok(ServiceResponse::Error { message })) => {
                tracing::warn!(name, message, "request rejected");
                None
            }
            Ok(Ok(other)) => {
                tracing::warn!(name, response = ?other, "unexpected request response");
                None
            }
            Ok(Err(err)) => {
                tracing::warn!(name, error = %err, "request failed");
                None
            }
            Err(_) => {
                tracing::warn!(name, "request timed out");
                None
            }
        }
    }

    /// Attach a broadcaster without running the inbound pumps (embedders
    /// that drive the channels themselves).
    pub fn attach_broadcaster(
        &self,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<(), RuntimeError> {
        if self.config.role != Role::Server {
            return Err(RuntimeError::WrongRole("server"));
        }
        self.state.lock().broadcaster = Some(broadcaster);
        Ok(())
    }
}
