// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-side pumps: command routing and the service manager API.

use super::Orchestrator;
use crate::config::Role;
use aviary_engine::SchedulerSettings;
use aviary_wire::{
    EntityCommand, EntitySeed, FsmAction, InboundRequest, SchedulerOp, ServerEndpoint,
    ServiceRequest, ServiceResponse,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

impl Orchestrator {
    /// Server: attach the endpoint's broadcaster and drain inbound
    /// commands and requests until cancelled.
    pub fn run_server(self: &Arc<Self>, endpoint: ServerEndpoint) -> CancellationToken {
        let token = CancellationToken::new();
        let stop = token.clone();
        self.state.lock().broadcaster = Some(endpoint.broadcaster());

        let mut commands = endpoint.commands;
        let mut requests = endpoint.requests;
        let orch = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    command = commands.recv() => match command {
                        Some(command) => orch.handle_command(command),
                        None => break,
                    },
                    request = requests.recv() => match request {
                        Some(request) => orch.handle_request(request),
                        None => break,
                    },
                }
            }
        });
        token
    }

    /// Route one inbound command to its registered handler, trapped.
    pub(crate) fn handle_command(&self, command: EntityCommand) {
        if self.config.role != Role::Server {
            tracing::debug!(command = %command.command, "command ignored on client role");
            return;
        }
        let EntityCommand { entity_id, command, args } = command;
        let handler = {
            let state = self.state.lock();
            state.command_handlers.get(&(entity_id.clone(), command.clone())).cloned()
        };
        let Some(handler) = handler else {
            tracing::warn!(entity = %entity_id, command, "no handler for command");
            return;
        };
        let Some(entity) = self.get_entity(&entity_id) else {
            tracing::warn!(entity = %entity_id, command, "command for unknown entity");
            return;
        };
        if let Err(err) = handler(&entity, &args) {
            tracing::warn!(entity = %entity_id, command, error = %err, "command handler failed");
            self.logger.warn(
                Some(&format!("entity:{entity_id}")),
                format!("command '{command}' failed: {err}"),
            );
        }
    }

    /// Enable the gated service manager surface. Before this call, every
    /// service request is rejected.
    pub fn start_service_manager_api(&self) {
        self.state.lock().service_enabled = true;
        tracing::info!("service manager api started");
    }

    fn service_authorized(&self, inbound: &InboundRequest) -> bool {
        if !self.state.lock().service_enabled {
            return false;
        }
        match &self.config.service_token {
            Some(required) => inbound.token.as_deref() == Some(required.as_str()),
            None => true,
        }
    }

    /// Answer one inbound request. Seed requests and named handlers are
    /// open to any client; everything else is service-gated.
    pub(crate) fn handle_request(self: &Arc<Self>, inbound: InboundRequest) {
        let response = match &inbound.request {
            ServiceRequest::RequestEntitySnapshot => {
                ServiceResponse::EntitySnapshot { entities: self.entity_seeds() }
            }
            ServiceRequest::Named { name, args } => self.handle_named(name, args),
            gated => {
                if self.service_authorized(&inbound) {
                    self.handle_service(gated)
                } else {
                    tracing::warn!(request = ?gated, "service request rejected");
                    ServiceResponse::error("service manager unavailable")
                }
            }
        };
        let _ = inbound.reply.send(response);
    }

    fn handle_named(&self, name: &str, args: &[aviary_core::Value]) -> ServiceResponse {
        let handler = self.state.lock().request_handlers.get(name).cloned();
        let Some(handler) = handler else {
            return ServiceResponse::error(format!("no handler named '{name}'"));
        };
        match handler(args) {
            Ok(value) => ServiceResponse::Value { value },
            Err(err) => ServiceResponse::error(err),
        }
    }

    fn handle_service(self: &Arc<Self>, request: &ServiceRequest) -> ServiceResponse {
        match request {
            ServiceRequest::Snapshot => ServiceResponse::Snapshot { snapshot: self.snapshot_json() },
            ServiceRequest::UpdateSettings { settings } => {
                match serde_json::from_value::<SchedulerSettings>(settings.clone()) {
                    Ok(settings) => {
                        self.scheduler.initialize(settings);
                        ServiceResponse::Ok
                    }
                    Err(err) => ServiceResponse::error(format!("bad settings: {err}")),
                }
            }
            ServiceRequest::Fsm { action } => self.handle_fsm(action),
            ServiceRequest::ConsoleCommand { name, args } => {
                let handler = self.state.lock().console_commands.get(name).cloned();
                let Some(handler) = handler else {
                    return ServiceResponse::error(format!("unknown console command '{name}'"));
                };
                match handler(args) {
                    Ok(value) => ServiceResponse::Value { value },
                    Err(err) => ServiceResponse::error(err),
                }
            }
            ServiceRequest::Scheduler { op } => self.handle_scheduler_op(op),
            // Handled before the gate.
            ServiceRequest::RequestEntitySnapshot | ServiceRequest::Named { .. } => {
                ServiceResponse::error("unreachable")
            }
        }
    }

    fn handle_fsm(self: &Arc<Self>, action: &FsmAction) -> ServiceResponse {
        let result = match action {
            FsmAction::Cancel { machine_id } => self.cancel_state_machine(machine_id),
            FsmAction::Retry { machine_id } => self.retry_state_machine(machine_id).map(|_| ()),
        };
        match result {
            Ok(()) => ServiceResponse::Ok,
            Err(err) => ServiceResponse::error(err.to_string()),
        }
    }

    fn handle_scheduler_op(&self, op: &SchedulerOp) -> ServiceResponse {
        match op {
            SchedulerOp::Deschedule { name } => {
                self.scheduler.deschedule(name);
            }
            SchedulerOp::Execute { name } => {
                if !self.scheduler.execute(name) {
                    return ServiceResponse::error(format!("no task named '{name}'"));
                }
            }
            SchedulerOp::Reset { name } => {
                if !self.scheduler.reset(name) {
                    return ServiceResponse::error(format!("no task named '{name}'"));
                }
            }
            SchedulerOp::Clear => self.scheduler.clear(),
        }
        ServiceResponse::Ok
    }

    /// Sanitized serializable view: machines, entities, ring log,
    /// scheduler snapshot.
    pub fn snapshot_json(&self) -> serde_json::Value {
        let (machines, entities) = {
            let state = self.state.lock();
            let machines: Vec<_> = state.machines.values().cloned().collect();
            let entities: Vec<_> = state.entities.values().cloned().collect();
            (machines, entities)
        };

        let machines: Vec<serde_json::Value> = machines
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.id(),
                    "class": m.class_name(),
                    "state": m.state(),
                    "previous_state": m.previous_state(),
                    "running": m.is_running(),
                    "outcome": m.outcome(),
                })
            })
            .collect();

        let entities: Vec<serde_json::Value> = entities
            .iter()
            .map(|e| {
                serde_json::json!({
                    "id": e.id(),
                    "class": e.class_name(),
                    "owner_id": e.owner_id(),
                    "alive": e.is_alive(),
                    "data": e.data_snapshot(),
                    "lock": e.lock_info().map(|l| l.owner_id),
                })
            })
            .collect();

        serde_json::json!({
            "machines": machines,
            "entities": entities,
            "logs": self.logger.entries(),
            "scheduler": self.scheduler.snapshot(),
        })
    }

    /// Seed records for client-side reconstruction.
    pub(crate) fn entity_seeds(&self) -> Vec<EntitySeed> {
        let entities = self.get_entities();
        entities
            .iter()
            .filter(|entity| entity.is_alive())
            .map(|entity| EntitySeed {
                entity_id: entity.id().clone(),
                class_name: entity.class_name().to_string(),
                owner_id: entity.owner_id(),
                data: entity.data_snapshot(),
                persist: entity.serialize(),
            })
            .collect()
    }
}
