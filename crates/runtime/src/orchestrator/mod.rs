// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The orchestrator: registry, factory bridge, lifecycle routing,
//! pooling, and event buses.
//!
//! Registry maps live behind one mutex; entity and machine methods are
//! never invoked while it is held, so lifecycle signals may re-enter the
//! orchestrator freely (a machine completing removes itself, an entity's
//! bound object vanishing removes its entry, and so on).

mod replication;
mod service;

use crate::config::{OrchestratorConfig, Role};
use crate::detached::InstanceResolver;
use crate::error::RuntimeError;
use crate::factory::{EntityDef, Factory, MachineDef};
use aviary_core::{
    ChangeSet, Entity, EntityId, EntityParams, InstanceRef, MachineId, RingLogger, SharedClock,
    Signal, Value,
};
use aviary_engine::{MachineParams, SharedScheduler, StateMachine};
use aviary_storage::{KvStore, PersistConfig, PersistenceController};
use aviary_wire::{Broadcaster, CommandSender, RequestResponder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type CommandHandler =
    Arc<dyn Fn(&Arc<Entity>, &[Value]) -> Result<(), String> + Send + Sync>;
pub(crate) type RequestHandler =
    Arc<dyn Fn(&[Value]) -> Result<Option<Value>, String> + Send + Sync>;

/// External collaborators handed to the orchestrator at construction.
/// No ambient globals: everything the kernel touches arrives here.
pub struct OrchestratorDeps {
    pub scheduler: SharedScheduler,
    pub clock: SharedClock,
    pub logger: RingLogger,
    pub entity_defs: Vec<EntityDef>,
    pub machine_defs: Vec<MachineDef>,
    pub store: Option<Arc<dyn KvStore>>,
    pub resolver: Option<Arc<dyn InstanceResolver>>,
}

/// Parameters for [`Orchestrator::create_entity`] and
/// [`Orchestrator::get_pooled_entity`].
#[derive(Clone)]
pub struct CreateEntityParams {
    pub entity_class: String,
    /// Generated when absent; creation is idempotent per id.
    pub entity_id: Option<EntityId>,
    pub owner_id: Option<String>,
    pub instance: Option<InstanceRef>,
    pub context: Vec<(String, Value)>,
}

impl CreateEntityParams {
    pub fn new(entity_class: impl Into<String>, instance: InstanceRef) -> Self {
        Self {
            entity_class: entity_class.into(),
            entity_id: None,
            owner_id: None,
            instance: Some(instance),
            context: Vec::new(),
        }
    }

    pub fn entity_id(mut self, id: impl Into<EntityId>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn owner_id(mut self, owner: impl Into<String>) -> Self {
        self.owner_id = Some(owner.into());
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }
}

/// Parameters for [`Orchestrator::create_state_machine`].
#[derive(Clone, Default)]
pub struct CreateMachineParams {
    pub machine_class: String,
    /// Generated when absent; creation is idempotent per id.
    pub machine_id: Option<MachineId>,
    pub context: Option<aviary_engine::Context>,
    pub priority: Option<u32>,
}

impl CreateMachineParams {
    pub fn new(machine_class: impl Into<String>) -> Self {
        Self { machine_class: machine_class.into(), ..Self::default() }
    }

    pub fn machine_id(mut self, id: impl Into<MachineId>) -> Self {
        self.machine_id = Some(id.into());
        self
    }

    pub fn context(mut self, context: aviary_engine::Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }
}

struct MachineMeta {
    class_name: String,
    priority: Option<u32>,
}

pub(crate) struct OrchState {
    factory: Option<Factory>,
    entities: HashMap<EntityId, Arc<Entity>>,
    machines: HashMap<MachineId, Arc<StateMachine>>,
    machine_meta: HashMap<MachineId, MachineMeta>,
    pools: HashMap<String, Vec<Arc<Entity>>>,
    buses: HashMap<String, Signal<Vec<Value>>>,
    command_handlers: HashMap<(EntityId, String), CommandHandler>,
    request_handlers: HashMap<String, RequestHandler>,
    console_commands: HashMap<String, RequestHandler>,
    deferred_packets: HashMap<EntityId, Vec<ChangeSet>>,
    snapshot_requested: bool,
    service_enabled: bool,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    command_sender: Option<Arc<dyn CommandSender>>,
    responder: Option<Arc<dyn RequestResponder>>,
}

/// The runtime kernel.
pub struct Orchestrator {
    config: OrchestratorConfig,
    scheduler: SharedScheduler,
    clock: SharedClock,
    logger: RingLogger,
    persistence: Option<PersistenceController>,
    resolver: Option<Arc<dyn InstanceResolver>>,
    defs: Mutex<Option<(Vec<EntityDef>, Vec<MachineDef>)>>,
    pub(crate) state: Mutex<OrchState>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, deps: OrchestratorDeps) -> Arc<Self> {
        let OrchestratorDeps { scheduler, clock, logger, entity_defs, machine_defs, store, resolver } =
            deps;
        let persistence = store.map(|store| {
            PersistenceController::new(
                store,
                PersistConfig { key_prefix: config.store_key_prefix.clone() },
            )
        });
        Arc::new(Self {
            config,
            scheduler,
            clock,
            logger,
            persistence,
            resolver,
            defs: Mutex::new(Some((entity_defs, machine_defs))),
            state: Mutex::new(OrchState {
                factory: None,
                entities: HashMap::new(),
                machines: HashMap::new(),
                machine_meta: HashMap::new(),
                pools: HashMap::new(),
                buses: HashMap::new(),
                command_handlers: HashMap::new(),
                request_handlers: HashMap::new(),
                console_commands: HashMap::new(),
                deferred_packets: HashMap::new(),
                snapshot_requested: false,
                service_enabled: false,
                broadcaster: None,
                command_sender: None,
                responder: None,
            }),
        })
    }

    /// One-time setup: compile both class registries. Transports attach
    /// separately via [`Orchestrator::run_server`] /
    /// [`Orchestrator::run_client`].
    pub fn register_components(&self) {
        let Some((entity_defs, machine_defs)) = self.defs.lock().take() else {
            tracing::warn!("components already registered");
            return;
        };
        let factory = Factory::compile(entity_defs, machine_defs);
        tracing::info!(
            entity_classes = factory.entity_classes().len(),
            machine_classes = factory.machine_classes().len(),
            role = %self.config.role,
            "components registered"
        );
        self.state.lock().factory = Some(factory);
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.scheduler
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn logger(&self) -> &RingLogger {
        &self.logger
    }

    /// Entity persistence over the configured store, when one was given.
    pub fn persistence(&self) -> Option<&PersistenceController> {
        self.persistence.as_ref()
    }

    pub(crate) fn entity_class(
        &self,
        name: &str,
    ) -> Result<Arc<aviary_core::EntityClass>, RuntimeError> {
        let state = self.state.lock();
        let factory = state.factory.as_ref().ok_or(RuntimeError::NotRegistered)?;
        factory.entity_class(name)
    }

    fn machine_class(
        &self,
        name: &str,
    ) -> Result<Arc<aviary_engine::MachineClass>, RuntimeError> {
        let state = self.state.lock();
        let factory = state.factory.as_ref().ok_or(RuntimeError::NotRegistered)?;
        factory.machine_class(name)
    }

    // ---- entities ----

    /// Create (or return the existing) entity for the given id.
    pub fn create_entity(
        self: &Arc<Self>,
        params: CreateEntityParams,
    ) -> Result<Arc<Entity>, RuntimeError> {
        let id = params.entity_id.clone().unwrap_or_else(EntityId::generate);
        if let Some(existing) = self.get_entity(&id) {
            return Ok(existing);
        }
        let class = self.entity_class(&params.entity_class)?;
        let instance = params.instance.ok_or(RuntimeError::MissingInstance)?;

        let entity = Entity::new(EntityParams {
            id: id.clone(),
            class,
            instance,
            owner_id: params.owner_id,
            logger: Some(self.logger.clone()),
        });
        entity.set_context_map(params.context);
        self.wire_entity(&entity);

        self.state.lock().entities.insert(id.clone(), Arc::clone(&entity));
        tracing::debug!(entity = %id, class = entity.class_name(), "entity created");
        Ok(entity)
    }

    /// Hook registry cleanup and (server role) replication to an entity's
    /// signals.
    fn wire_entity(self: &Arc<Self>, entity: &Arc<Entity>) {
        let weak = Arc::downgrade(self);
        let id = entity.id().clone();
        entity.manage(entity.destroyed().once(move |_| {
            if let Some(orch) = weak.upgrade() {
                orch.forget_entity(&id);
            }
        }));

        if self.config.role == Role::Server {
            let weak = Arc::downgrade(self);
            let entity_weak = Arc::downgrade(entity);
            entity.manage(entity.state_updated().connect(move |changes| {
                let (Some(orch), Some(entity)) = (weak.upgrade(), entity_weak.upgrade()) else {
                    return;
                };
                orch.replicate_commit(&entity, changes);
            }));
        }
    }

    /// Registry-side cleanup after an entity's `Destroyed` fired.
    fn forget_entity(&self, id: &EntityId) {
        let mut state = self.state.lock();
        state.entities.remove(id);
        state.deferred_packets.remove(id);
        state.command_handlers.retain(|(entity_id, _), _| entity_id != id);
    }

    pub fn get_entity(&self, id: &EntityId) -> Option<Arc<Entity>> {
        self.state.lock().entities.get(id).cloned()
    }

    pub fn get_entities(&self) -> Vec<Arc<Entity>> {
        self.state.lock().entities.values().cloned().collect()
    }

    pub fn entity_count(&self) -> usize {
        self.state.lock().entities.len()
    }

    /// Destroy an entity and drop its registry entry.
    pub fn delete_entity(&self, id: &EntityId) -> Result<(), RuntimeError> {
        let entity = self.get_entity(id).ok_or_else(|| RuntimeError::EntityNotFound(id.clone()))?;
        entity.destroy();
        Ok(())
    }

    pub fn delete_all_entities(&self) {
        let entities = self.get_entities();
        for entity in entities {
            entity.destroy();
        }
    }

    // ---- state machines ----

    /// Create (or return the existing) machine for the given id.
    pub fn create_state_machine(
        self: &Arc<Self>,
        params: CreateMachineParams,
    ) -> Result<Arc<StateMachine>, RuntimeError> {
        let id = params.machine_id.clone().unwrap_or_else(MachineId::generate);
        if let Some(existing) = self.get_state_machine(&id) {
            return Ok(existing);
        }
        let class = self.machine_class(&params.machine_class)?;

        let machine = StateMachine::new(MachineParams {
            id: id.clone(),
            class,
            scheduler: Arc::clone(&self.scheduler),
            context: params.context,
            priority: params.priority,
        });
        self.wire_machine(&machine);

        {
            let mut state = self.state.lock();
            state.machines.insert(id.clone(), Arc::clone(&machine));
            state.machine_meta.insert(
                id.clone(),
                MachineMeta { class_name: params.machine_class, priority: params.priority },
            );
        }
        tracing::debug!(machine = %id, class = machine.class_name(), "state machine created");
        Ok(machine)
    }

    /// Route lifecycle signals into teardown: a concluded machine is
    /// destroyed and leaves the registry.
    fn wire_machine(self: &Arc<Self>, machine: &Arc<StateMachine>) {
        let id = machine.id().clone();
        for signal in [machine.completed(), machine.cancelled()] {
            let weak = Arc::downgrade(self);
            let id = id.clone();
            machine.manage(signal.once(move |_| {
                if let Some(orch) = weak.upgrade() {
                    orch.finalize_machine(&id);
                }
            }));
        }
        let weak = Arc::downgrade(self);
        machine.manage(machine.failed().once(move |reason: &String| {
            if let Some(orch) = weak.upgrade() {
                tracing::warn!(machine = %id, reason, "state machine failed");
                orch.finalize_machine(&id);
            }
        }));
    }

    fn finalize_machine(&self, id: &MachineId) {
        let machine = {
            let mut state = self.state.lock();
            state.machine_meta.remove(id);
            state.machines.remove(id)
        };
        if let Some(machine) = machine {
            machine.destroy();
        }
    }

    pub fn get_state_machine(&self, id: &MachineId) -> Option<Arc<StateMachine>> {
        self.state.lock().machines.get(id).cloned()
    }

    pub fn get_state_machines(&self) -> Vec<Arc<StateMachine>> {
        self.state.lock().machines.values().cloned().collect()
    }

    pub fn machine_count(&self) -> usize {
        self.state.lock().machines.len()
    }

    /// Cancel a machine; its lifecycle signal removes it from the
    /// registry.
    pub fn cancel_state_machine(&self, id: &MachineId) -> Result<(), RuntimeError> {
        let machine =
            self.get_state_machine(id).ok_or_else(|| RuntimeError::MachineNotFound(id.clone()))?;
        machine.cancel();
        Ok(())
    }

    /// Destroy and recreate a machine under the same id, preserving its
    /// shared context. The replacement is returned un-started.
    pub fn retry_state_machine(
        self: &Arc<Self>,
        id: &MachineId,
    ) -> Result<Arc<StateMachine>, RuntimeError> {
        let (machine, meta) = {
            let mut state = self.state.lock();
            let machine = state
                .machines
                .remove(id)
                .ok_or_else(|| RuntimeError::MachineNotFound(id.clone()))?;
            let meta = state
                .machine_meta
                .remove(id)
                .ok_or_else(|| RuntimeError::MachineNotFound(id.clone()))?;
            (machine, meta)
        };
        let context = machine.context();
        machine.destroy();

        self.create_state_machine(CreateMachineParams {
            machine_class: meta.class_name,
            machine_id: Some(id.clone()),
            context: Some(context),
            priority: meta.priority,
        })
    }

    /// Cancel every live machine.
    pub fn cancel_all(&self) {
        let machines = self.get_state_machines();
        for machine in machines {
            machine.cancel();
        }
    }

    // ---- pooling ----

    /// Deactivate an entity and park it on its class's reuse stack. The
    /// entity is not destroyed; handlers and staged state are cleared.
    pub fn pool_entity(&self, id: &EntityId) -> Result<(), RuntimeError> {
        let entity = {
            let mut state = self.state.lock();
            let entity = state
                .entities
                .remove(id)
                .ok_or_else(|| RuntimeError::EntityNotFound(id.clone()))?;
            state.command_handlers.retain(|(entity_id, _), _| entity_id != id);
            entity
        };
        entity.deactivate();
        let class = entity.class_name().to_string();
        self.state.lock().pools.entry(class).or_default().push(entity);
        tracing::debug!(entity = %id, "entity pooled");
        Ok(())
    }

    /// Pop a pooled entity for the class, rebind it, and reactivate it;
    /// fall through to [`Orchestrator::create_entity`] on an empty stack.
    pub fn get_pooled_entity(
        self: &Arc<Self>,
        params: CreateEntityParams,
    ) -> Result<Arc<Entity>, RuntimeError> {
        let pooled = {
            let mut state = self.state.lock();
            state.pools.get_mut(&params.entity_class).and_then(Vec::pop)
        };
        let Some(entity) = pooled else {
            return self.create_entity(params);
        };

        let instance = params.instance.ok_or(RuntimeError::MissingInstance)?;
        entity.activate(instance, params.context);
        self.wire_entity(&entity);
        self.state.lock().entities.insert(entity.id().clone(), Arc::clone(&entity));
        tracing::debug!(entity = %entity.id(), "entity reused from pool");
        Ok(entity)
    }

    pub fn pooled_count(&self, class: &str) -> usize {
        self.state.lock().pools.get(class).map_or(0, Vec::len)
    }

    // ---- event buses ----

    /// Create (or fetch) a named local event bus.
    pub fn register_event_bus(&self, name: impl Into<String>) -> Signal<Vec<Value>> {
        self.state.lock().buses.entry(name.into()).or_default().clone()
    }

    pub fn get_event_bus(&self, name: &str) -> Option<Signal<Vec<Value>>> {
        self.state.lock().buses.get(name).cloned()
    }

    /// Fire a bus by name. Returns false for an unknown bus.
    pub fn fire_event_bus(&self, name: &str, args: Vec<Value>) -> bool {
        match self.get_event_bus(name) {
            Some(bus) => {
                bus.fire(args);
                true
            }
            None => false,
        }
    }

    /// Wait for the next fire on a bus, registering it when absent.
    pub async fn await_event_bus(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Option<Vec<Value>> {
        let bus = self.register_event_bus(name);
        bus.wait(timeout).await
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Orchestrator")
            .field("role", &self.config.role)
            .field("entities", &state.entities.len())
            .field("machines", &state.machines.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "../orchestrator_tests/mod.rs"]
mod tests;
