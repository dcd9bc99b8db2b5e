// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod pooling;
mod registry;
mod replication_flow;
mod service_api;

use super::*;
use crate::config::OrchestratorConfig;
use crate::factory::{EntityDef, MachineDef};
use aviary_core::test_support::{door_schema, FakeInstance};
use aviary_core::{ApplyError, FakeClock};
use aviary_engine::{Scheduler, SchedulerSettings, StartParams, StateDef};

pub(crate) fn test_defs() -> (Vec<EntityDef>, Vec<MachineDef>) {
    let door = EntityDef::new("Door", door_schema())
        .apply(|_: &Entity, _: &ChangeSet| Ok::<(), ApplyError>(()));

    let patrol = MachineDef::new("Patrol")
        .terminal_states(["Done"])
        .register_states(|machine| {
            let _ = machine.add_state("Idle", StateDef::function(|_, _| Ok(None)), None);
            let _ = machine.add_state("Walk", StateDef::function(|_, _| Ok(None)), None);
        });

    (vec![door], vec![patrol])
}

pub(crate) fn build(config: OrchestratorConfig) -> (Arc<Orchestrator>, FakeClock) {
    let clock = FakeClock::new();
    let scheduler = Scheduler::new(Arc::new(clock.clone()), SchedulerSettings::default());
    let (entity_defs, machine_defs) = test_defs();
    let orch = Orchestrator::new(
        config,
        OrchestratorDeps {
            scheduler,
            clock: Arc::new(clock.clone()),
            logger: RingLogger::default(),
            entity_defs,
            machine_defs,
            store: None,
            resolver: None,
        },
    );
    orch.register_components();
    (orch, clock)
}

pub(crate) fn server() -> (Arc<Orchestrator>, FakeClock) {
    build(OrchestratorConfig::server())
}

pub(crate) fn door_params(id: &str) -> (CreateEntityParams, Arc<FakeInstance>) {
    let instance = FakeInstance::new(format!("i-{id}"), "Door");
    let params = CreateEntityParams::new("Door", instance.handle()).entity_id(id);
    (params, instance)
}
