// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::RuntimeError;
use aviary_engine::TransitionParams;
use std::time::Duration;

#[test]
fn create_entity_is_idempotent_per_id() {
    let (orch, _clock) = server();
    let (params, _instance) = door_params("door-1");

    let first = orch.create_entity(params.clone()).unwrap();
    let second = orch.create_entity(params).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(orch.entity_count(), 1);
}

#[test]
fn create_entity_generates_missing_ids() {
    let (orch, _clock) = server();
    let instance = FakeInstance::new("i-1", "Door");
    let entity =
        orch.create_entity(CreateEntityParams::new("Door", instance.handle())).unwrap();
    assert!(!entity.id().is_empty());
}

#[test]
fn create_entity_requires_instance() {
    let (orch, _clock) = server();
    let params = CreateEntityParams {
        entity_class: "Door".into(),
        entity_id: Some(EntityId::new("door-1")),
        owner_id: None,
        instance: None,
        context: Vec::new(),
    };
    assert!(matches!(orch.create_entity(params).unwrap_err(), RuntimeError::MissingInstance));
}

#[test]
fn unknown_entity_class_is_rejected() {
    let (orch, _clock) = server();
    let instance = FakeInstance::new("i-1", "Window");
    let err = orch
        .create_entity(CreateEntityParams::new("Window", instance.handle()))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::UnknownEntityClass(_)));
}

#[test]
fn creation_before_registration_fails() {
    let clock = FakeClock::new();
    let scheduler = Scheduler::new(Arc::new(clock.clone()), SchedulerSettings::default());
    let (entity_defs, machine_defs) = test_defs();
    let orch = Orchestrator::new(
        OrchestratorConfig::server(),
        OrchestratorDeps {
            scheduler,
            clock: Arc::new(clock),
            logger: RingLogger::default(),
            entity_defs,
            machine_defs,
            store: None,
            resolver: None,
        },
    );

    let (params, _instance) = door_params("door-1");
    assert!(matches!(orch.create_entity(params).unwrap_err(), RuntimeError::NotRegistered));
}

#[test]
fn delete_entity_destroys_and_forgets() {
    let (orch, _clock) = server();
    let (params, _instance) = door_params("door-1");
    let entity = orch.create_entity(params).unwrap();

    orch.delete_entity(&EntityId::new("door-1")).unwrap();
    assert!(!entity.is_alive());
    assert!(orch.get_entity(&EntityId::new("door-1")).is_none());
}

#[test]
fn instance_removal_clears_registry_entry() {
    let (orch, _clock) = server();
    let (params, instance) = door_params("door-1");
    orch.create_entity(params).unwrap();

    instance.remove();
    assert!(orch.get_entity(&EntityId::new("door-1")).is_none());
    assert_eq!(orch.entity_count(), 0);
}

#[test]
fn create_machine_is_idempotent_per_id() {
    let (orch, _clock) = server();
    let params = CreateMachineParams::new("Patrol").machine_id("m-1");

    let first = orch.create_state_machine(params.clone()).unwrap();
    let second = orch.create_state_machine(params).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(orch.machine_count(), 1);
}

#[test]
fn terminal_completion_removes_machine_from_registry() {
    let (orch, _clock) = server();
    let machine = orch
        .create_state_machine(CreateMachineParams::new("Patrol").machine_id("m-1"))
        .unwrap();

    machine.start(StartParams::new("Idle")).unwrap();
    machine.change_state(TransitionParams::new("Done")).unwrap();

    assert!(orch.get_state_machine(&MachineId::new("m-1")).is_none());
    assert!(orch.get_state_machines().is_empty());
}

#[test]
fn failed_machine_is_finalized_too() {
    let (orch, _clock) = server();
    let machine = orch
        .create_state_machine(CreateMachineParams::new("Patrol").machine_id("m-1"))
        .unwrap();

    machine.start(StartParams::new("Idle")).unwrap();
    machine.fail("it broke");
    assert!(orch.get_state_machine(&MachineId::new("m-1")).is_none());
}

#[test]
fn cancel_state_machine_by_id() {
    let (orch, _clock) = server();
    let machine = orch
        .create_state_machine(CreateMachineParams::new("Patrol").machine_id("m-1"))
        .unwrap();
    machine.start(StartParams::new("Idle")).unwrap();

    orch.cancel_state_machine(&MachineId::new("m-1")).unwrap();
    assert!(orch.get_state_machine(&MachineId::new("m-1")).is_none());
    assert!(!machine.is_running());
}

#[test]
fn retry_preserves_context_under_same_id() {
    let (orch, _clock) = server();
    let machine = orch
        .create_state_machine(CreateMachineParams::new("Patrol").machine_id("m-1"))
        .unwrap();
    machine.set_context("target", "door-1");
    machine.start(StartParams::new("Idle")).unwrap();

    let replacement = orch.retry_state_machine(&MachineId::new("m-1")).unwrap();
    assert!(!Arc::ptr_eq(&machine, &replacement));
    assert_eq!(replacement.id(), &MachineId::new("m-1"));
    assert_eq!(replacement.context_get("target"), Some(Value::Str("door-1".into())));
    assert!(!replacement.is_running());
    assert_eq!(orch.machine_count(), 1);
}

#[test]
fn cancel_all_empties_the_registry() {
    let (orch, _clock) = server();
    for n in 0..3 {
        let machine = orch
            .create_state_machine(
                CreateMachineParams::new("Patrol").machine_id(format!("m-{n}")),
            )
            .unwrap();
        machine.start(StartParams::new("Idle")).unwrap();
    }
    assert_eq!(orch.machine_count(), 3);

    orch.cancel_all();
    assert_eq!(orch.machine_count(), 0);
}

#[test]
fn delete_all_entities_empties_the_registry() {
    let (orch, _clock) = server();
    for n in 0..3 {
        let (params, _instance) = door_params(&format!("door-{n}"));
        orch.create_entity(params).unwrap();
    }
    orch.delete_all_entities();
    assert_eq!(orch.entity_count(), 0);
}

#[test]
fn event_buses_register_fire_and_wait() {
    let (orch, _clock) = server();
    let bus = orch.register_event_bus("alarm");
    let seen: Arc<parking_lot::Mutex<Vec<Vec<Value>>>> = Arc::default();

    let sink = Arc::clone(&seen);
    std::mem::forget(bus.connect(move |args| sink.lock().push(args.clone())));

    assert!(orch.fire_event_bus("alarm", vec![Value::Num(1.0)]));
    assert!(!orch.fire_event_bus("unknown", vec![]));
    assert_eq!(seen.lock().len(), 1);

    // Same name returns the same bus
    let again = orch.register_event_bus("alarm");
    assert_eq!(again.fire_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn await_event_bus_times_out_to_none() {
    let (orch, _clock) = server();
    let got = orch.await_event_bus("quiet", Some(Duration::from_millis(20))).await;
    assert!(got.is_none());
}

#[tokio::test]
async fn await_event_bus_resumes_on_fire() {
    let (orch, _clock) = server();
    orch.register_event_bus("alarm");

    let waiter = Arc::clone(&orch);
    let handle =
        tokio::spawn(async move { waiter.await_event_bus("alarm", None).await });
    tokio::task::yield_now().await;

    orch.fire_event_bus("alarm", vec![Value::Bool(true)]);
    assert_eq!(handle.await.unwrap(), Some(vec![Value::Bool(true)]));
}
