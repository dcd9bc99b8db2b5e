// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use aviary_core::test_support::door_schema;
use aviary_core::{ApplyError, ChangeSet, Entity};

fn compile_one() -> Factory {
    let entity = EntityDef::new("Door", door_schema())
        .apply(|_: &Entity, _: &ChangeSet| Ok::<(), ApplyError>(()));
    let machine = MachineDef::new("Patrol")
        .valid_states(["Idle", "Walk", "Done"])
        .terminal_states(["Done"])
        .priority(5);
    Factory::compile([entity], [machine])
}

#[test]
fn compiles_entity_classes() {
    let factory = compile_one();
    let class = factory.entity_class("Door").unwrap();
    assert_eq!(class.name, "Door");
    assert!(class.apply.is_some());
    assert_eq!(class.schema.len(), 3);
}

#[test]
fn compiles_machine_classes() {
    let factory = compile_one();
    let class = factory.machine_class("Patrol").unwrap();
    assert_eq!(class.class_name, "Patrol");
    assert_eq!(class.priority, 5);
    assert!(class.terminal_states.contains("Done"));
    assert!(class.valid_states.as_ref().unwrap().contains("Walk"));
}

#[test]
fn unknown_names_are_errors() {
    let factory = compile_one();
    assert!(matches!(
        factory.entity_class("Window").unwrap_err(),
        RuntimeError::UnknownEntityClass(_)
    ));
    assert!(matches!(
        factory.machine_class("Wander").unwrap_err(),
        RuntimeError::UnknownMachineClass(_)
    ));
}

#[test]
fn exposes_full_maps() {
    let factory = compile_one();
    assert_eq!(factory.entity_classes().len(), 1);
    assert_eq!(factory.machine_classes().len(), 1);
}

#[test]
fn definition_without_apply_compiles_immutable() {
    let factory = Factory::compile([EntityDef::new("Sign", door_schema())], []);
    assert!(factory.entity_class("Sign").unwrap().apply.is_none());
}
