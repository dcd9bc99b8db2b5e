// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn entity_id_display() {
    let id = EntityId::new("front-door");
    assert_eq!(id.to_string(), "front-door");
}

#[test]
fn entity_id_equality() {
    let id1 = EntityId::new("door-1");
    let id2 = EntityId::new("door-1");
    let id3 = EntityId::new("door-2");

    assert_eq!(id1, id2);
    assert_ne!(id1, id3);
}

#[test]
fn entity_id_from_str() {
    let id: EntityId = "door".into();
    assert_eq!(id.as_str(), "door");
}

#[test]
fn entity_id_serde() {
    let id = EntityId::new("my-door");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"my-door\"");

    let parsed: EntityId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn generated_ids_carry_prefix_and_differ() {
    let a = MachineId::generate();
    let b = MachineId::generate();
    assert!(a.as_str().starts_with(MachineId::PREFIX));
    assert!(b.as_str().starts_with(MachineId::PREFIX));
    assert_ne!(a, b);
}

#[test]
fn task_name_borrows_as_str() {
    use std::collections::HashMap;
    let mut map: HashMap<TaskName, u32> = HashMap::new();
    map.insert(TaskName::new("tick"), 1);
    assert_eq!(map.get("tick"), Some(&1));
}

#[test]
fn short_truncates() {
    assert_eq!(short("abcdef", 3), "abc");
    assert_eq!(short("ab", 3), "ab");
}
