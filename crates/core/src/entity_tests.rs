// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{door_schema, FakeInstance};
use std::sync::atomic::{AtomicU32, Ordering};

fn mutable_class() -> Arc<EntityClass> {
    Arc::new(
        EntityClass::new("Door", door_schema())
            .with_apply(|_: &Entity, _: &ChangeSet| Ok::<(), ApplyError>(())),
    )
}

fn immutable_class() -> Arc<EntityClass> {
    Arc::new(EntityClass::new("Door", door_schema()))
}

fn make_entity(class: Arc<EntityClass>) -> (Arc<Entity>, Arc<FakeInstance>) {
    let instance = FakeInstance::new("i-1", "Door");
    let entity = Entity::new(EntityParams {
        id: EntityId::new("door-1"),
        class,
        instance: instance.handle(),
        owner_id: None,
        logger: None,
    });
    (entity, instance)
}

#[test]
fn writes_stage_into_pending() {
    let (entity, _instance) = make_entity(mutable_class());

    entity.set("IsOpen", true).unwrap();
    assert_eq!(entity.get("IsOpen"), Some(Value::Bool(true)));
    assert!(entity.data_snapshot().is_empty());
    assert_eq!(entity.pending_snapshot().len(), 1);
}

#[test]
fn unknown_field_rejected_pending_unchanged() {
    let (entity, _instance) = make_entity(mutable_class());

    let err = entity.set("Missing", true).unwrap_err();
    assert!(matches!(err, WriteError::Schema(SchemaError::UnknownField { .. })));
    assert!(entity.pending_snapshot().is_empty());
}

#[test]
fn type_mismatch_rejected() {
    let (entity, _instance) = make_entity(mutable_class());

    let err = entity.set("IsOpen", 5_i64).unwrap_err();
    assert!(matches!(err, WriteError::Schema(SchemaError::TypeMismatch { .. })));
    assert!(entity.pending_snapshot().is_empty());
}

#[test]
fn commit_merges_and_fires_exact_snapshot() {
    let (entity, _instance) = make_entity(mutable_class());
    let seen: Arc<parking_lot::Mutex<Vec<ChangeSet>>> = Arc::default();

    let sink = Arc::clone(&seen);
    entity.manage(entity.state_updated().connect(move |changes| sink.lock().push(changes.clone())));

    entity.set("IsOpen", true).unwrap();
    entity.set("UseCount", 7_i64).unwrap();
    assert!(entity.commit(None));

    let fired = seen.lock();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].get("IsOpen"), Some(&Value::Bool(true)));
    assert_eq!(fired[0].get("UseCount"), Some(&Value::Num(7.0)));

    assert!(entity.pending_snapshot().is_empty());
    assert_eq!(entity.data_snapshot().len(), 2);
}

#[test]
fn commit_with_nothing_staged_fails() {
    let (entity, _instance) = make_entity(mutable_class());
    assert!(!entity.commit(None));
    assert!(matches!(entity.try_commit(None), Err(CommitError::NothingStaged)));
}

#[test]
fn commit_without_apply_behavior_fails() {
    let (entity, _instance) = make_entity(immutable_class());
    entity.set("IsOpen", true).unwrap();

    assert!(!entity.commit(None));
    // Staged value survives the rejection
    assert_eq!(entity.pending_snapshot().len(), 1);
}

#[test]
fn apply_failure_preserves_pending_and_suppresses_signal() {
    let class = Arc::new(EntityClass::new("Door", door_schema()).with_apply(
        |_: &Entity, _: &ChangeSet| Err::<(), ApplyError>(ApplyError::from("host rejected")),
    ));
    let (entity, _instance) = make_entity(class);

    entity.set("IsOpen", true).unwrap();
    assert!(!entity.commit(None));
    assert_eq!(entity.pending_snapshot().len(), 1);
    assert!(entity.data_snapshot().is_empty());
    assert_eq!(entity.state_updated().fire_count(), 0);
}

#[test]
fn lock_blocks_other_callers() {
    let (entity, _instance) = make_entity(mutable_class());

    assert!(entity.acquire_lock("A"));
    entity.set("UseCount", 5_i64).unwrap();

    assert!(!entity.commit(Some("B")));
    assert!(entity.data_snapshot().get("UseCount").is_none());

    assert!(entity.commit(Some("A")));
    assert_eq!(entity.data_snapshot().get("UseCount"), Some(&Value::Num(5.0)));
}

#[test]
fn lock_reacquire_and_release_rules() {
    let (entity, _instance) = make_entity(mutable_class());

    assert!(entity.acquire_lock("A"));
    assert!(entity.acquire_lock("A"));
    assert!(!entity.acquire_lock("B"));
    assert!(!entity.release_lock("B"));
    assert!(entity.release_lock("A"));
    assert!(entity.acquire_lock("B"));
}

#[test]
fn reads_resolve_pending_over_data_over_context_over_instance() {
    let (entity, instance) = make_entity(mutable_class());
    instance.set_field("Label", "from-instance");

    // Instance read-through for schema fields with no local value
    assert_eq!(entity.get("Label"), Some(Value::Str("from-instance".into())));

    entity.set_context("Label", "from-context");
    assert_eq!(entity.get("Label"), Some(Value::Str("from-context".into())));

    entity.set("Label", "staged").unwrap();
    assert!(entity.commit(None));
    entity.set("Label", "restaged").unwrap();
    assert_eq!(entity.get("Label"), Some(Value::Str("restaged".into())));
}

#[test]
fn context_is_never_serialized() {
    let (entity, _instance) = make_entity(mutable_class());
    entity.set_context("scratch", 1_i64);
    entity.set("UseCount", 3_i64).unwrap();
    assert!(entity.commit(None));

    let persisted = entity.serialize();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted.get("UseCount"), Some(&Value::Num(3.0)));
}

#[test]
fn serialize_deserialize_round_trips_persist_fields() {
    let (entity, _instance) = make_entity(mutable_class());
    entity.set("UseCount", 9_i64).unwrap();
    entity.set("IsOpen", true).unwrap();
    assert!(entity.commit(None));

    let payload = entity.serialize();
    assert_eq!(payload.len(), 1);

    let (fresh, _instance2) = make_entity(mutable_class());
    fresh.deserialize(payload);
    assert_eq!(fresh.get("UseCount"), Some(Value::Num(9.0)));
    // No apply behavior ran and no signal fired
    assert_eq!(fresh.state_updated().fire_count(), 0);
}

#[test]
fn instance_removal_destroys_entity_once() {
    let (entity, instance) = make_entity(mutable_class());
    let destroyed = Arc::new(AtomicU32::new(0));

    let sink = Arc::clone(&destroyed);
    std::mem::forget(entity.destroyed().connect(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    }));

    instance.remove();
    assert!(!entity.is_alive());
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);

    // Explicit destroy afterwards is a no-op
    entity.destroy();
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn destroyed_entity_reads_absent_writes_rejected() {
    let (entity, _instance) = make_entity(mutable_class());
    entity.set("IsOpen", true).unwrap();
    assert!(entity.commit(None));

    entity.destroy();
    assert_eq!(entity.get("IsOpen"), None);
    assert!(matches!(entity.set("IsOpen", false), Err(WriteError::Destroyed)));
    assert!(!entity.commit(None));
}

#[test]
fn removal_during_apply_fails_commit() {
    let instance = FakeInstance::new("i-1", "Door");
    let removal = Arc::clone(&instance);
    let class = Arc::new(EntityClass::new("Door", door_schema()).with_apply(
        move |_: &Entity, _: &ChangeSet| {
            removal.remove();
            Ok::<(), ApplyError>(())
        },
    ));
    let entity = Entity::new(EntityParams {
        id: EntityId::new("door-1"),
        class,
        instance: instance.handle(),
        owner_id: None,
        logger: None,
    });

    entity.set("IsOpen", true).unwrap();
    assert!(!entity.commit(None));
    assert!(!entity.is_alive());
    assert_eq!(entity.state_updated().fire_count(), 0);
}

#[test]
fn disposables_run_lifo_on_destroy() {
    let (entity, _instance) = make_entity(mutable_class());
    let order: Arc<parking_lot::Mutex<Vec<&str>>> = Arc::default();

    for tag in ["first", "second", "third"] {
        let sink = Arc::clone(&order);
        entity.manage(Disposable::call(move || sink.lock().push(tag)));
    }

    entity.destroy();
    assert_eq!(*order.lock(), vec!["third", "second", "first"]);
}

#[test]
fn manage_after_destroy_disposes_immediately() {
    let (entity, _instance) = make_entity(mutable_class());
    entity.destroy();

    let ran = Arc::new(AtomicU32::new(0));
    let sink = Arc::clone(&ran);
    entity.manage(Disposable::call(move || {
        sink.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn deactivate_clears_handlers_and_reactivates_clean() {
    let (entity, _instance) = make_entity(mutable_class());
    entity.set("IsOpen", true).unwrap();
    entity.set_context("scratch", 1_i64);
    std::mem::forget(entity.state_updated().connect(|_| {}));

    entity.deactivate();
    assert!(!entity.is_active());
    assert!(entity.pending_snapshot().is_empty());
    assert_eq!(entity.state_updated().handler_count(), 0);
    assert!(matches!(entity.set("IsOpen", true), Err(WriteError::Inactive)));

    let replacement = FakeInstance::new("i-2", "Door");
    entity.activate(replacement.handle(), [("spawn".to_string(), Value::from(true))]);
    assert!(entity.is_active());
    assert_eq!(entity.context("spawn"), Some(Value::Bool(true)));
    entity.set("IsOpen", false).unwrap();
    assert!(entity.commit(None));
}

#[test]
fn set_many_is_atomic() {
    let (entity, _instance) = make_entity(mutable_class());

    let result = entity.set_many([
        ("IsOpen".to_string(), Value::Bool(true)),
        ("Missing".to_string(), Value::Bool(true)),
    ]);
    assert!(result.is_err());
    assert!(entity.pending_snapshot().is_empty());

    entity
        .set_many([
            ("IsOpen".to_string(), Value::Bool(true)),
            ("Label".to_string(), Value::Str("front".into())),
        ])
        .unwrap();
    assert_eq!(entity.pending_snapshot().len(), 2);
}
