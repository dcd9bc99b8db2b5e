// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use aviary_wire::{loopback, Broadcast};
use std::time::Duration;

#[test]
fn pool_entity_deactivates_and_parks() {
    let (orch, _clock) = server();
    let (params, _instance) = door_params("door-1");
    let entity = orch.create_entity(params).unwrap();
    entity.set("IsOpen", true).unwrap();

    orch.pool_entity(&EntityId::new("door-1")).unwrap();

    assert!(!entity.is_active());
    assert!(entity.is_alive());
    assert!(entity.pending_snapshot().is_empty());
    assert_eq!(orch.pooled_count("Door"), 1);
    assert!(orch.get_entity(&EntityId::new("door-1")).is_none());
}

#[test]
fn get_pooled_entity_reuses_and_reactivates() {
    let (orch, _clock) = server();
    let (params, _instance) = door_params("door-1");
    let entity = orch.create_entity(params).unwrap();
    orch.pool_entity(&EntityId::new("door-1")).unwrap();

    let replacement = FakeInstance::new("i-2", "Door");
    let reused = orch
        .get_pooled_entity(
            CreateEntityParams::new("Door", replacement.handle())
                .entity_id("door-1")
                .context("spawn", true),
        )
        .unwrap();

    assert!(Arc::ptr_eq(&entity, &reused));
    assert!(reused.is_active());
    assert_eq!(reused.id(), &EntityId::new("door-1"));
    assert_eq!(reused.context("spawn"), Some(Value::Bool(true)));
    assert_eq!(reused.valid_properties().len(), 3);
    assert_eq!(orch.pooled_count("Door"), 0);
    assert!(orch.get_entity(&EntityId::new("door-1")).is_some());

    // The rebind took: removing the new instance destroys the entity.
    replacement.remove();
    assert!(!reused.is_alive());
}

#[test]
fn empty_pool_falls_through_to_creation() {
    let (orch, _clock) = server();
    let (params, _instance) = door_params("door-9");
    let entity = orch.get_pooled_entity(params).unwrap();
    assert_eq!(entity.id(), &EntityId::new("door-9"));
    assert_eq!(orch.entity_count(), 1);
}

#[test]
fn pooled_entity_rejects_writes_until_reused() {
    let (orch, _clock) = server();
    let (params, _instance) = door_params("door-1");
    let entity = orch.create_entity(params).unwrap();
    orch.pool_entity(&EntityId::new("door-1")).unwrap();

    assert!(entity.set("IsOpen", true).is_err());
    assert!(!entity.commit(None));
}

#[tokio::test(start_paused = true)]
async fn reused_entity_replicates_again() {
    let (orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _token = orch.run_server(transport);
    let mut broadcasts = client.subscribe();

    let (params, _instance) = door_params("door-1");
    orch.create_entity(params).unwrap();
    orch.pool_entity(&EntityId::new("door-1")).unwrap();

    let replacement = FakeInstance::new("i-2", "Door");
    let reused = orch
        .get_pooled_entity(CreateEntityParams::new("Door", replacement.handle()).entity_id("door-1"))
        .unwrap();

    reused.set("IsOpen", true).unwrap();
    assert!(reused.commit(None));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(broadcasts.try_recv().unwrap(), Broadcast::EntityUpdate { .. }));
}
