// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use aviary_wire::{loopback, Broadcast};
use std::time::Duration;

async fn settle() {
    // Paused-clock tests: sleeping drains every ready task and timer.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn commit_broadcasts_only_replicate_fields() {
    let (orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _server_token = orch.run_server(transport);
    let mut broadcasts = client.subscribe();

    let (params, _instance) = door_params("door-1");
    let entity = orch.create_entity(params).unwrap();

    entity.set("IsOpen", true).unwrap();
    entity.set("UseCount", 7_i64).unwrap();
    assert!(entity.commit(None));
    settle().await;

    let message = broadcasts.try_recv().unwrap();
    match message {
        Broadcast::EntityUpdate { entity_id, packet } => {
            assert_eq!(entity_id, EntityId::new("door-1"));
            assert_eq!(packet.len(), 1);
            assert_eq!(packet.get("IsOpen"), Some(&Value::Bool(true)));
        }
    }
    // Authoritative data still carries both fields
    assert_eq!(entity.data_snapshot().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn commit_without_replicate_fields_stays_local() {
    let (orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _server_token = orch.run_server(transport);
    let mut broadcasts = client.subscribe();

    let (params, _instance) = door_params("door-1");
    let entity = orch.create_entity(params).unwrap();

    entity.set("UseCount", 1_i64).unwrap();
    assert!(entity.commit(None));
    settle().await;

    assert!(broadcasts.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn client_seeds_entities_from_server() {
    let (server_orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _server_token = server_orch.run_server(transport);

    let (params, _instance) = door_params("door-1");
    let entity = server_orch.create_entity(params).unwrap();
    entity.set("IsOpen", true).unwrap();
    entity.set("Label", "front").unwrap();
    assert!(entity.commit(None));

    let (client_orch, _clock2) = build(OrchestratorConfig::client());
    let _client_token = client_orch.run_client(client.clone());
    settle().await;

    let mirrored = client_orch.get_entity(&EntityId::new("door-1")).unwrap();
    assert_eq!(mirrored.class_name(), "Door");
    assert_eq!(mirrored.get("IsOpen"), Some(Value::Bool(true)));
    assert_eq!(mirrored.get("Label"), Some(Value::Str("front".into())));
}

#[tokio::test(start_paused = true)]
async fn client_applies_live_deltas() {
    let (server_orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _server_token = server_orch.run_server(transport);

    let (params, _instance) = door_params("door-1");
    let entity = server_orch.create_entity(params).unwrap();

    let (client_orch, _clock2) = build(OrchestratorConfig::client());
    let _client_token = client_orch.run_client(client.clone());
    settle().await;

    entity.set("IsOpen", true).unwrap();
    assert!(entity.commit(None));
    settle().await;

    let mirrored = client_orch.get_entity(&EntityId::new("door-1")).unwrap();
    assert_eq!(mirrored.get("IsOpen"), Some(Value::Bool(true)));
}

#[tokio::test(start_paused = true)]
async fn delta_for_unknown_entity_defers_until_seeded() {
    let (server_orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _server_token = server_orch.run_server(transport);

    // Client connects before the entity exists.
    let (client_orch, _clock2) = build(OrchestratorConfig::client());
    let _client_token = client_orch.run_client(client.clone());
    settle().await;
    assert_eq!(client_orch.entity_count(), 0);

    let (params, _instance) = door_params("door-1");
    let entity = server_orch.create_entity(params).unwrap();
    entity.set("IsOpen", true).unwrap();
    assert!(entity.commit(None));
    settle().await;

    // The unknown delta triggered a seed request and was applied after.
    let mirrored = client_orch.get_entity(&EntityId::new("door-1")).unwrap();
    assert_eq!(mirrored.get("IsOpen"), Some(Value::Bool(true)));
}

#[tokio::test(start_paused = true)]
async fn validating_client_drops_malformed_fields() {
    let (client_orch, _clock) = build(OrchestratorConfig::client().validate_replication());
    let (params, _instance) = door_params("door-1");
    let entity = client_orch.create_entity(params).unwrap();

    let mut packet = ChangeSet::new();
    packet.insert("IsOpen".into(), Value::Num(42.0));
    packet.insert("Label".into(), Value::Str("front".into()));
    client_orch.apply_update(EntityId::new("door-1"), packet).await;

    assert_eq!(entity.get("IsOpen"), None);
    assert_eq!(entity.get("Label"), Some(Value::Str("front".into())));
}

#[tokio::test(start_paused = true)]
async fn trusting_client_applies_packets_verbatim() {
    let (client_orch, _clock) = build(OrchestratorConfig::client());
    let (params, _instance) = door_params("door-1");
    let entity = client_orch.create_entity(params).unwrap();

    let mut packet = ChangeSet::new();
    packet.insert("IsOpen".into(), Value::Num(42.0));
    client_orch.apply_update(EntityId::new("door-1"), packet).await;

    assert_eq!(entity.get("IsOpen"), Some(Value::Num(42.0)));
}
