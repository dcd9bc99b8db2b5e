// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use aviary_core::{ChangeSet, EntityId, Value};

#[tokio::test]
async fn commands_flow_client_to_server() {
    let (mut server, client) = loopback(16);

    client.send_command(EntityCommand::new("door-1", "open").arg(true)).await.unwrap();

    let command = server.commands.recv().await.unwrap();
    assert_eq!(command.entity_id, EntityId::new("door-1"));
    assert_eq!(command.command, "open");
    assert_eq!(command.args, vec![Value::Bool(true)]);
}

#[tokio::test]
async fn requests_get_replies() {
    let (mut server, client) = loopback(16);

    let server_task = tokio::spawn(async move {
        let inbound = server.requests.recv().await.unwrap();
        assert!(matches!(inbound.request, ServiceRequest::Snapshot));
        let _ = inbound.reply.send(ServiceResponse::Ok);
    });

    let response = client.request(ServiceRequest::Snapshot).await.unwrap();
    assert_eq!(response, ServiceResponse::Ok);
    server_task.await.unwrap();
}

#[tokio::test]
async fn request_token_travels_with_the_request() {
    let (mut server, client) = loopback(16);
    let client = client.with_token("secret");

    let server_task = tokio::spawn(async move {
        let inbound = server.requests.recv().await.unwrap();
        assert_eq!(inbound.token.as_deref(), Some("secret"));
        let _ = inbound.reply.send(ServiceResponse::Ok);
    });

    client.request(ServiceRequest::Snapshot).await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn dropped_reply_is_closed_and_no_reply_times_out() {
    let (mut server, client) = loopback(16);
    let client = client.with_timeout(Duration::from_millis(100));

    // Server drops the reply slot without answering.
    let drop_task = tokio::spawn(async move {
        let inbound = server.requests.recv().await.unwrap();
        drop(inbound.reply);
        // Hold the next request open without ever answering it.
        let _held = server.requests.recv().await;
        std::future::pending::<()>().await;
    });

    let err = client.request(ServiceRequest::Snapshot).await.unwrap_err();
    assert!(matches!(err, TransportError::Closed));

    let err = client.request(ServiceRequest::RequestEntitySnapshot).await.unwrap_err();
    assert!(matches!(err, TransportError::Timeout));
    drop_task.abort();
}

#[tokio::test]
async fn broadcasts_reach_all_subscribers() {
    let (server, client) = loopback(16);
    let mut first = client.subscribe();
    let mut second = client.clone().subscribe();

    let mut packet = ChangeSet::new();
    packet.insert("IsOpen".into(), Value::Bool(true));
    let message = Broadcast::EntityUpdate { entity_id: EntityId::new("door-1"), packet };

    server.broadcaster().broadcast(message.clone()).await.unwrap();

    assert_eq!(first.recv().await.unwrap(), message);
    assert_eq!(second.recv().await.unwrap(), message);
}

#[tokio::test]
async fn broadcast_without_subscribers_is_best_effort() {
    let (server, _client) = loopback(16);
    let message = Broadcast::EntityUpdate {
        entity_id: EntityId::new("door-1"),
        packet: ChangeSet::new(),
    };
    // No subscriber exists; the send still reports success.
    server.broadcaster().broadcast(message).await.unwrap();
}
