// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use aviary_engine::{TransitionParams, DEFAULT_FRAME_BUDGET};
use aviary_wire::{
    loopback, EntityCommand, FsmAction, RequestResponder, SchedulerOp, ServiceRequest,
    ServiceResponse,
};
use std::time::Duration;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn commands_route_to_registered_handlers() {
    let (orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _token = orch.run_server(transport);

    let (params, _instance) = door_params("door-1");
    orch.create_entity(params).unwrap();

    orch.register_command_handler(&EntityId::new("door-1"), "open", |entity, _args| {
        entity.set("IsOpen", true).map_err(|e| e.to_string())?;
        if entity.commit(None) {
            Ok(())
        } else {
            Err("commit failed".into())
        }
    });

    use aviary_wire::CommandSender;
    client.send_command(EntityCommand::new("door-1", "open")).await.unwrap();
    settle().await;

    let entity = orch.get_entity(&EntityId::new("door-1")).unwrap();
    assert_eq!(entity.get("IsOpen"), Some(Value::Bool(true)));
}

#[tokio::test(start_paused = true)]
async fn failing_command_handler_does_not_kill_the_pump() {
    let (orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _token = orch.run_server(transport);

    let (params, _instance) = door_params("door-1");
    orch.create_entity(params).unwrap();

    orch.register_command_handler(&EntityId::new("door-1"), "explode", |_, _| {
        Err("boom".into())
    });
    orch.register_command_handler(&EntityId::new("door-1"), "open", |entity, _| {
        entity.set("IsOpen", true).map_err(|e| e.to_string())?;
        entity.commit(None);
        Ok(())
    });

    use aviary_wire::CommandSender;
    client.send_command(EntityCommand::new("door-1", "explode")).await.unwrap();
    client.send_command(EntityCommand::new("door-1", "open")).await.unwrap();
    settle().await;

    let entity = orch.get_entity(&EntityId::new("door-1")).unwrap();
    assert_eq!(entity.get("IsOpen"), Some(Value::Bool(true)));
}

#[tokio::test(start_paused = true)]
async fn named_requests_round_trip() {
    let (orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _token = orch.run_server(transport);

    orch.register_request_handler("ping", |args| {
        Ok(Some(Value::Num(args.len() as f64)))
    });

    let response = client
        .request(ServiceRequest::Named { name: "ping".into(), args: vec![Value::Bool(true)] })
        .await
        .unwrap();
    assert_eq!(response, ServiceResponse::Value { value: Some(Value::Num(1.0)) });

    let response = client
        .request(ServiceRequest::Named { name: "absent".into(), args: vec![] })
        .await
        .unwrap();
    assert!(response.is_error());
}

#[tokio::test(start_paused = true)]
async fn service_requests_are_gated() {
    let (orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _token = orch.run_server(transport);

    // Not started: rejected.
    let response = client.request(ServiceRequest::Snapshot).await.unwrap();
    assert!(response.is_error());

    orch.start_service_manager_api();
    let response = client.request(ServiceRequest::Snapshot).await.unwrap();
    assert!(matches!(response, ServiceResponse::Snapshot { .. }));
}

#[tokio::test(start_paused = true)]
async fn service_token_must_match() {
    let (orch, _clock) = build(OrchestratorConfig::server().service_token("hunter2"));
    let (transport, client) = loopback(16);
    let _token = orch.run_server(transport);
    orch.start_service_manager_api();

    let response = client.request(ServiceRequest::Snapshot).await.unwrap();
    assert!(response.is_error());

    let trusted = client.clone().with_token("hunter2");
    let response = trusted.request(ServiceRequest::Snapshot).await.unwrap();
    assert!(matches!(response, ServiceResponse::Snapshot { .. }));
}

#[tokio::test(start_paused = true)]
async fn update_settings_reaches_the_scheduler() {
    let (orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _token = orch.run_server(transport);
    orch.start_service_manager_api();

    assert_eq!(orch.scheduler().settings().frame_budget, Some(DEFAULT_FRAME_BUDGET));
    let settings = serde_json::json!({
        "frame_budget": 0.010,
        "aging_factor": 2.0,
        "history_max": 64,
        "frame_interval": 0.016,
    });
    let response =
        client.request(ServiceRequest::UpdateSettings { settings }).await.unwrap();
    assert_eq!(response, ServiceResponse::Ok);
    assert_eq!(orch.scheduler().settings().frame_budget, Some(0.010));
    assert_eq!(orch.scheduler().settings().aging_factor, 2.0);
}

#[tokio::test(start_paused = true)]
async fn fsm_actions_cancel_and_retry() {
    let (orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _token = orch.run_server(transport);
    orch.start_service_manager_api();

    let machine = orch
        .create_state_machine(CreateMachineParams::new("Patrol").machine_id("m-1"))
        .unwrap();
    machine.start(StartParams::new("Idle")).unwrap();

    let response = client
        .request(ServiceRequest::Fsm {
            action: FsmAction::Cancel { machine_id: MachineId::new("m-1") },
        })
        .await
        .unwrap();
    assert_eq!(response, ServiceResponse::Ok);
    assert_eq!(orch.machine_count(), 0);

    let response = client
        .request(ServiceRequest::Fsm {
            action: FsmAction::Retry { machine_id: MachineId::new("m-1") },
        })
        .await
        .unwrap();
    assert!(response.is_error());
}

#[tokio::test(start_paused = true)]
async fn console_commands_dispatch_by_name() {
    let (orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _token = orch.run_server(transport);
    orch.start_service_manager_api();

    orch.register_console_command("echo", |args| Ok(args.first().cloned()));

    let response = client
        .request(ServiceRequest::ConsoleCommand {
            name: "echo".into(),
            args: vec![Value::Str("hi".into())],
        })
        .await
        .unwrap();
    assert_eq!(response, ServiceResponse::Value { value: Some(Value::Str("hi".into())) });
}

#[tokio::test(start_paused = true)]
async fn scheduler_ops_forward() {
    let (orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _token = orch.run_server(transport);
    orch.start_service_manager_api();

    orch.scheduler()
        .schedule(aviary_engine::ScheduleParams::new("tick", || Ok(())))
        .unwrap();

    let response = client
        .request(ServiceRequest::Scheduler {
            op: SchedulerOp::Execute { name: aviary_core::TaskName::new("tick") },
        })
        .await
        .unwrap();
    assert_eq!(response, ServiceResponse::Ok);

    let response = client
        .request(ServiceRequest::Scheduler {
            op: SchedulerOp::Deschedule { name: aviary_core::TaskName::new("tick") },
        })
        .await
        .unwrap();
    assert_eq!(response, ServiceResponse::Ok);
    assert_eq!(orch.scheduler().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn snapshot_reports_machines_entities_and_logs() {
    let (orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _token = orch.run_server(transport);
    orch.start_service_manager_api();

    let (params, _instance) = door_params("door-1");
    orch.create_entity(params).unwrap();
    let machine = orch
        .create_state_machine(CreateMachineParams::new("Patrol").machine_id("m-1"))
        .unwrap();
    machine.start(StartParams::new("Idle")).unwrap();
    machine.change_state(TransitionParams::new("Walk")).unwrap();
    orch.logger().info(None, "hello");

    let response = client.request(ServiceRequest::Snapshot).await.unwrap();
    let ServiceResponse::Snapshot { snapshot } = response else {
        panic!("expected snapshot");
    };
    assert_eq!(snapshot["entities"].as_array().unwrap().len(), 1);
    let machines = snapshot["machines"].as_array().unwrap();
    assert_eq!(machines.len(), 1);
    assert_eq!(machines[0]["state"], "Walk");
    assert!(!snapshot["logs"].as_array().unwrap().is_empty());
    assert!(snapshot["scheduler"].is_object());
}

#[tokio::test(start_paused = true)]
async fn client_request_helper_returns_value_or_none() {
    let (server_orch, _clock) = server();
    let (transport, client) = loopback(16);
    let _server_token = server_orch.run_server(transport);
    server_orch.register_request_handler("greet", |_| Ok(Some(Value::Str("hello".into()))));

    let (client_orch, _clock2) = build(OrchestratorConfig::client());
    let _client_token = client_orch.run_client(client.clone());
    settle().await;

    assert_eq!(client_orch.request("greet", vec![]).await, Some(Value::Str("hello".into())));
    assert_eq!(client_orch.request("absent", vec![]).await, None);
}

#[tokio::test(start_paused = true)]
async fn send_command_is_a_noop_on_the_server_role() {
    let (orch, _clock) = server();
    // No transport, server role: silently ignored.
    orch.send_command(&EntityId::new("door-1"), "open", vec![]);
}
