// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Round-trip properties for the framing layer.

use crate::message::{Broadcast, EntityCommand};
use crate::request::{FsmAction, SchedulerOp, ServiceRequest};
use crate::response::ServiceResponse;
use crate::wire::{decode, encode};
use aviary_core::{ChangeSet, EntityId, MachineId, TaskName, Value};
use proptest::prelude::*;

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<f64>().prop_filter("finite", |n| n.is_finite()).prop_map(Value::Num),
        "[a-zA-Z0-9 _-]{0,16}".prop_map(Value::Str),
        ("[A-Z][a-z]{1,8}", "[a-z0-9-]{1,12}")
            .prop_map(|(class, id)| Value::ObjectRef { class, id }),
    ]
}

fn change_set_strategy() -> impl Strategy<Value = ChangeSet> {
    proptest::collection::vec(("[A-Z][a-zA-Z]{0,10}", value_strategy()), 0..6)
        .prop_map(|entries| entries.into_iter().collect())
}

fn command_strategy() -> impl Strategy<Value = EntityCommand> {
    ("[a-z0-9-]{1,16}", "[a-z_]{1,12}", proptest::collection::vec(value_strategy(), 0..4))
        .prop_map(|(id, command, args)| EntityCommand {
            entity_id: EntityId::new(id),
            command,
            args,
        })
}

fn request_strategy() -> impl Strategy<Value = ServiceRequest> {
    prop_oneof![
        Just(ServiceRequest::Snapshot),
        Just(ServiceRequest::RequestEntitySnapshot),
        "[a-z0-9-]{1,12}".prop_map(|id| ServiceRequest::Fsm {
            action: FsmAction::Cancel { machine_id: MachineId::new(id) }
        }),
        "[a-z0-9-]{1,12}".prop_map(|name| ServiceRequest::Scheduler {
            op: SchedulerOp::Execute { name: TaskName::new(name) }
        }),
        ("[a-z_]{1,10}", proptest::collection::vec(value_strategy(), 0..3))
            .prop_map(|(name, args)| ServiceRequest::Named { name, args }),
    ]
}

proptest! {
    #[test]
    fn broadcast_frames_round_trip(entity_id in "[a-z0-9-]{1,16}", packet in change_set_strategy()) {
        let message = Broadcast::EntityUpdate { entity_id: EntityId::new(entity_id), packet };
        let frame = encode(&message).unwrap();
        let back: Broadcast = decode(&frame).unwrap();
        prop_assert_eq!(back, message);
    }

    #[test]
    fn command_frames_round_trip(command in command_strategy()) {
        let frame = encode(&command).unwrap();
        let back: EntityCommand = decode(&frame).unwrap();
        prop_assert_eq!(back, command);
    }

    #[test]
    fn request_frames_round_trip(request in request_strategy()) {
        let frame = encode(&request).unwrap();
        let back: ServiceRequest = decode(&frame).unwrap();
        prop_assert_eq!(back, request);
    }

    #[test]
    fn error_responses_round_trip(message in "[ -~]{0,64}") {
        let response = ServiceResponse::error(message);
        let frame = encode(&response).unwrap();
        let back: ServiceResponse = decode(&frame).unwrap();
        prop_assert_eq!(back, response);
    }
}
