// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::message::{Broadcast, EntityCommand};
use aviary_core::{ChangeSet, EntityId, Value};

fn sample_broadcast() -> Broadcast {
    let mut packet = ChangeSet::new();
    packet.insert("IsOpen".into(), Value::Bool(true));
    packet.insert("Label".into(), Value::Str("front".into()));
    Broadcast::EntityUpdate { entity_id: EntityId::new("door-1"), packet }
}

#[test]
fn encode_decode_round_trip() {
    let message = sample_broadcast();
    let frame = encode(&message).unwrap();
    let back: Broadcast = decode(&frame).unwrap();
    assert_eq!(back, message);
}

#[test]
fn frame_carries_big_endian_length() {
    let frame = encode(&sample_broadcast()).unwrap();
    let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    assert_eq!(declared, frame.len() - 4);
}

#[test]
fn truncated_frame_is_an_io_error() {
    let mut frame = encode(&sample_broadcast()).unwrap();
    frame.truncate(frame.len() - 1);
    let err = decode::<Broadcast>(&frame).unwrap_err();
    assert!(matches!(err, ProtocolError::Io(_)));
}

#[test]
fn oversized_declared_length_is_rejected() {
    let mut frame = vec![0xFF, 0xFF, 0xFF, 0xFF];
    frame.extend_from_slice(b"{}");
    let err = decode::<Broadcast>(&frame).unwrap_err();
    assert!(matches!(err, ProtocolError::TooLarge(_)));
}

#[test]
fn garbage_payload_is_a_json_error() {
    let mut frame = Vec::new();
    frame.extend_from_slice(&3_u32.to_be_bytes());
    frame.extend_from_slice(b"abc");
    let err = decode::<Broadcast>(&frame).unwrap_err();
    assert!(matches!(err, ProtocolError::Json(_)));
}

#[tokio::test]
async fn stream_round_trip() {
    let (mut a, mut b) = tokio::io::duplex(4096);

    let command = EntityCommand::new("door-1", "open").arg(true);
    write_message(&mut a, &command).await.unwrap();

    let back: EntityCommand = read_message(&mut b).await.unwrap();
    assert_eq!(back, command);
}

#[tokio::test]
async fn multiple_messages_in_sequence() {
    let (mut a, mut b) = tokio::io::duplex(4096);

    for n in 0..3 {
        let command = EntityCommand::new(format!("door-{n}"), "open");
        write_message(&mut a, &command).await.unwrap();
    }
    for n in 0..3 {
        let back: EntityCommand = read_message(&mut b).await.unwrap();
        assert_eq!(back.entity_id, EntityId::new(format!("door-{n}")));
    }
}
