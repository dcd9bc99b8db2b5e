// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Behavior tree combinators.
//!
//! Pure-functional leaf composition over [`BtStatus`]. Nodes hold no
//! state of their own, so a tree can be re-evaluated every tick; anything
//! stateful belongs in the machine's context.

use crate::machine::{StateMachine, TransitionParams};
use std::sync::Arc;

/// Evaluation result of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtStatus {
    Success,
    Failure,
    Running,
}

aviary_core::simple_display! {
    BtStatus {
        Success => "success",
        Failure => "failure",
        Running => "running",
    }
}

/// A behavior tree node, evaluated against the owning machine.
pub type BtNode = Arc<dyn Fn(&Arc<StateMachine>) -> BtStatus + Send + Sync>;

/// First child not returning `Failure` decides; all-failed is `Failure`.
pub fn selector(children: Vec<BtNode>) -> BtNode {
    Arc::new(move |machine| {
        for child in &children {
            match child(machine) {
                BtStatus::Failure => continue,
                status => return status,
            }
        }
        BtStatus::Failure
    })
}

/// First child not returning `Success` decides; all-succeeded is `Success`.
pub fn sequence(children: Vec<BtNode>) -> BtNode {
    Arc::new(move |machine| {
        for child in &children {
            match child(machine) {
                BtStatus::Success => continue,
                status => return status,
            }
        }
        BtStatus::Success
    })
}

/// Swap `Success` and `Failure`; `Running` passes through.
pub fn inverter(child: BtNode) -> BtNode {
    Arc::new(move |machine| match child(machine) {
        BtStatus::Success => BtStatus::Failure,
        BtStatus::Failure => BtStatus::Success,
        BtStatus::Running => BtStatus::Running,
    })
}

/// `Success` unless the child is still `Running`.
pub fn succeeder(child: BtNode) -> BtNode {
    Arc::new(move |machine| match child(machine) {
        BtStatus::Running => BtStatus::Running,
        _ => BtStatus::Success,
    })
}

/// `Success` iff the predicate holds.
pub fn condition(predicate: impl Fn(&Arc<StateMachine>) -> bool + Send + Sync + 'static) -> BtNode {
    Arc::new(move |machine| {
        if predicate(machine) {
            BtStatus::Success
        } else {
            BtStatus::Failure
        }
    })
}

/// Transition the machine to `name` and return `Success`; a rejected
/// transition is a `Failure`.
pub fn set_state(name: impl Into<String>) -> BtNode {
    let name = name.into();
    Arc::new(move |machine| match machine.change_state(TransitionParams::new(name.clone())) {
        Ok(()) => BtStatus::Success,
        Err(err) => {
            tracing::warn!(machine = %machine.id(), error = %err, "behavior transition rejected");
            BtStatus::Failure
        }
    })
}

#[cfg(test)]
#[path = "behavior_tests.rs"]
mod tests;
