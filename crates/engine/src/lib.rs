// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! aviary-engine: the frame-budgeted scheduler, the hierarchical state
//! machine engine, and the behavior tree combinators.

pub mod behavior;
pub mod machine;
pub mod scheduler;

pub use behavior::{condition, inverter, selector, sequence, set_state, succeeder, BtNode, BtStatus};
pub use machine::{
    AutoTransition, Cleanup, Context, MachineClass, MachineError, MachineOutcome, MachineParams,
    Priority, StartParams, StateChange, StateDef, StateError, StateFn, StateHandler, StateMachine,
    SubMachineConfig, TransitionParams,
};
pub use scheduler::{
    sync_action, ActionFuture, DispatchOutcome, DispatchRecord, FramePhase, ScheduleError,
    ScheduleParams, Scheduler, SchedulerSettings, SchedulerSnapshot, SharedScheduler, StepReport,
    TaskAction, TaskError, TaskInfo, TaskStats, DEFAULT_FRAME_BUDGET, FALLBACK_FRAME_BUDGET,
};
