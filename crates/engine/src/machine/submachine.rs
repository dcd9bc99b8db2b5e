// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sub-machine composition.
//!
//! Binding a child class to a parent state creates an object state whose
//! `on_enter` spawns a child machine sharing the parent's context and
//! whose `on_leave` cancels and destroys it. The child's lifecycle
//! signals drive parent transitions, so the child is always torn down
//! before the parent enters the follow-up state.

use super::state::{StateDef, StateError, StateHandler};
use super::{MachineClass, MachineError, MachineParams, StateMachine, StartParams, TransitionParams};
use aviary_core::{MachineId, Signal, Value};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Child binding configuration.
#[derive(Debug, Clone, Default)]
pub struct SubMachineConfig {
    pub initial_state: String,
    pub on_completed: Option<String>,
    pub on_failed: Option<String>,
    pub on_cancelled: Option<String>,
    /// When set, the child's machine id is published into the shared
    /// context under this key for the duration of the parent state.
    pub store_key: Option<String>,
}

impl SubMachineConfig {
    pub fn new(initial_state: impl Into<String>) -> Self {
        Self { initial_state: initial_state.into(), ..Self::default() }
    }

    pub fn on_completed(mut self, target: impl Into<String>) -> Self {
        self.on_completed = Some(target.into());
        self
    }

    pub fn on_failed(mut self, target: impl Into<String>) -> Self {
        self.on_failed = Some(target.into());
        self
    }

    pub fn on_cancelled(mut self, target: impl Into<String>) -> Self {
        self.on_cancelled = Some(target.into());
        self
    }

    pub fn store_key(mut self, key: impl Into<String>) -> Self {
        self.store_key = Some(key.into());
        self
    }
}

struct ActiveChild {
    machine: Arc<StateMachine>,
    connections: Vec<aviary_core::Connection>,
}

struct SubMachineState {
    child_class: Arc<MachineClass>,
    config: SubMachineConfig,
    active: Mutex<Option<ActiveChild>>,
}

impl SubMachineState {
    /// Connect one child lifecycle signal to a parent transition.
    fn bridge<T: Clone + Send + 'static>(
        signal: &Signal<T>,
        parent: &Arc<StateMachine>,
        target: Option<&String>,
        connections: &mut Vec<aviary_core::Connection>,
    ) {
        let Some(target) = target.cloned() else { return };
        let weak: Weak<StateMachine> = Arc::downgrade(parent);
        connections.push(signal.once(move |_| {
            if let Some(parent) = weak.upgrade() {
                if let Err(err) = parent.change_state(TransitionParams::new(target.clone())) {
                    tracing::warn!(machine = %parent.id(), error = %err, "child outcome transition rejected");
                }
            }
        }));
    }
}

impl StateHandler for SubMachineState {
    fn on_enter(&self, machine: &Arc<StateMachine>, _args: &[Value]) -> Result<(), StateError> {
        let child = StateMachine::new(MachineParams {
            id: MachineId::generate(),
            class: Arc::clone(&self.child_class),
            scheduler: Arc::clone(machine.scheduler()),
            // The child works on the parent's context, not a copy.
            context: Some(machine.context()),
            priority: None,
        });

        let mut connections = Vec::new();
        Self::bridge(child.completed(), machine, self.config.on_completed.as_ref(), &mut connections);
        Self::bridge(child.cancelled(), machine, self.config.on_cancelled.as_ref(), &mut connections);
        if let Some(target) = self.config.on_failed.clone() {
            let weak = Arc::downgrade(machine);
            connections.push(child.failed().once(move |reason: &String| {
                if let Some(parent) = weak.upgrade() {
                    let params = TransitionParams::new(target.clone()).arg(reason.clone());
                    if let Err(err) = parent.change_state(params) {
                        tracing::warn!(machine = %parent.id(), error = %err, "child failure transition rejected");
                    }
                }
            }));
        }

        if let Some(key) = &self.config.store_key {
            machine.set_context(key.clone(), Value::Str(child.id().to_string()));
        }

        *self.active.lock() = Some(ActiveChild { machine: Arc::clone(&child), connections });

        child
            .start(StartParams::new(self.config.initial_state.clone()))
            .map_err(|err| StateError::from(err.to_string()))
    }

    fn on_leave(&self, machine: &Arc<StateMachine>) -> Result<(), StateError> {
        if let Some(active) = self.active.lock().take() {
            // Disconnect first so the cancel below cannot re-enter the
            // parent through the outcome bridges.
            for connection in active.connections {
                connection.disconnect();
            }
            active.machine.cancel();
            active.machine.destroy();
        }
        if let Some(key) = &self.config.store_key {
            machine.remove_context(key);
        }
        Ok(())
    }
}

impl StateMachine {
    /// Bind `child_class` to the parent state `name`.
    pub fn add_sub_machine(
        &self,
        name: impl Into<String>,
        child_class: Arc<MachineClass>,
        config: SubMachineConfig,
    ) -> Result<(), MachineError> {
        self.add_state(
            name,
            StateDef::handler(SubMachineState { child_class, config, active: Mutex::new(None) }),
            None,
        )
    }
}

#[cfg(test)]
#[path = "submachine_tests.rs"]
mod tests;
