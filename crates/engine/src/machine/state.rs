// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State definitions: function states, object states, and automatic
//! transitions.

use super::StateMachine;
use aviary_core::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Failure raised inside a state callback. Surfaces as `fail(reason)` on
/// the owning machine, except in leave paths where it is logged and
/// suppressed.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct StateError(pub String);

impl From<String> for StateError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StateError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Cleanup returned by a function state.
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// A function state body.
///
/// Compatibility note: a returned cleanup runs immediately after the
/// function returns, not when the state is left. Use an object state with
/// `on_leave` for per-transition cleanup.
pub type StateFn =
    Arc<dyn Fn(&Arc<StateMachine>, &[Value]) -> Result<Option<Cleanup>, StateError> + Send + Sync>;

/// Condition-driven transition evaluated on every tick, in registration
/// order; the first condition returning true wins.
pub struct AutoTransition {
    pub target: String,
    pub condition: Arc<dyn Fn(&Arc<StateMachine>, f64) -> bool + Send + Sync>,
}

impl AutoTransition {
    pub fn new(
        target: impl Into<String>,
        condition: impl Fn(&Arc<StateMachine>, f64) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self { target: target.into(), condition: Arc::new(condition) }
    }
}

impl Clone for AutoTransition {
    fn clone(&self) -> Self {
        Self { target: self.target.clone(), condition: Arc::clone(&self.condition) }
    }
}

/// An object state: lifecycle hooks plus optional automatic transitions.
pub trait StateHandler: Send + Sync {
    fn on_enter(&self, machine: &Arc<StateMachine>, args: &[Value]) -> Result<(), StateError>;

    fn on_heartbeat(&self, _machine: &Arc<StateMachine>, _dt: f64) -> Result<(), StateError> {
        Ok(())
    }

    fn on_leave(&self, _machine: &Arc<StateMachine>) -> Result<(), StateError> {
        Ok(())
    }

    fn transitions(&self) -> Vec<AutoTransition> {
        Vec::new()
    }
}

/// A registered state body.
#[derive(Clone)]
pub enum StateDef {
    Function(StateFn),
    Handler(Arc<dyn StateHandler>),
}

impl StateDef {
    pub fn function(
        f: impl Fn(&Arc<StateMachine>, &[Value]) -> Result<Option<Cleanup>, StateError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        StateDef::Function(Arc::new(f))
    }

    pub fn handler(h: impl StateHandler + 'static) -> Self {
        StateDef::Handler(Arc::new(h))
    }
}

impl std::fmt::Debug for StateDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateDef::Function(_) => f.write_str("StateDef::Function"),
            StateDef::Handler(_) => f.write_str("StateDef::Handler"),
        }
    }
}

pub(crate) struct RegisteredState {
    pub def: StateDef,
    pub valid_outcomes: Option<HashSet<String>>,
}
