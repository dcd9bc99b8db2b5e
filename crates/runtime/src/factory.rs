// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Class compilation.
//!
//! Applications describe entities and machines as plain definition
//! records; the factory compiles them into the class descriptors the
//! orchestrator instantiates. Implementation hooks (apply behavior,
//! state registration) attach here, keeping definitions data-first.

use crate::error::RuntimeError;
use aviary_core::{ApplyChanges, EntityClass, Schema};
use aviary_engine::{MachineClass, StateMachine};
use std::collections::HashMap;
use std::sync::Arc;

/// Entity class definition.
pub struct EntityDef {
    pub name: String,
    pub schema: Schema,
    pub apply: Option<Arc<dyn ApplyChanges>>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self { name: name.into(), schema, apply: None }
    }

    /// Attach the apply behavior; without one the compiled class is
    /// immutable and commits fail.
    pub fn apply(mut self, apply: impl ApplyChanges + 'static) -> Self {
        self.apply = Some(Arc::new(apply));
        self
    }
}

/// State machine class definition.
pub struct MachineDef {
    pub class_name: String,
    pub valid_states: Option<Vec<String>>,
    pub terminal_states: Vec<String>,
    pub priority: u32,
    pub strict_terminals: bool,
    pub register_states: Option<Arc<dyn Fn(&Arc<StateMachine>) + Send + Sync>>,
}

impl MachineDef {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            valid_states: None,
            terminal_states: Vec::new(),
            priority: 1,
            strict_terminals: false,
            register_states: None,
        }
    }

    pub fn valid_states(mut self, states: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.valid_states = Some(states.into_iter().map(Into::into).collect());
        self
    }

    pub fn terminal_states(mut self, states: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.terminal_states = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn strict_terminals(mut self) -> Self {
        self.strict_terminals = true;
        self
    }

    /// Attach the hook registering states on each new instance.
    pub fn register_states(mut self, hook: impl Fn(&Arc<StateMachine>) + Send + Sync + 'static) -> Self {
        self.register_states = Some(Arc::new(hook));
        self
    }
}

/// Compiled class registry.
#[derive(Default)]
pub struct Factory {
    entities: HashMap<String, Arc<EntityClass>>,
    machines: HashMap<String, Arc<MachineClass>>,
}

impl Factory {
    /// Compile both registries into class descriptors.
    pub fn compile(
        entity_defs: impl IntoIterator<Item = EntityDef>,
        machine_defs: impl IntoIterator<Item = MachineDef>,
    ) -> Self {
        let entities = entity_defs
            .into_iter()
            .map(|def| {
                let mut class = EntityClass::new(def.name.clone(), def.schema);
                class.apply = def.apply;
                (def.name, Arc::new(class))
            })
            .collect();

        let machines = machine_defs
            .into_iter()
            .map(|def| {
                let mut class = MachineClass::new(def.class_name.clone())
                    .priority(def.priority)
                    .terminal_states(def.terminal_states);
                if let Some(states) = def.valid_states {
                    class = class.valid_states(states);
                }
                if def.strict_terminals {
                    class = class.strict_terminals();
                }
                class.on_register = def.register_states;
                (def.class_name, Arc::new(class))
            })
            .collect();

        Self { entities, machines }
    }

    pub fn entity_class(&self, name: &str) -> Result<Arc<EntityClass>, RuntimeError> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownEntityClass(name.to_string()))
    }

    pub fn machine_class(&self, name: &str) -> Result<Arc<MachineClass>, RuntimeError> {
        self.machines
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownMachineClass(name.to_string()))
    }

    pub fn entity_classes(&self) -> &HashMap<String, Arc<EntityClass>> {
        &self.entities
    }

    pub fn machine_classes(&self) -> &HashMap<String, Arc<MachineClass>> {
        &self.machines
    }
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
