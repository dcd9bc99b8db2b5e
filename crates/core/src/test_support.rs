// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test doubles and builders shared across the workspace's tests.

use crate::instance::{Instance, InstanceRef};
use crate::schema::{PropertyDef, Schema};
use crate::signal::Signal;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// In-process stand-in for a host object.
///
/// Carries an id, a class name with optional ancestor classes for `is_a`,
/// a field map for read-through, and a removal signal fired manually via
/// [`FakeInstance::remove`].
pub struct FakeInstance {
    id: String,
    class: String,
    ancestors: Vec<String>,
    fields: Mutex<HashMap<String, Value>>,
    removed: Signal<()>,
}

impl FakeInstance {
    pub fn new(id: impl Into<String>, class: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            class: class.into(),
            ancestors: Vec::new(),
            fields: Mutex::new(HashMap::new()),
            removed: Signal::new(),
        })
    }

    /// Like [`FakeInstance::new`] with extra classes `is_a` accepts.
    pub fn with_ancestors(
        id: impl Into<String>,
        class: impl Into<String>,
        ancestors: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            class: class.into(),
            ancestors,
            fields: Mutex::new(HashMap::new()),
            removed: Signal::new(),
        })
    }

    pub fn set_field(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.lock().insert(name.into(), value.into());
    }

    /// Simulate the host removing the object.
    pub fn remove(&self) {
        self.removed.fire(());
    }

    /// Upcast to the handle type entities bind to.
    pub fn handle(self: &Arc<Self>) -> InstanceRef {
        Arc::clone(self) as InstanceRef
    }
}

impl Instance for FakeInstance {
    fn instance_id(&self) -> &str {
        &self.id
    }

    fn class_name(&self) -> &str {
        &self.class
    }

    fn is_a(&self, class: &str) -> bool {
        self.class == class || self.ancestors.iter().any(|a| a == class)
    }

    fn removed(&self) -> &Signal<()> {
        &self.removed
    }

    fn get_field(&self, name: &str) -> Option<Value> {
        self.fields.lock().get(name).cloned()
    }
}

/// A small schema used across tests: a replicated boolean, a persisted
/// number, and a plain string.
pub fn door_schema() -> Schema {
    Schema::new()
        .with("IsOpen", PropertyDef::new("boolean").replicate())
        .with("UseCount", PropertyDef::new("number").persist())
        .with("Label", PropertyDef::new("string"))
}
