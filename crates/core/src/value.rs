// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dynamic field values.
//!
//! Entity fields and machine context slots hold [`Value`]s: primitives,
//! composites carried as JSON, or references to host objects. Every value
//! answers a runtime [`type_tag`](Value::type_tag) used by schema
//! validation; object values additionally answer `is_a` through the live
//! instance handle.
//!
//! On the wire, live object handles flatten to `(class, id)` references;
//! deserialization therefore yields [`Value::ObjectRef`], never
//! [`Value::Object`]. The receiving side resolves references back to
//! handles if it needs them.

use crate::instance::{Instance as _, InstanceRef};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Type tag for booleans.
pub const TAG_BOOL: &str = "boolean";
/// Type tag for numbers.
pub const TAG_NUM: &str = "number";
/// Type tag for strings.
pub const TAG_STR: &str = "string";
/// Type tag for JSON composites.
pub const TAG_JSON: &str = "table";
/// Wildcard tag matching any object value.
pub const TAG_ANY_OBJECT: &str = "any-object";

/// Ordered field → value map. Insertion order is preserved so change sets
/// replay and replicate in the order they were staged.
pub type ChangeSet = IndexMap<String, Value>;

/// A dynamically typed field value.
#[derive(Clone)]
pub enum Value {
    Bool(bool),
    Num(f64),
    Str(String),
    /// Composite data carried opaquely as JSON.
    Json(serde_json::Value),
    /// Live handle to a host object.
    Object(InstanceRef),
    /// Detached reference to a host object (wire form).
    ObjectRef { class: String, id: String },
}

impl Value {
    /// Runtime type tag, as matched against a schema's `type_tag`.
    pub fn type_tag(&self) -> &str {
        match self {
            Value::Bool(_) => TAG_BOOL,
            Value::Num(_) => TAG_NUM,
            Value::Str(_) => TAG_STR,
            Value::Json(_) => TAG_JSON,
            Value::Object(instance) => instance.class_name(),
            Value::ObjectRef { class, .. } => class,
        }
    }

    /// True for both live object handles and detached references.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_) | Value::ObjectRef { .. })
    }

    /// Is-a check against a class tag.
    ///
    /// Live handles delegate to the host's inheritance check; detached
    /// references only match their recorded class. Non-object values
    /// match their exact tag.
    pub fn is_a(&self, tag: &str) -> bool {
        match self {
            Value::Object(instance) => {
                tag == TAG_ANY_OBJECT || instance.class_name() == tag || instance.is_a(tag)
            }
            Value::ObjectRef { class, .. } => tag == TAG_ANY_OBJECT || class == tag,
            _ => self.type_tag() == tag,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Object identity for live handles and detached references.
    pub fn object_id(&self) -> Option<&str> {
        match self {
            Value::Object(instance) => Some(instance.instance_id()),
            Value::ObjectRef { id, .. } => Some(id),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a.total_cmp(b).is_eq(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            // Objects compare by host identity, so a live handle equals
            // the detached reference it flattened to.
            _ => match (self.object_id(), other.object_id()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Num(n) => write!(f, "Num({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Json(j) => write!(f, "Json({j})"),
            Value::Object(i) => {
                write!(f, "Object({}:{})", i.class_name(), i.instance_id())
            }
            Value::ObjectRef { class, id } => write!(f, "ObjectRef({class}:{id})"),
        }
    }
}

/// Wire form of a [`Value`]: live handles flatten to references.
#[derive(Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
enum WireValue {
    Bool(bool),
    Num(f64),
    Str(String),
    Json(serde_json::Value),
    Object { class: String, id: String },
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = match self {
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Num(n) => WireValue::Num(*n),
            Value::Str(s) => WireValue::Str(s.clone()),
            Value::Json(j) => WireValue::Json(j.clone()),
            Value::Object(instance) => WireValue::Object {
                class: instance.class_name().to_string(),
                id: instance.instance_id().to_string(),
            },
            Value::ObjectRef { class, id } => {
                WireValue::Object { class: class.clone(), id: id.clone() }
            }
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match WireValue::deserialize(deserializer)? {
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Num(n) => Value::Num(n),
            WireValue::Str(s) => Value::Str(s),
            WireValue::Json(j) => Value::Json(j),
            WireValue::Object { class, id } => Value::ObjectRef { class, id },
        })
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Num(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Num(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}

impl From<InstanceRef> for Value {
    fn from(instance: InstanceRef) -> Self {
        Value::Object(instance)
    }
}

#[cfg(test)]
#[path = "value_tests.rs"]
mod tests;
