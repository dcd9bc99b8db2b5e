// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Table-driven schema validation for entity fields.

use crate::value::{Value, TAG_ANY_OBJECT};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Definition of one schema field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Runtime type tag a written value must match: `"boolean"`,
    /// `"number"`, `"string"`, `"table"`, a host class name, or
    /// `"any-object"`.
    pub type_tag: String,
    /// Broadcast committed changes of this field to clients.
    #[serde(default)]
    pub replicate: bool,
    /// Include this field in the persistence envelope.
    #[serde(default)]
    pub persist: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PropertyDef {
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self { type_tag: type_tag.into(), replicate: false, persist: false, description: None }
    }

    pub fn replicate(mut self) -> Self {
        self.replicate = true;
        self
    }

    pub fn persist(mut self) -> Self {
        self.persist = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Validation failure for a staged field write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown field '{field}'")]
    UnknownField { field: String },

    #[error("field '{field}' expects {expected}, got {actual}")]
    TypeMismatch { field: String, expected: String, actual: String },
}

/// Ordered field → [`PropertyDef`] map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: IndexMap<String, PropertyDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field registration.
    pub fn with(mut self, field: impl Into<String>, def: PropertyDef) -> Self {
        self.fields.insert(field.into(), def);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, def: PropertyDef) {
        self.fields.insert(field.into(), def);
    }

    pub fn get(&self, field: &str) -> Option<&PropertyDef> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyDef)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate a value against the field's definition.
    ///
    /// Object values widen: they match when the tag is `any-object`, when
    /// the recorded class equals the tag, or when the host's `is_a`
    /// accepts the tag. Everything else requires an exact tag match.
    pub fn validate(&self, field: &str, value: &Value) -> Result<(), SchemaError> {
        let def = self
            .get(field)
            .ok_or_else(|| SchemaError::UnknownField { field: field.to_string() })?;

        let matches = if def.type_tag == TAG_ANY_OBJECT {
            value.is_object()
        } else if value.is_object() {
            value.is_a(&def.type_tag)
        } else {
            value.type_tag() == def.type_tag
        };

        if matches {
            Ok(())
        } else {
            Err(SchemaError::TypeMismatch {
                field: field.to_string(),
                expected: def.type_tag.clone(),
                actual: value.type_tag().to_string(),
            })
        }
    }
}

impl FromIterator<(String, PropertyDef)> for Schema {
    fn from_iter<T: IntoIterator<Item = (String, PropertyDef)>>(iter: T) -> Self {
        Self { fields: iter.into_iter().collect() }
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
