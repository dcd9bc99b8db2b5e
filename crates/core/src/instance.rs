// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host object handles.
//!
//! The runtime does not own the host object model. An [`Instance`] is the
//! seam: a stable identity, a class name for `is_a` checks, a removal
//! signal observed by the owning entity, and optional read-through field
//! access. Hosts implement this trait for whatever their objects are.

use crate::signal::Signal;
use crate::value::Value;
use std::sync::Arc;

/// Handle to an external host object bound to an entity.
pub trait Instance: Send + Sync {
    /// Stable identity of the host object.
    fn instance_id(&self) -> &str;

    /// Runtime class name of the host object.
    fn class_name(&self) -> &str;

    /// Is-a check against a class name, honoring host inheritance.
    fn is_a(&self, class: &str) -> bool {
        self.class_name() == class
    }

    /// Fired exactly once when the host removes the object.
    fn removed(&self) -> &Signal<()>;

    /// Read-through access to a field on the host object.
    fn get_field(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Shared instance handle. The entity observes the object's removal but
/// never controls its lifetime.
pub type InstanceRef = Arc<dyn Instance>;
