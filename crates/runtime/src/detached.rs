// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side instance resolution.
//!
//! Replication seeds name a class and an object id, not a live handle.
//! Hosts resolve seeds to their real objects through [`InstanceResolver`];
//! anything unresolved binds to a [`DetachedInstance`] so the mirrored
//! entity still works, minus host read-through and removal observation.

use aviary_core::{Instance, InstanceRef, Signal};
use aviary_wire::EntitySeed;
use std::sync::Arc;

/// Maps replication seeds to live host objects.
pub trait InstanceResolver: Send + Sync {
    fn resolve(&self, seed: &EntitySeed) -> Option<InstanceRef>;
}

impl<F> InstanceResolver for F
where
    F: Fn(&EntitySeed) -> Option<InstanceRef> + Send + Sync,
{
    fn resolve(&self, seed: &EntitySeed) -> Option<InstanceRef> {
        self(seed)
    }
}

/// Placeholder handle for entities mirrored without a host object.
pub struct DetachedInstance {
    id: String,
    class: String,
    removed: Signal<()>,
}

impl DetachedInstance {
    pub fn new(id: impl Into<String>, class: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { id: id.into(), class: class.into(), removed: Signal::new() })
    }

    pub fn handle(self: &Arc<Self>) -> InstanceRef {
        Arc::clone(self) as InstanceRef
    }
}

impl Instance for DetachedInstance {
    fn instance_id(&self) -> &str {
        &self.id
    }

    fn class_name(&self) -> &str {
        &self.class
    }

    fn removed(&self) -> &Signal<()> {
        &self.removed
    }
}
