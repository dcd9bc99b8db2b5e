// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entity data authority.
//!
//! An [`Entity`] wraps one host object with a schema-validated record.
//! Writes stage into a pending partition; [`Entity::commit`] pushes the
//! staged snapshot through the class's [`ApplyChanges`] behavior, merges
//! it into the authoritative data partition, and fires `StateUpdated`
//! with exactly that snapshot. Reads resolve pending → data → context →
//! bound object.
//!
//! The entity observes the host object's removal signal and destroys
//! itself when the object goes away.

use crate::clock::epoch_ms;
use crate::disposable::Disposable;
use crate::id::EntityId;
use crate::instance::{Instance as _, InstanceRef};
use crate::logger::RingLogger;
use crate::schema::{Schema, SchemaError};
use crate::signal::Signal;
use crate::value::{ChangeSet, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure from an [`ApplyChanges`] implementation.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ApplyError(pub String);

impl From<String> for ApplyError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ApplyError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Behavior invoked with the staged snapshot before it becomes
/// authoritative. Entities without one are immutable: commits fail.
pub trait ApplyChanges: Send + Sync {
    fn apply_changes(&self, entity: &Entity, changes: &ChangeSet) -> Result<(), ApplyError>;
}

impl<F> ApplyChanges for F
where
    F: Fn(&Entity, &ChangeSet) -> Result<(), ApplyError> + Send + Sync,
{
    fn apply_changes(&self, entity: &Entity, changes: &ChangeSet) -> Result<(), ApplyError> {
        self(entity, changes)
    }
}

/// Compiled entity class descriptor: a name, a schema, and optional
/// behavior. Classes are plain records assembled by the factory;
/// composition, not inheritance.
#[derive(Clone)]
pub struct EntityClass {
    pub name: String,
    pub schema: Schema,
    pub apply: Option<Arc<dyn ApplyChanges>>,
}

impl EntityClass {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self { name: name.into(), schema, apply: None }
    }

    pub fn with_apply(mut self, apply: impl ApplyChanges + 'static) -> Self {
        self.apply = Some(Arc::new(apply));
        self
    }
}

impl std::fmt::Debug for EntityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityClass")
            .field("name", &self.name)
            .field("fields", &self.schema.len())
            .field("mutable", &self.apply.is_some())
            .finish()
    }
}

/// Exclusive commit ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityLock {
    pub owner_id: String,
    pub acquired_at_ms: u64,
}

/// Rejected staged write.
#[derive(Debug, Clone, Error)]
pub enum WriteError {
    #[error("entity destroyed")]
    Destroyed,

    #[error("entity inactive")]
    Inactive,

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Rejected commit. Boundary callers usually go through [`Entity::commit`],
/// which folds this into a logged `false`.
#[derive(Debug, Clone, Error)]
pub enum CommitError {
    #[error("entity destroyed")]
    Destroyed,

    #[error("entity inactive")]
    Inactive,

    #[error("nothing staged")]
    NothingStaged,

    #[error("entity class has no apply behavior")]
    Immutable,

    #[error("lock held by '{owner}'")]
    LockHeld { owner: String },

    #[error("apply failed: {0}")]
    Apply(#[from] ApplyError),
}

struct EntityInner {
    instance: InstanceRef,
    owner_id: Option<String>,
    schema: Schema,
    data: ChangeSet,
    pending: ChangeSet,
    context: HashMap<String, Value>,
    lock: Option<EntityLock>,
    disposables: Vec<Disposable>,
    alive: bool,
    active: bool,
}

/// Construction parameters for [`Entity::new`].
pub struct EntityParams {
    pub id: EntityId,
    pub class: Arc<EntityClass>,
    pub instance: InstanceRef,
    pub owner_id: Option<String>,
    pub logger: Option<RingLogger>,
}

/// Schema-validated transactional record bound to one host object.
pub struct Entity {
    id: EntityId,
    class: Arc<EntityClass>,
    logger: RingLogger,
    state_updated: Signal<ChangeSet>,
    destroyed: Signal<()>,
    inner: Mutex<EntityInner>,
}

impl Entity {
    pub fn new(params: EntityParams) -> Arc<Self> {
        let EntityParams { id, class, instance, owner_id, logger } = params;
        let schema = class.schema.clone();
        let entity = Arc::new(Self {
            id,
            class,
            logger: logger.unwrap_or_default(),
            state_updated: Signal::new(),
            destroyed: Signal::new(),
            inner: Mutex::new(EntityInner {
                instance: Arc::clone(&instance),
                owner_id,
                schema,
                data: ChangeSet::new(),
                pending: ChangeSet::new(),
                context: HashMap::new(),
                lock: None,
                disposables: Vec::new(),
                alive: true,
                active: true,
            }),
        });
        entity.observe_instance(&instance);
        entity
    }

    /// Watch the bound object; its removal destroys the entity.
    fn observe_instance(self: &Arc<Self>, instance: &InstanceRef) {
        let weak = Arc::downgrade(self);
        let conn = instance.removed().once(move |_| {
            if let Some(entity) = weak.upgrade() {
                tracing::debug!(entity = %entity.id, "bound object removed");
                entity.destroy();
            }
        });
        self.manage(conn);
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn class(&self) -> &Arc<EntityClass> {
        &self.class
    }

    pub fn class_name(&self) -> &str {
        &self.class.name
    }

    pub fn owner_id(&self) -> Option<String> {
        self.inner.lock().owner_id.clone()
    }

    pub fn instance(&self) -> InstanceRef {
        Arc::clone(&self.inner.lock().instance)
    }

    /// Fired once per successful commit with the committed snapshot.
    pub fn state_updated(&self) -> &Signal<ChangeSet> {
        &self.state_updated
    }

    /// Fired exactly once on destruction.
    pub fn destroyed(&self) -> &Signal<()> {
        &self.destroyed
    }

    pub fn is_alive(&self) -> bool {
        self.inner.lock().alive
    }

    pub fn is_active(&self) -> bool {
        let inner = self.inner.lock();
        inner.alive && inner.active
    }

    /// The current schema (per-entity; starts as the class schema).
    pub fn valid_properties(&self) -> Schema {
        self.inner.lock().schema.clone()
    }

    /// Replace the schema. Advanced use; staged and committed values are
    /// not revalidated.
    pub fn define_schema(&self, schema: Schema) {
        self.inner.lock().schema = schema;
    }

    /// Read a field: pending → data → context → bound object.
    ///
    /// Destroyed entities read absent.
    pub fn get(&self, field: &str) -> Option<Value> {
        let (instance, in_schema) = {
            let inner = self.inner.lock();
            if !inner.alive {
                tracing::warn!(entity = %self.id, field, "read on destroyed entity");
                return None;
            }
            if let Some(v) = inner.pending.get(field) {
                return Some(v.clone());
            }
            if let Some(v) = inner.data.get(field) {
                return Some(v.clone());
            }
            if let Some(v) = inner.context.get(field) {
                return Some(v.clone());
            }
            (Arc::clone(&inner.instance), inner.schema.contains(field))
        };
        // Read-through to the host object, outside the lock.
        if in_schema {
            instance.get_field(field)
        } else {
            None
        }
    }

    /// Stage a validated write into the pending partition.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<(), WriteError> {
        let value = value.into();
        let mut inner = self.inner.lock();
        if !inner.alive {
            self.reject_write(field, "entity destroyed");
            return Err(WriteError::Destroyed);
        }
        if !inner.active {
            self.reject_write(field, "entity inactive");
            return Err(WriteError::Inactive);
        }
        if let Err(err) = inner.schema.validate(field, &value) {
            self.reject_write(field, &err.to_string());
            return Err(err.into());
        }
        inner.pending.insert(field.to_string(), value);
        Ok(())
    }

    /// Stage several writes atomically: all validate or none stage.
    pub fn set_many(
        &self,
        entries: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<(), WriteError> {
        let entries: Vec<(String, Value)> = entries.into_iter().collect();
        let mut inner = self.inner.lock();
        if !inner.alive {
            return Err(WriteError::Destroyed);
        }
        if !inner.active {
            return Err(WriteError::Inactive);
        }
        for (field, value) in &entries {
            if let Err(err) = inner.schema.validate(field, value) {
                self.reject_write(field, &err.to_string());
                return Err(err.into());
            }
        }
        for (field, value) in entries {
            inner.pending.insert(field, value);
        }
        Ok(())
    }

    fn reject_write(&self, field: &str, reason: &str) {
        tracing::warn!(entity = %self.id, field, reason, "write rejected");
        self.logger.warn(
            Some(&format!("entity:{}", self.id)),
            format!("write to '{field}' rejected: {reason}"),
        );
    }

    /// Non-schema scratch value. Never replicated, never persisted.
    pub fn set_context(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.lock().context.insert(key.into(), value.into());
    }

    /// Shortcut staging a whole map of context values.
    pub fn set_context_map(&self, entries: impl IntoIterator<Item = (String, Value)>) {
        let mut inner = self.inner.lock();
        for (key, value) in entries {
            inner.context.insert(key, value);
        }
    }

    pub fn context(&self, key: &str) -> Option<Value> {
        self.inner.lock().context.get(key).cloned()
    }

    /// Register a disposable released (LIFO) on destruction.
    pub fn manage(&self, disposable: impl Into<Disposable>) {
        let disposable = disposable.into();
        let mut inner = self.inner.lock();
        if inner.alive {
            inner.disposables.push(disposable);
        } else {
            drop(inner);
            disposable.dispose();
        }
    }

    /// Commit the pending partition. Returns the committed snapshot.
    pub fn try_commit(&self, caller: Option<&str>) -> Result<ChangeSet, CommitError> {
        let (changes, apply) = {
            let inner = self.inner.lock();
            if !inner.alive {
                return Err(CommitError::Destroyed);
            }
            if !inner.active {
                return Err(CommitError::Inactive);
            }
            if inner.pending.is_empty() {
                return Err(CommitError::NothingStaged);
            }
            if let Some(lock) = &inner.lock {
                if caller != Some(lock.owner_id.as_str()) {
                    return Err(CommitError::LockHeld { owner: lock.owner_id.clone() });
                }
            }
            let apply = self.class.apply.clone().ok_or(CommitError::Immutable)?;
            (inner.pending.clone(), apply)
        };

        // Apply outside the lock; the behavior may read back through us.
        // On failure the pending partition is left intact.
        apply.apply_changes(self, &changes)?;

        {
            let mut inner = self.inner.lock();
            // The bound object may have been removed while applying.
            if !inner.alive {
                return Err(CommitError::Destroyed);
            }
            for (field, value) in &changes {
                inner.data.insert(field.clone(), value.clone());
            }
            for field in changes.keys() {
                inner.pending.shift_remove(field);
            }
        }

        self.state_updated.fire(changes.clone());
        Ok(changes)
    }

    /// Boundary form of [`Entity::try_commit`]: logs the reason and
    /// returns a success flag.
    pub fn commit(&self, caller: Option<&str>) -> bool {
        match self.try_commit(caller) {
            Ok(changes) => {
                tracing::debug!(entity = %self.id, fields = changes.len(), "committed");
                true
            }
            Err(err) => {
                tracing::warn!(entity = %self.id, error = %err, "commit rejected");
                self.logger.warn(
                    Some(&format!("entity:{}", self.id)),
                    format!("commit rejected: {err}"),
                );
                false
            }
        }
    }

    /// Snapshot of persist-flagged committed fields.
    pub fn serialize(&self) -> ChangeSet {
        let inner = self.inner.lock();
        inner
            .data
            .iter()
            .filter(|(field, _)| inner.schema.get(field).is_some_and(|def| def.persist))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }

    /// Merge loaded values into the data partition without invoking the
    /// apply behavior. Only persist-flagged schema fields are accepted.
    pub fn deserialize(&self, data: ChangeSet) {
        let mut inner = self.inner.lock();
        if !inner.alive {
            return;
        }
        for (field, value) in data {
            if inner.schema.get(&field).is_some_and(|def| def.persist) {
                inner.data.insert(field, value);
            } else {
                tracing::warn!(entity = %self.id, field, "non-persist field in payload, skipped");
            }
        }
    }

    /// Replication-style write: merge a packet into the data partition and
    /// run the apply behavior over it. `validate` drops fields failing
    /// schema validation instead of trusting the packet.
    pub fn apply_packet(&self, packet: ChangeSet, validate: bool) {
        let accepted: ChangeSet = {
            let mut inner = self.inner.lock();
            if !inner.alive {
                return;
            }
            let accepted: ChangeSet = packet
                .into_iter()
                .filter(|(field, value)| {
                    if !validate {
                        return true;
                    }
                    match inner.schema.validate(field, value) {
                        Ok(()) => true,
                        Err(err) => {
                            tracing::warn!(entity = %self.id, field, error = %err, "replicated field dropped");
                            false
                        }
                    }
                })
                .collect();
            for (field, value) in &accepted {
                inner.data.insert(field.clone(), value.clone());
            }
            accepted
        };
        if accepted.is_empty() {
            return;
        }
        if let Some(apply) = &self.class.apply {
            if let Err(err) = apply.apply_changes(self, &accepted) {
                tracing::warn!(entity = %self.id, error = %err, "apply over replicated packet failed");
            }
        }
    }

    /// Committed-data snapshot (all fields).
    pub fn data_snapshot(&self) -> ChangeSet {
        self.inner.lock().data.clone()
    }

    /// Staged-but-uncommitted snapshot.
    pub fn pending_snapshot(&self) -> ChangeSet {
        self.inner.lock().pending.clone()
    }

    /// Take the commit lock. Re-acquiring under the same owner succeeds.
    pub fn acquire_lock(&self, caller: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.alive {
            return false;
        }
        match &inner.lock {
            Some(lock) if lock.owner_id != caller => false,
            Some(_) => true,
            None => {
                inner.lock =
                    Some(EntityLock { owner_id: caller.to_string(), acquired_at_ms: epoch_ms() });
                true
            }
        }
    }

    /// Release the commit lock. Only the owner may release.
    pub fn release_lock(&self, caller: &str) -> bool {
        let mut inner = self.inner.lock();
        match &inner.lock {
            Some(lock) if lock.owner_id == caller => {
                inner.lock = None;
                true
            }
            _ => false,
        }
    }

    pub fn lock_info(&self) -> Option<EntityLock> {
        self.inner.lock().lock.clone()
    }

    /// Pooling support: clear staged state, handlers, and managed
    /// resources, and stop accepting reads/writes until reactivated.
    pub fn deactivate(&self) {
        let disposables = {
            let mut inner = self.inner.lock();
            if !inner.alive {
                return;
            }
            inner.active = false;
            inner.pending.clear();
            inner.context.clear();
            inner.lock = None;
            std::mem::take(&mut inner.disposables)
        };
        for mut disposable in disposables.into_iter().rev() {
            disposable.run_once();
        }
        self.state_updated.clear();
        self.destroyed.clear();
    }

    /// Pooling support: rebind to a new host object and reactivate.
    pub fn activate(
        self: &Arc<Self>,
        instance: InstanceRef,
        context: impl IntoIterator<Item = (String, Value)>,
    ) {
        {
            let mut inner = self.inner.lock();
            if !inner.alive {
                return;
            }
            inner.instance = Arc::clone(&instance);
            inner.active = true;
            for (key, value) in context {
                inner.context.insert(key, value);
            }
        }
        self.observe_instance(&instance);
    }

    /// Destroy the entity: fire `Destroyed`, release managed resources
    /// LIFO, and mark every further read absent and write rejected.
    pub fn destroy(&self) {
        let disposables = {
            let mut inner = self.inner.lock();
            if !inner.alive {
                return;
            }
            inner.alive = false;
            inner.lock = None;
            inner.pending.clear();
            std::mem::take(&mut inner.disposables)
        };
        self.destroyed.fire(());
        for mut disposable in disposables.into_iter().rev() {
            disposable.run_once();
        }
        tracing::debug!(entity = %self.id, "destroyed");
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("class", &self.class.name)
            .field("alive", &inner.alive)
            .field("active", &inner.active)
            .field("data", &inner.data.len())
            .field("pending", &inner.pending.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "entity_tests.rs"]
mod tests;
