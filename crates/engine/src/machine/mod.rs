// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hierarchical state machine engine.
//!
//! A [`StateMachine`] owns a registry of named states (functions or
//! [`StateHandler`] objects), validates transitions against its class's
//! `valid_states` and the current state's `valid_outcomes`, and runs as a
//! recurring scheduler task ticking every `priority` host frames.
//!
//! Transitions never run callbacks while an internal lock is held, so
//! state bodies may freely transition again, schedule work, or tear the
//! machine down.

mod state;
mod submachine;

pub use state::{AutoTransition, Cleanup, StateDef, StateError, StateFn, StateHandler};
pub use submachine::SubMachineConfig;

use crate::scheduler::{FramePhase, ScheduleError, ScheduleParams, SharedScheduler};
use aviary_core::{Disposable, MachineId, Signal, Value};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use state::RegisteredState;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

/// Named tick cadences, expressed as "run every N host frames".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Render,
    High,
    Medium,
    Low,
    Background,
}

impl Priority {
    /// Frames between ticks.
    pub fn frames(self) -> u32 {
        match self {
            Priority::Render => 1,
            Priority::High => 2,
            Priority::Medium => 5,
            Priority::Low => 10,
            Priority::Background => 30,
        }
    }
}

impl From<Priority> for u32 {
    fn from(p: Priority) -> Self {
        p.frames()
    }
}

/// Shared scratch map, handed unchanged to sub-machines.
pub type Context = Arc<Mutex<HashMap<String, Value>>>;

/// How a machine concluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

aviary_core::simple_display! {
    MachineOutcome {
        Completed => "completed",
        Failed(..) => "failed",
        Cancelled => "cancelled",
    }
}

/// Payload of the `StateChanged` signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub new: String,
    pub old: Option<String>,
}

/// Rejected machine operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    #[error("state '{state}' is not in the class's valid states")]
    InvalidState { state: String },

    #[error("transition {from} -> {to} is not a valid outcome")]
    IllegalOutcome { from: String, to: String },

    #[error("terminal state '{state}' was never registered")]
    UnregisteredTerminal { state: String },

    #[error("machine is not running")]
    NotRunning,

    #[error("machine already started")]
    AlreadyStarted,

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Compiled machine class descriptor.
#[derive(Clone)]
pub struct MachineClass {
    pub class_name: String,
    /// When non-empty, every registered or targeted state must belong.
    pub valid_states: Option<HashSet<String>>,
    /// Entering one of these stops the machine: "Failed" routes to
    /// `fail`, "Cancelled" to `cancel`, anything else to `finish`.
    pub terminal_states: HashSet<String>,
    /// Tick every N host frames.
    pub priority: u32,
    /// Reject terminal targets that were never registered. Off by
    /// default: an unregistered terminal name still terminates.
    pub strict_terminals: bool,
    /// Hook that registers states on each new instance.
    pub on_register: Option<Arc<dyn Fn(&Arc<StateMachine>) + Send + Sync>>,
}

impl MachineClass {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            valid_states: None,
            terminal_states: HashSet::new(),
            priority: 1,
            strict_terminals: false,
            on_register: None,
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
        self.priority = priority.max(1);
        self
    }

    pub fn strict_terminals(mut self) -> Self {
        self.strict_terminals = true;
        self
    }

    pub fn register(mut self, hook: impl Fn(&Arc<StateMachine>) + Send + Sync + 'static) -> Self {
        self.on_register = Some(Arc::new(hook));
        self
    }
}

impl std::fmt::Debug for MachineClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineClass")
            .field("class_name", &self.class_name)
            .field("priority", &self.priority)
            .field("terminal_states", &self.terminal_states)
            .finish()
    }
}

/// Parameters for [`StateMachine::new`].
pub struct MachineParams {
    pub id: MachineId,
    pub class: Arc<MachineClass>,
    pub scheduler: SharedScheduler,
    /// Shared with sub-machines; a fresh map when absent.
    pub context: Option<Context>,
    /// Overrides the class priority.
    pub priority: Option<u32>,
}

/// Parameters for [`StateMachine::start`].
#[derive(Clone)]
pub struct StartParams {
    pub state: String,
    pub args: Vec<Value>,
}

impl StartParams {
    pub fn new(state: impl Into<String>) -> Self {
        Self { state: state.into(), args: Vec::new() }
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}

/// Parameters for [`StateMachine::change_state`].
#[derive(Clone)]
pub struct TransitionParams {
    pub name: String,
    pub args: Vec<Value>,
}

impl TransitionParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), args: Vec::new() }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}

struct MachineInner {
    state: Option<String>,
    previous_state: Option<String>,
    wait_span: f64,
    deferred_token: u64,
    states: HashMap<String, RegisteredState>,
    running: bool,
    outcome: Option<MachineOutcome>,
    disposables: Vec<Disposable>,
    tick_task: Option<aviary_core::TaskName>,
    last_tick: Option<f64>,
    priority: u32,
    destroyed: bool,
}

/// A hierarchical state machine instance.
pub struct StateMachine {
    id: MachineId,
    class: Arc<MachineClass>,
    scheduler: SharedScheduler,
    context: Context,
    completed: Signal<()>,
    failed: Signal<String>,
    cancelled: Signal<()>,
    state_changed: Signal<StateChange>,
    inner: Mutex<MachineInner>,
}

impl StateMachine {
    pub fn new(params: MachineParams) -> Arc<Self> {
        let MachineParams { id, class, scheduler, context, priority } = params;
        let priority = priority.unwrap_or(class.priority).max(1);
        let machine = Arc::new(Self {
            id,
            class: Arc::clone(&class),
            scheduler,
            context: context.unwrap_or_default(),
            completed: Signal::new(),
            failed: Signal::new(),
            cancelled: Signal::new(),
            state_changed: Signal::new(),
            inner: Mutex::new(MachineInner {
                state: None,
                previous_state: None,
                wait_span: 0.0,
                deferred_token: 0,
                states: HashMap::new(),
                running: false,
                outcome: None,
                disposables: Vec::new(),
                tick_task: None,
                last_tick: None,
                priority,
                destroyed: false,
            }),
        });
        if let Some(hook) = &class.on_register {
            hook(&machine);
        }
        machine
    }

    pub fn id(&self) -> &MachineId {
        &self.id
    }

    pub fn class(&self) -> &Arc<MachineClass> {
        &self.class
    }

    pub fn class_name(&self) -> &str {
        &self.class.class_name
    }

    pub fn scheduler(&self) -> &SharedScheduler {
        &self.scheduler
    }

    pub fn completed(&self) -> &Signal<()> {
        &self.completed
    }

    pub fn failed(&self) -> &Signal<String> {
        &self.failed
    }

    pub fn cancelled(&self) -> &Signal<()> {
        &self.cancelled
    }

    pub fn state_changed(&self) -> &Signal<StateChange> {
        &self.state_changed
    }

    pub fn state(&self) -> Option<String> {
        self.inner.lock().state.clone()
    }

    pub fn previous_state(&self) -> Option<String> {
        self.inner.lock().previous_state.clone()
    }

    pub fn outcome(&self) -> Option<MachineOutcome> {
        self.inner.lock().outcome.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn priority(&self) -> u32 {
        self.inner.lock().priority
    }

    /// The shared scratch map (also handed to sub-machines).
    pub fn context(&self) -> Context {
        Arc::clone(&self.context)
    }

    pub fn context_get(&self, key: &str) -> Option<Value> {
        self.context.lock().get(key).cloned()
    }

    pub fn set_context(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.context.lock().insert(key.into(), value.into());
    }

    pub fn remove_context(&self, key: &str) -> Option<Value> {
        self.context.lock().remove(key)
    }

    /// Defer the next transition by `span` seconds. Consumed atomically:
    /// the next `change_state` records a deferred transition and resets
    /// the span to zero.
    pub fn set_wait_span(&self, span: f64) {
        self.inner.lock().wait_span = span.max(0.0);
    }

    /// Register a state under `name`.
    pub fn add_state(
        &self,
        name: impl Into<String>,
        def: StateDef,
        valid_outcomes: Option<HashSet<String>>,
    ) -> Result<(), MachineError> {
        let name = name.into();
        if let Some(valid) = &self.class.valid_states {
            if !valid.contains(&name) {
                tracing::error!(machine = %self.id, state = %name, "state outside valid set");
                return Err(MachineError::InvalidState { state: name });
            }
        }
        self.inner.lock().states.insert(name, RegisteredState { def, valid_outcomes });
        Ok(())
    }

    /// Register a disposable released (LIFO) on destruction.
    pub fn manage(&self, disposable: impl Into<Disposable>) {
        let disposable = disposable.into();
        let mut inner = self.inner.lock();
        if inner.destroyed {
            drop(inner);
            disposable.dispose();
        } else {
            inner.disposables.push(disposable);
        }
    }

    /// Start at an initial state and begin ticking at the machine's
    /// priority cadence, staggered per instance.
    pub fn start(self: &Arc<Self>, params: StartParams) -> Result<(), MachineError> {
        {
            let mut inner = self.inner.lock();
            if inner.destroyed || inner.outcome.is_some() {
                return Err(MachineError::NotRunning);
            }
            if inner.running {
                return Err(MachineError::AlreadyStarted);
            }
            inner.running = true;
        }

        if let Err(err) = self.change_state(TransitionParams { name: params.state, args: params.args }) {
            self.inner.lock().running = false;
            return Err(err);
        }

        // The machine may have hit a terminal state during entry.
        if !self.is_running() {
            return Ok(());
        }

        let frame = self.scheduler.frame_interval();
        let period = f64::from(self.priority()) * frame + stagger_offset(&self.id, frame);
        let task_name = aviary_core::TaskName::new(format!("fsm:{}:tick", self.id));
        let weak = Arc::downgrade(self);
        self.scheduler.schedule(
            ScheduleParams::new(task_name.clone(), move || {
                if let Some(machine) = weak.upgrade() {
                    machine.tick();
                }
                Ok(())
            })
            .delay(period)
            .recurring(true)
            .phase(FramePhase::Update),
        )?;
        self.inner.lock().tick_task = Some(task_name);
        Ok(())
    }

    /// Request a transition.
    ///
    /// With a pending `wait_span`, the transition is deferred by that span
    /// and applied only if no other transition lands first; otherwise it
    /// applies immediately. Either way, any previously deferred transition
    /// is invalidated.
    pub fn change_state(self: &Arc<Self>, params: TransitionParams) -> Result<(), MachineError> {
        let deferred = {
            let mut inner = self.inner.lock();
            if inner.destroyed || !inner.running {
                return Err(MachineError::NotRunning);
            }
            inner.deferred_token += 1;
            if inner.wait_span > 0.0 {
                let span = inner.wait_span;
                inner.wait_span = 0.0;
                Some((inner.deferred_token, span))
            } else {
                None
            }
        };

        match deferred {
            Some((token, span)) => {
                self.schedule_deferred(token, span, params);
                Ok(())
            }
            None => self.transition_now(params),
        }
    }

    fn schedule_deferred(self: &Arc<Self>, token: u64, span: f64, params: TransitionParams) {
        let weak = Arc::downgrade(self);
        let task_name = aviary_core::TaskName::new(format!("fsm:{}:deferred", self.id));
        let result = self.scheduler.schedule(
            ScheduleParams::new(task_name, move || {
                let Some(machine) = weak.upgrade() else { return Ok(()) };
                machine.apply_deferred(token, params.clone());
                Ok(())
            })
            .delay(span)
            .phase(FramePhase::Update),
        );
        if let Err(err) = result {
            tracing::error!(machine = %self.id, error = %err, "deferred transition not scheduled");
        }
    }

    fn apply_deferred(self: &Arc<Self>, token: u64, params: TransitionParams) {
        {
            let inner = self.inner.lock();
            if inner.deferred_token != token {
                // A later transition superseded this one.
                return;
            }
        }
        if let Err(err) = self.transition_now(params) {
            tracing::warn!(machine = %self.id, error = %err, "deferred transition rejected");
        }
    }

    /// The transition pipeline: validate, leave, swap, signal, route
    /// terminals, enter. Callbacks always run with no lock held.
    fn transition_now(self: &Arc<Self>, params: TransitionParams) -> Result<(), MachineError> {
        let TransitionParams { name: target, args } = params;

        let (leave_handler, is_terminal) = {
            let mut inner = self.inner.lock();
            if inner.destroyed || !inner.running {
                return Err(MachineError::NotRunning);
            }
            inner.deferred_token += 1;

            if let Some(valid) = &self.class.valid_states {
                if !valid.contains(&target) {
                    tracing::error!(machine = %self.id, state = %target, "transition target outside valid set");
                    return Err(MachineError::InvalidState { state: target });
                }
            }
            if let Some(current) = &inner.state {
                if let Some(reg) = inner.states.get(current) {
                    if let Some(outcomes) = &reg.valid_outcomes {
                        if !outcomes.contains(&target) {
                            tracing::error!(
                                machine = %self.id,
                                from = %current,
                                to = %target,
                                "transition not in valid outcomes"
                            );
                            return Err(MachineError::IllegalOutcome {
                                from: current.clone(),
                                to: target,
                            });
                        }
                    }
                }
            }

            let is_terminal = self.class.terminal_states.contains(&target);
            if is_terminal && self.class.strict_terminals && !inner.states.contains_key(&target) {
                tracing::error!(machine = %self.id, state = %target, "unregistered terminal target");
                return Err(MachineError::UnregisteredTerminal { state: target });
            }

            let leave_handler = inner
                .state
                .as_ref()
                .and_then(|s| inner.states.get(s))
                .and_then(|reg| match &reg.def {
                    StateDef::Handler(h) => Some(Arc::clone(h)),
                    StateDef::Function(_) => None,
                });
            (leave_handler, is_terminal)
        };

        if let Some(handler) = leave_handler {
            if let Err(err) = handler.on_leave(self) {
                // Leave failures never block the transition.
                tracing::warn!(machine = %self.id, error = %err, "on_leave failed");
            }
        }

        let (enter_def, old_state) = {
            let mut inner = self.inner.lock();
            let old = inner.state.take();
            inner.previous_state = old.clone();
            inner.state = Some(target.clone());
            let def = inner.states.get(&target).map(|reg| reg.def.clone());
            (def, old)
        };

        self.state_changed.fire(StateChange { new: target.clone(), old: old_state });

        if is_terminal {
            match target.as_str() {
                "Failed" => {
                    let reason = args
                        .first()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_else(|| "failed".to_string());
                    self.fail(reason);
                }
                "Cancelled" => self.cancel(),
                _ => self.finish(),
            }
            return Ok(());
        }

        match enter_def {
            Some(StateDef::Handler(handler)) => {
                if let Err(err) = handler.on_enter(self, &args) {
                    tracing::warn!(machine = %self.id, state = %target, error = %err, "on_enter failed");
                    self.fail(err.to_string());
                }
            }
            Some(StateDef::Function(body)) => match body(self, &args) {
                // Legacy timing: a returned cleanup runs right away, not
                // when the state is left.
                Ok(Some(cleanup)) => cleanup(),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(machine = %self.id, state = %target, error = %err, "state body failed");
                    self.fail(err.to_string());
                }
            },
            None => {}
        }
        Ok(())
    }

    /// One tick: run the current object state's heartbeat, then evaluate
    /// its automatic transitions in order.
    pub fn tick(self: &Arc<Self>) {
        let (handler, dt, state_name) = {
            let mut inner = self.inner.lock();
            if inner.destroyed || !inner.running {
                return;
            }
            let now = self.scheduler.now();
            let dt = (now - inner.last_tick.unwrap_or(now)).max(0.0);
            inner.last_tick = Some(now);
            let Some(state_name) = inner.state.clone() else { return };
            let handler = inner.states.get(&state_name).and_then(|reg| match &reg.def {
                StateDef::Handler(h) => Some(Arc::clone(h)),
                StateDef::Function(_) => None,
            });
            (handler, dt, state_name)
        };

        let Some(handler) = handler else { return };

        if let Err(err) = handler.on_heartbeat(self, dt) {
            tracing::warn!(machine = %self.id, error = %err, "heartbeat failed");
            self.fail(err.to_string());
            return;
        }

        for transition in handler.transitions() {
            // A prior condition (or the heartbeat) may have moved us on.
            if self.state().as_deref() != Some(state_name.as_str()) {
                break;
            }
            if (transition.condition)(self, dt) {
                if let Err(err) = self.change_state(TransitionParams::new(transition.target.clone()))
                {
                    tracing::warn!(machine = %self.id, error = %err, "automatic transition rejected");
                }
                break;
            }
        }
    }

    /// Conclude with the given outcome. Returns false when already
    /// concluded.
    fn conclude(&self, outcome: MachineOutcome) -> bool {
        let tick_task = {
            let mut inner = self.inner.lock();
            if inner.outcome.is_some() {
                return false;
            }
            inner.outcome = Some(outcome);
            inner.running = false;
            inner.tick_task.take()
        };
        if let Some(task) = tick_task {
            self.scheduler.deschedule(&task);
        }
        self.scheduler.deschedule(&format!("fsm:{}:deferred", self.id));
        true
    }

    /// Conclude successfully and fire `Completed`.
    pub fn finish(&self) {
        if self.conclude(MachineOutcome::Completed) {
            tracing::debug!(machine = %self.id, "completed");
            self.completed.fire(());
        }
    }

    /// Conclude with a failure reason and fire `Failed`.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.conclude(MachineOutcome::Failed(reason.clone())) {
            tracing::debug!(machine = %self.id, reason, "failed");
            self.failed.fire(reason);
        }
    }

    /// Conclude cooperatively and fire `Cancelled`.
    pub fn cancel(&self) {
        if self.conclude(MachineOutcome::Cancelled) {
            tracing::debug!(machine = %self.id, "cancelled");
            self.cancelled.fire(());
        }
    }

    /// Tear down: cancel scheduled work, release managed resources LIFO,
    /// and drop all signal handlers. Idempotent.
    pub fn destroy(&self) {
        let (disposables, tick_task) = {
            let mut inner = self.inner.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.running = false;
            (std::mem::take(&mut inner.disposables), inner.tick_task.take())
        };
        if let Some(task) = tick_task {
            self.scheduler.deschedule(&task);
        }
        self.scheduler.deschedule(&format!("fsm:{}:deferred", self.id));
        for disposable in disposables.into_iter().rev() {
            disposable.dispose();
        }
        self.completed.clear();
        self.failed.clear();
        self.cancelled.clear();
        self.state_changed.clear();
        tracing::debug!(machine = %self.id, "destroyed");
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StateMachine")
            .field("id", &self.id)
            .field("class", &self.class.class_name)
            .field("state", &inner.state)
            .field("running", &inner.running)
            .field("outcome", &inner.outcome)
            .finish()
    }
}

/// Deterministic per-instance offset spreading machines with equal
/// priorities across frames.
fn stagger_offset(id: &MachineId, frame_interval: f64) -> f64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.as_str().hash(&mut hasher);
    (hasher.finish() % 1000) as f64 / 1000.0 * frame_interval
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
