// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame-budgeted task scheduler.
//!
//! One min-heap per frame phase, ordered by
//! `(next_run, -effective_priority, sequence)`. Each [`Scheduler::step`]
//! drains due tasks until the frame budget is spent; tasks left due at
//! the cut gain one aging increment so their effective priority rises on
//! the next frame. Cancellation is lazy: descheduled or replaced tasks
//! leave stale heap entries that are discarded when popped.
//!
//! Dispatch is cooperative. Each action is a future polled on the
//! stepping thread until its first yield; that synchronous prefix is
//! what the budget meters. A still-pending action is handed to the
//! async runtime and its remaining wall-clock cost never counts against
//! a step. No scheduler lock is held while an action runs, so an action
//! may freely schedule, deschedule, or replace tasks, including itself.

use aviary_core::{Clock as _, RingLogger, SharedClock, TaskName};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Frame budget applied when settings carry one but the caller never set
/// it: 5 ms of dispatch per step.
pub const DEFAULT_FRAME_BUDGET: f64 = 0.005;

/// Tighter step-time fallback applied when the budget was explicitly
/// cleared from settings: 2 ms. Both constants are part of the configured
/// contract; treat a cleared budget as a configuration mistake, not a
/// silent default.
pub const FALLBACK_FRAME_BUDGET: f64 = 0.002;

/// Default bound on retained dispatch records.
pub const DEFAULT_HISTORY_MAX: usize = 256;

/// Host frame phase a task is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramePhase {
    Fixed,
    Update,
    PostUpdate,
    Custom(String),
}

impl Default for FramePhase {
    fn default() -> Self {
        FramePhase::Update
    }
}

aviary_core::simple_display! {
    FramePhase {
        Fixed => "fixed",
        Update => "update",
        PostUpdate => "post_update",
        Custom(..) => "custom",
    }
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Per-step dispatch budget in seconds. `None` falls back to
    /// [`FALLBACK_FRAME_BUDGET`] at step time.
    pub frame_budget: Option<f64>,
    /// Effective-priority bonus per consecutive deferral.
    pub aging_factor: f64,
    /// Bound on retained dispatch records.
    pub history_max: usize,
    /// Host frame duration in seconds; machine priorities are multiples
    /// of this, and [`Scheduler::start`] ticks at this rate.
    pub frame_interval: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            frame_budget: Some(DEFAULT_FRAME_BUDGET),
            aging_factor: 1.0,
            history_max: DEFAULT_HISTORY_MAX,
            frame_interval: 1.0 / 60.0,
        }
    }
}

/// Failure raised by a task action, captured into dispatch history.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TaskError(pub String);

impl From<String> for TaskError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Rejected scheduling request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("task name is empty")]
    EmptyName,

    #[error("delay is not a finite number")]
    InvalidDelay,

    #[error("priority must be a positive finite number")]
    InvalidPriority,
}

/// In-flight body of one dispatched action.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;

/// A cooperative task body.
///
/// Each dispatch calls the closure for a fresh future and polls it
/// inline until its first yield; only that synchronous prefix counts
/// against the frame budget. A pending remainder is spawned onto the
/// async runtime, where a late failure is logged but no longer recorded
/// in dispatch history.
pub type TaskAction = Arc<dyn Fn() -> ActionFuture + Send + Sync>;

/// Wrap a synchronous closure as a [`TaskAction`] that completes on its
/// first poll.
pub fn sync_action(
    action: impl Fn() -> Result<(), TaskError> + Send + Sync + 'static,
) -> TaskAction {
    Arc::new(move || {
        let body: ActionFuture = Box::pin(std::future::ready(action()));
        body
    })
}

/// Scheduling request for [`Scheduler::schedule`].
pub struct ScheduleParams {
    name: TaskName,
    action: TaskAction,
    delay: f64,
    recurring: bool,
    priority: f64,
    phase: FramePhase,
}

impl ScheduleParams {
    /// Schedule a synchronous body; it runs to completion inside the
    /// dispatch loop.
    pub fn new(
        name: impl Into<TaskName>,
        action: impl Fn() -> Result<(), TaskError> + Send + Sync + 'static,
    ) -> Self {
        Self::with_action(name, sync_action(action))
    }

    /// Schedule a yielding body; work after its first yield runs on the
    /// async runtime, outside the budget.
    pub fn new_async(
        name: impl Into<TaskName>,
        action: impl Fn() -> ActionFuture + Send + Sync + 'static,
    ) -> Self {
        Self::with_action(name, Arc::new(action))
    }

    pub fn with_action(name: impl Into<TaskName>, action: TaskAction) -> Self {
        Self {
            name: name.into(),
            action,
            delay: 0.0,
            recurring: false,
            priority: 1.0,
            phase: FramePhase::default(),
        }
    }

    /// Seconds until the first (or every, when recurring) run.
    pub fn delay(mut self, delay: f64) -> Self {
        self.delay = delay;
        self
    }

    pub fn recurring(mut self, recurring: bool) -> Self {
        self.recurring = recurring;
        self
    }

    pub fn priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn phase(mut self, phase: FramePhase) -> Self {
        self.phase = phase;
        self
    }
}

/// Per-task execution counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub runs: u64,
    pub failures: u64,
    pub last_elapsed: f64,
    pub total_elapsed: f64,
    pub last_run: Option<f64>,
}

/// Cloneable view of a scheduled task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub name: TaskName,
    pub phase: FramePhase,
    pub next_run: f64,
    pub delay: f64,
    pub recurring: bool,
    pub base_priority: f64,
    pub effective_priority: f64,
    pub consecutive_delays: u32,
    pub stats: TaskStats,
}

/// Outcome of one dispatched action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed,
    /// The action yielded; its remainder is running on the async runtime.
    Suspended,
    Failed { reason: String },
}

/// One retained dispatch record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub task: TaskName,
    pub phase: FramePhase,
    pub scheduled_for: f64,
    pub started: f64,
    pub elapsed: f64,
    pub outcome: DispatchOutcome,
}

/// Result of one [`Scheduler::step`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepReport {
    pub dispatched: usize,
    pub deferred: usize,
    pub budget: f64,
}

/// Sanitized serializable view of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub settings: SchedulerSettings,
    pub now: f64,
    pub tasks: Vec<TaskInfo>,
    pub history: Vec<DispatchRecord>,
    pub dispatched_total: u64,
    pub deferred_total: u64,
}

struct Task {
    name: TaskName,
    action: TaskAction,
    next_run: f64,
    delay: f64,
    recurring: bool,
    base_priority: f64,
    consecutive_delays: u32,
    phase: FramePhase,
    generation: u64,
    stats: TaskStats,
}

impl Task {
    fn effective_priority(&self, aging_factor: f64) -> f64 {
        self.base_priority + f64::from(self.consecutive_delays) * aging_factor
    }

    fn info(&self, aging_factor: f64) -> TaskInfo {
        TaskInfo {
            name: self.name.clone(),
            phase: self.phase.clone(),
            next_run: self.next_run,
            delay: self.delay,
            recurring: self.recurring,
            base_priority: self.base_priority,
            effective_priority: self.effective_priority(aging_factor),
            consecutive_delays: self.consecutive_delays,
            stats: self.stats.clone(),
        }
    }
}

/// Heap key frozen at push time. Stale entries (generation mismatch) are
/// discarded on pop.
struct HeapEntry {
    next_run: f64,
    effective_priority: f64,
    sequence: u64,
    generation: u64,
    name: TaskName,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap pops its maximum; invert so the earliest run wins,
        // then higher effective priority, then insertion order.
        other
            .next_run
            .total_cmp(&self.next_run)
            .then_with(|| self.effective_priority.total_cmp(&other.effective_priority))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct SchedState {
    settings: SchedulerSettings,
    tasks: HashMap<TaskName, Task>,
    heaps: HashMap<FramePhase, BinaryHeap<HeapEntry>>,
    sequence: u64,
    generation: u64,
    history: VecDeque<DispatchRecord>,
    dispatched_total: u64,
    deferred_total: u64,
}

/// Shared scheduler handle.
pub type SharedScheduler = Arc<Scheduler>;

/// Priority-queue task runner with per-frame time budget and aging.
pub struct Scheduler {
    clock: SharedClock,
    origin: Instant,
    logger: RingLogger,
    state: Mutex<SchedState>,
}

impl Scheduler {
    pub fn new(clock: SharedClock, settings: SchedulerSettings) -> Arc<Self> {
        Self::with_logger(clock, settings, RingLogger::default())
    }

    /// Like [`Scheduler::new`] with a shared ring logger.
    pub fn with_logger(
        clock: SharedClock,
        settings: SchedulerSettings,
        logger: RingLogger,
    ) -> Arc<Self> {
        let origin = clock.now();
        Arc::new(Self {
            clock,
            origin,
            logger,
            state: Mutex::new(SchedState {
                settings,
                tasks: HashMap::new(),
                heaps: HashMap::new(),
                sequence: 0,
                generation: 0,
                history: VecDeque::new(),
                dispatched_total: 0,
                deferred_total: 0,
            }),
        })
    }

    /// Monotonic seconds since scheduler creation, from the shared clock.
    pub fn now(&self) -> f64 {
        self.clock.monotonic_secs(self.origin)
    }

    /// Replace the settings wholesale.
    pub fn initialize(&self, settings: SchedulerSettings) {
        self.state.lock().settings = settings;
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.state.lock().settings.clone()
    }

    pub fn frame_interval(&self) -> f64 {
        self.state.lock().settings.frame_interval
    }

    /// Schedule a task. An existing task under the same name is replaced;
    /// its stale heap entry is discarded when popped.
    pub fn schedule(&self, params: ScheduleParams) -> Result<TaskName, ScheduleError> {
        if params.name.is_empty() {
            return Err(ScheduleError::EmptyName);
        }
        if !params.delay.is_finite() {
            return Err(ScheduleError::InvalidDelay);
        }
        if !params.priority.is_finite() || params.priority <= 0.0 {
            return Err(ScheduleError::InvalidPriority);
        }

        let now = self.now();
        let delay = params.delay.max(0.0);
        let mut state = self.state.lock();
        state.generation += 1;
        state.sequence += 1;
        let generation = state.generation;
        let sequence = state.sequence;

        let task = Task {
            name: params.name.clone(),
            action: params.action,
            next_run: now + delay,
            delay,
            recurring: params.recurring,
            base_priority: params.priority,
            consecutive_delays: 0,
            phase: params.phase.clone(),
            generation,
            stats: TaskStats::default(),
        };

        if state.tasks.insert(params.name.clone(), task).is_some() {
            tracing::debug!(task = %params.name, "replaced existing task");
        }
        let entry = HeapEntry {
            next_run: now + delay,
            effective_priority: params.priority,
            sequence,
            generation,
            name: params.name.clone(),
        };
        state.heaps.entry(params.phase).or_default().push(entry);
        Ok(params.name)
    }

    /// Remove a task. Its heap entry is discarded lazily.
    pub fn deschedule(&self, name: &str) -> bool {
        self.state.lock().tasks.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<TaskInfo> {
        let state = self.state.lock();
        let aging = state.settings.aging_factor;
        state.tasks.get(name).map(|t| t.info(aging))
    }

    pub fn count(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Zero a task's execution counters.
    pub fn reset(&self, name: &str) -> bool {
        match self.state.lock().tasks.get_mut(name) {
            Some(task) => {
                task.stats = TaskStats::default();
                true
            }
            None => false,
        }
    }

    /// Remove every task and stale heap entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.tasks.clear();
        state.heaps.clear();
    }

    /// Unique task name factory.
    pub fn generate_key(&self) -> TaskName {
        TaskName::generate()
    }

    /// Run a task immediately, ignoring budget and due time. The task is
    /// not dequeued: a scheduled task stays scheduled.
    pub fn execute(&self, name: &str) -> bool {
        let (action, generation) = {
            let state = self.state.lock();
            match state.tasks.get(name) {
                Some(task) => (Arc::clone(&task.action), task.generation),
                None => return false,
            }
        };
        let started = self.now();
        let outcome = self.run_action(name, &action);
        self.record_run(name, generation, started, started, outcome);
        true
    }

    /// Dispatch due tasks for one frame phase within the budget.
    ///
    /// Safe to call externally at any time; a phase with nothing due is a
    /// cheap no-op.
    pub fn step(&self, phase: &FramePhase) -> StepReport {
        let (budget, frame_start) = {
            let state = self.state.lock();
            let budget = state.settings.frame_budget.unwrap_or(FALLBACK_FRAME_BUDGET);
            (budget, self.clock.now())
        };

        let mut dispatched = 0_usize;
        loop {
            let spent = self.clock.now().saturating_duration_since(frame_start).as_secs_f64();
            if spent > budget {
                break;
            }

            let popped = {
                let mut state = self.state.lock();
                let now = self.now();
                pop_due(&mut state, phase, now)
            };
            let Some((name, generation, scheduled_for)) = popped else {
                // Nothing due: report zero deferrals.
                return StepReport { dispatched, deferred: 0, budget };
            };

            let action = {
                let mut state = self.state.lock();
                let Some(task) = state.tasks.get_mut(&name) else { continue };
                if task.generation != generation {
                    continue;
                }
                task.consecutive_delays = 0;
                Arc::clone(&task.action)
            };

            let started = self.now();
            let outcome = self.run_action(&name, &action);
            dispatched += 1;
            self.record_run(&name, generation, scheduled_for, started, outcome);
            self.requeue_if_recurring(&name, generation);
        }

        // Budget exhausted: everything still due ages one increment.
        let deferred = self.age_remaining(phase);
        StepReport { dispatched, deferred, budget }
    }

    /// Run the synchronous prefix of an action, detaching any remainder.
    fn run_action(&self, name: &str, action: &TaskAction) -> DispatchOutcome {
        let mut future = action();
        let mut cx = Context::from_waker(Waker::noop());
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(())) => DispatchOutcome::Completed,
            Poll::Ready(Err(err)) => {
                tracing::warn!(task = name, error = %err, "task action failed");
                self.logger
                    .warn(Some(&format!("task:{name}")), format!("action failed: {err}"));
                DispatchOutcome::Failed { reason: err.to_string() }
            }
            Poll::Pending => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let logger = self.logger.clone();
                    let task = name.to_string();
                    handle.spawn(async move {
                        if let Err(err) = future.await {
                            tracing::warn!(task = %task, error = %err, "detached action failed");
                            logger.warn(
                                Some(&format!("task:{task}")),
                                format!("detached action failed: {err}"),
                            );
                        }
                    });
                    DispatchOutcome::Suspended
                }
                Err(_) => {
                    tracing::warn!(task = name, "action yielded with no async runtime");
                    DispatchOutcome::Failed { reason: "yielded with no async runtime".into() }
                }
            },
        }
    }

    fn record_run(
        &self,
        name: &str,
        generation: u64,
        scheduled_for: f64,
        started: f64,
        outcome: DispatchOutcome,
    ) {
        let finished = self.now();
        let elapsed = (finished - started).max(0.0);
        let mut state = self.state.lock();
        state.dispatched_total += 1;

        if let Some(task) = state.tasks.get_mut(name) {
            if task.generation == generation {
                task.stats.runs += 1;
                if matches!(outcome, DispatchOutcome::Failed { .. }) {
                    task.stats.failures += 1;
                }
                task.stats.last_elapsed = elapsed;
                task.stats.total_elapsed += elapsed;
                task.stats.last_run = Some(started);
            }
        }

        let record = DispatchRecord {
            task: TaskName::new(name),
            phase: state
                .tasks
                .get(name)
                .map(|t| t.phase.clone())
                .unwrap_or_default(),
            scheduled_for,
            started,
            elapsed,
            outcome,
        };
        let max = state.settings.history_max.max(1);
        if state.history.len() == max {
            state.history.pop_front();
        }
        state.history.push_back(record);
    }

    /// Re-enqueue a recurring task after its dispatch returned, unless the
    /// action descheduled or replaced it.
    fn requeue_if_recurring(&self, name: &str, generation: u64) {
        let now = self.now();
        let mut state = self.state.lock();
        state.sequence += 1;
        let sequence = state.sequence;
        let aging = state.settings.aging_factor;
        let Some(task) = state.tasks.get_mut(name) else { return };
        if task.generation != generation || !task.recurring {
            return;
        }
        task.next_run = now + task.delay;
        let entry = HeapEntry {
            next_run: task.next_run,
            effective_priority: task.effective_priority(aging),
            sequence,
            generation,
            name: task.name.clone(),
        };
        let phase = task.phase.clone();
        state.heaps.entry(phase).or_default().push(entry);
    }

    /// Pop every still-due entry, bump its task's deferral counter, and
    /// re-push with the aged priority.
    fn age_remaining(&self, phase: &FramePhase) -> usize {
        let now = self.now();
        let mut state = self.state.lock();
        let aging = state.settings.aging_factor;

        let mut aged = Vec::new();
        {
            let Some(heap) = state.heaps.get_mut(phase) else { return 0 };
            while let Some(top) = heap.peek() {
                if top.next_run > now {
                    break;
                }
                if let Some(entry) = heap.pop() {
                    aged.push(entry);
                }
            }
        }

        let mut deferred = 0_usize;
        for entry in aged {
            let sequence = entry.sequence;
            let Some(task) = state.tasks.get_mut(&entry.name) else { continue };
            if task.generation != entry.generation {
                continue;
            }
            task.consecutive_delays += 1;
            let refreshed = HeapEntry {
                next_run: entry.next_run,
                effective_priority: task.effective_priority(aging),
                sequence,
                generation: entry.generation,
                name: entry.name,
            };
            state.heaps.entry(phase.clone()).or_default().push(refreshed);
            deferred += 1;
        }
        state.deferred_total += deferred as u64;
        if deferred > 0 {
            tracing::debug!(phase = %phase, deferred, "budget exhausted, tasks aged");
        }
        deferred
    }

    /// Sanitized serializable view of heaps, settings, history, and stats.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.state.lock();
        let aging = state.settings.aging_factor;
        let mut tasks: Vec<TaskInfo> = state.tasks.values().map(|t| t.info(aging)).collect();
        tasks.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        SchedulerSnapshot {
            settings: state.settings.clone(),
            now: self.now(),
            tasks,
            history: state.history.iter().cloned().collect(),
            dispatched_total: state.dispatched_total,
            deferred_total: state.deferred_total,
        }
    }

    /// Retained dispatch records, oldest first.
    pub fn history(&self) -> Vec<DispatchRecord> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn logger(&self) -> &RingLogger {
        &self.logger
    }

    /// Drive the standard phases from a background ticker at the
    /// configured frame interval. The returned token stops the loop.
    pub fn start(self: &Arc<Self>) -> CancellationToken {
        let token = CancellationToken::new();
        let stop = token.clone();
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let interval = scheduler.frame_interval().max(0.001);
            let mut ticker = tokio::time::interval(Duration::from_secs_f64(interval));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        scheduler.step(&FramePhase::Fixed);
                        scheduler.step(&FramePhase::Update);
                        scheduler.step(&FramePhase::PostUpdate);
                    }
                }
            }
        });
        token
    }
}

/// Pop the next valid due entry, discarding stale ones.
fn pop_due(
    state: &mut SchedState,
    phase: &FramePhase,
    now: f64,
) -> Option<(TaskName, u64, f64)> {
    let heap = state.heaps.get_mut(phase)?;
    loop {
        let top = heap.peek()?;
        if top.next_run > now {
            return None;
        }
        let entry = heap.pop()?;
        let valid = state
            .tasks
            .get(&entry.name)
            .is_some_and(|t| t.generation == entry.generation);
        if valid {
            return Some((entry.name, entry.generation, entry.next_run));
        }
        // Stale entry from a descheduled or replaced task; drop it.
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Scheduler")
            .field("tasks", &state.tasks.len())
            .field("dispatched_total", &state.dispatched_total)
            .field("deferred_total", &state.deferred_total)
            .finish()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
