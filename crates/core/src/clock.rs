// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Time sources.
//!
//! Everything time-dependent in the runtime (scheduler heaps, machine
//! tick deltas, deferred transitions) reads through one shared
//! [`Clock`] handle, so tests drive the whole stack by advancing a
//! [`FakeClock`] instead of sleeping. The trait is object safe on
//! purpose: components hold an `Arc<dyn Clock>` rather than growing a
//! clock type parameter.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A source of monotonic and wall-clock time.
pub trait Clock: Send + Sync {
    /// Monotonic reading, comparable only against this clock.
    fn now(&self) -> Instant;

    /// Wall-clock unix milliseconds.
    fn epoch_ms(&self) -> u64;

    /// Seconds elapsed since `origin`, saturating at zero. The scheduler
    /// keys its heaps on this.
    fn monotonic_secs(&self, origin: Instant) -> f64 {
        self.now().saturating_duration_since(origin).as_secs_f64()
    }
}

/// Shared clock handle passed between the scheduler, machines, and the
/// orchestrator.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock unix milliseconds without a clock handle, for timestamps
/// that never feed back into scheduling decisions (log entries, lock
/// acquisition times).
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// The process clock.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        epoch_ms()
    }
}

/// Test clock that only moves when told to.
///
/// Clones share one time cell, so a clone kept by the test advances the
/// clock every component reads from.
#[derive(Clone)]
pub struct FakeClock {
    cell: Arc<Mutex<FakeNow>>,
}

struct FakeNow {
    instant: Instant,
    epoch_ms: u64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Mutex::new(FakeNow { instant: Instant::now(), epoch_ms: 1_000_000 })),
        }
    }

    /// Move both readings forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.cell.lock();
        now.instant += duration;
        now.epoch_ms += duration.as_millis() as u64;
    }

    /// Move forward by fractional seconds, as frame-timing tests count.
    pub fn advance_secs(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs.max(0.0)));
    }

    /// Pin the wall-clock reading.
    pub fn set_epoch_ms(&self, ms: u64) {
        self.cell.lock().epoch_ms = ms;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.cell.lock().instant
    }

    fn epoch_ms(&self) -> u64 {
        self.cell.lock().epoch_ms
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
