// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{SimResult, SimulationError};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// How a role blocks while waiting for a line transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitMode {
    /// Re-check the lines every `poll_interval`, sleeping in between.
    #[default]
    Poll,
    /// Sleep on a condition variable signalled by every line update.
    Notify,
}

/// Minimum number of poll intervals per held line level. Below this a
/// polling role can miss a whole clock phase.
pub const SETTLE_POLL_RATIO: u32 = 4;

/// Clock and sampling parameters shared by both roles of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BusTiming {
    /// How long the controller holds each line state.
    pub settle: Duration,
    /// Sleep between two checks of a waiting role.
    pub poll_interval: Duration,
    /// Upper bound for any single wait. `None` waits forever.
    pub timeout: Option<Duration>,
    pub mode: WaitMode,
}

impl Default for BusTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
            timeout: Some(Duration::from_secs(5)),
            mode: WaitMode::Poll,
        }
    }
}

impl BusTiming {
    /// Short timings used by tests and quick runs.
    pub fn fast() -> Self {
        Self {
            settle: Duration::from_millis(2),
            poll_interval: Duration::from_micros(100),
            timeout: Some(Duration::from_secs(5)),
            mode: WaitMode::Poll,
        }
    }

    pub fn with_mode(mut self, mode: WaitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// A waiting role must observe every held level, so it has to look at
    /// the lines several times per settle interval.
    pub fn validate(&self) -> SimResult<()> {
        if self.poll_interval.is_zero() {
            return Err(SimulationError::Timing(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.poll_interval.saturating_mul(SETTLE_POLL_RATIO) > self.settle {
            return Err(SimulationError::Timing(format!(
                "settle time {:?} must be at least {} poll intervals ({:?})",
                self.settle, SETTLE_POLL_RATIO, self.poll_interval
            )));
        }
        if let Some(timeout) = self.timeout {
            if timeout <= self.settle {
                return Err(SimulationError::Timing(format!(
                    "timeout {:?} must exceed settle time {:?}",
                    timeout, self.settle
                )));
            }
        }
        Ok(())
    }
}

/// A set of bus lines shared by a controller and a peripheral.
///
/// Every mutation and every sample goes through the same mutex, and the lock
/// is never held across a sleep.
#[derive(Debug)]
pub struct SharedBus<L> {
    lines: Mutex<L>,
    changed: Condvar,
    timing: BusTiming,
}

impl<L: Copy + std::fmt::Debug> SharedBus<L> {
    pub fn new(lines: L, timing: BusTiming) -> SimResult<Self> {
        timing.validate()?;
        Ok(Self {
            lines: Mutex::new(lines),
            changed: Condvar::new(),
            timing,
        })
    }

    pub fn timing(&self) -> &BusTiming {
        &self.timing
    }

    fn lock(&self) -> MutexGuard<'_, L> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the lines atomically and wake any notify-mode waiter.
    pub fn update<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        let result = {
            let mut lines = self.lock();
            f(&mut lines)
        };
        self.changed.notify_all();
        result
    }

    pub fn sample<R>(&self, f: impl FnOnce(&L) -> R) -> R {
        let lines = self.lock();
        f(&lines)
    }

    pub fn snapshot(&self) -> L {
        *self.lock()
    }

    /// Hold the current line state for one settle interval.
    pub fn settle(&self) {
        thread::sleep(self.timing.settle);
    }

    /// Block until `ready` holds and return the line state that satisfied it.
    pub fn wait_until(
        &self,
        waiting_for: &'static str,
        mut ready: impl FnMut(&L) -> bool,
    ) -> SimResult<L> {
        let started = Instant::now();
        match self.timing.mode {
            WaitMode::Poll => loop {
                {
                    let lines = self.lock();
                    if ready(&lines) {
                        return Ok(*lines);
                    }
                }
                self.check_deadline(waiting_for, started)?;
                thread::sleep(self.timing.poll_interval);
            },
            WaitMode::Notify => {
                let mut lines = self.lock();
                loop {
                    if ready(&lines) {
                        return Ok(*lines);
                    }
                    self.check_deadline(waiting_for, started)?;
                    lines = match self.timing.timeout {
                        Some(timeout) => {
                            let remaining = timeout.saturating_sub(started.elapsed());
                            self.changed
                                .wait_timeout(lines, remaining)
                                .unwrap_or_else(PoisonError::into_inner)
                                .0
                        }
                        None => self
                            .changed
                            .wait(lines)
                            .unwrap_or_else(PoisonError::into_inner),
                    };
                }
            }
        }
    }

    fn check_deadline(&self, waiting_for: &'static str, started: Instant) -> SimResult<()> {
        let elapsed = started.elapsed();
        match self.timing.timeout {
            Some(timeout) if elapsed >= timeout => {
                tracing::warn!(waiting_for, ?elapsed, "bus wait timed out");
                Err(SimulationError::Timeout {
                    waiting_for,
                    elapsed,
                })
            }
            _ => Ok(()),
        }
    }
}
