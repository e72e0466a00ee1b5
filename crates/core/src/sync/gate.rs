// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Counting admission gate.
//!
//! A slot is taken with [`AdmissionGate::acquire`] and handed back when the
//! returned [`Permit`] is released or dropped. Because a permit is move-only,
//! every acquire pairs with exactly one release, and the permit can travel
//! with the work it admits so a downstream stage performs the release.

use crate::{SimResult, SimulationError};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct GateState {
    available: usize,
    peak_in_use: usize,
    acquired: u64,
    released: u64,
}

#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    state: Mutex<GateState>,
    slot_freed: Condvar,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> SimResult<Self> {
        if capacity == 0 {
            return Err(SimulationError::InvalidCapacity);
        }
        Ok(Self {
            capacity,
            state: Mutex::new(GateState {
                available: capacity,
                peak_in_use: 0,
                acquired: 0,
                released: 0,
            }),
            slot_freed: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, state: &mut GateState) -> Permit<'_> {
        state.available -= 1;
        state.acquired += 1;
        let in_use = self.capacity - state.available;
        state.peak_in_use = state.peak_in_use.max(in_use);
        tracing::trace!(in_use, capacity = self.capacity, "gate slot acquired");
        Permit { gate: self }
    }

    /// Block until a slot is free and take it.
    pub fn acquire(&self) -> Permit<'_> {
        let mut state = self
            .slot_freed
            .wait_while(self.lock(), |s| s.available == 0)
            .unwrap_or_else(PoisonError::into_inner);
        self.take(&mut state)
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> SimResult<Permit<'_>> {
        let started = Instant::now();
        let (mut state, _) = self
            .slot_freed
            .wait_timeout_while(self.lock(), timeout, |s| s.available == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if state.available == 0 {
            return Err(SimulationError::Timeout {
                waiting_for: "admission gate slot",
                elapsed: started.elapsed(),
            });
        }
        Ok(self.take(&mut state))
    }

    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut state = self.lock();
        if state.available == 0 {
            return None;
        }
        Some(self.take(&mut state))
    }

    fn release_slot(&self) {
        {
            let mut state = self.lock();
            assert!(
                state.available < self.capacity,
                "admission gate released more often than acquired"
            );
            state.available += 1;
            state.released += 1;
            tracing::trace!(available = state.available, "gate slot released");
        }
        self.slot_freed.notify_one();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.lock().available
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.lock().available
    }

    /// Highest number of slots held at once since creation.
    pub fn peak_in_use(&self) -> usize {
        self.lock().peak_in_use
    }

    pub fn acquired_total(&self) -> u64 {
        self.lock().acquired
    }

    pub fn released_total(&self) -> u64 {
        self.lock().released
    }
}

/// One held gate slot. Releasing happens exactly once, on drop.
#[must_use = "dropping a permit releases its slot immediately"]
#[derive(Debug)]
pub struct Permit<'a> {
    gate: &'a AdmissionGate,
}

impl Permit<'_> {
    pub fn release(self) {}
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release_slot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            AdmissionGate::new(0),
            Err(SimulationError::InvalidCapacity)
        ));
    }

    #[test]
    fn test_try_acquire_exhausts_and_release_restores() {
        let gate = AdmissionGate::new(2).unwrap();
        let a = gate.try_acquire().unwrap();
        let b = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());
        assert_eq!(gate.available(), 0);
        assert_eq!(gate.in_use(), 2);

        a.release();
        assert_eq!(gate.available(), 1);
        drop(b);
        assert_eq!(gate.available(), 2);
        assert_eq!(gate.peak_in_use(), 2);
        assert_eq!(gate.acquired_total(), 2);
        assert_eq!(gate.released_total(), 2);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let gate = AdmissionGate::new(1).unwrap();
        let held = gate.acquire();
        let acquired = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                let _p = gate.acquire();
                acquired.store(true, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(20));
            assert!(!acquired.load(Ordering::SeqCst));
            held.release();
        });

        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn test_acquire_timeout() {
        let gate = AdmissionGate::new(1).unwrap();
        let _held = gate.acquire();
        let err = gate.acquire_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Timeout {
                waiting_for: "admission gate slot",
                ..
            }
        ));
        assert_eq!(gate.available(), 0);
    }

    #[test]
    fn test_holders_never_exceed_capacity() {
        let gate = AdmissionGate::new(3).unwrap();
        let holders = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        let permit = gate.acquire();
                        let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        let available = gate.available();
                        assert!(available <= gate.capacity());
                        thread::yield_now();
                        holders.fetch_sub(1, Ordering::SeqCst);
                        permit.release();
                    }
                });
            }
        });

        assert!(max_seen.load(Ordering::SeqCst) <= 3);
        assert!(gate.peak_in_use() <= 3);
        assert_eq!(gate.acquired_total(), 400);
        assert_eq!(gate.released_total(), 400);
        assert_eq!(gate.available(), 3);
    }
}
