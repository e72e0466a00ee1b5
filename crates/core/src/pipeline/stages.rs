// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The three pipeline stages. Each one holds at most one lock at a time:
//! the gate, a queue, or the sink, never two together.

use super::queue::StageQueue;
use crate::sync::{AdmissionGate, Permit};
use std::fmt::Debug;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// An item travelling from the producer to the transformer, together with
/// the gate slot that admitted it.
#[derive(Debug)]
pub struct Admitted<'g, T> {
    pub item: T,
    pub permit: Permit<'g>,
}

/// Admit and enqueue every item in order, then close `output`.
///
/// Blocks on the gate whenever `capacity` items are already in flight.
pub fn produce<'g, T, I>(
    items: I,
    gate: &'g AdmissionGate,
    output: &StageQueue<Admitted<'g, T>>,
    interval: Duration,
) -> usize
where
    I: IntoIterator<Item = T>,
    T: Debug,
{
    let mut produced = 0;
    for item in items {
        tracing::info!(stage = "produce", ?item, "read value");
        let permit = gate.acquire();
        if !output.push(Admitted { item, permit }) {
            tracing::warn!(stage = "produce", produced, "transformer gone; stopping");
            break;
        }
        produced += 1;
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
    output.close();
    tracing::debug!(stage = "produce", produced, "input exhausted");
    produced
}

/// Closes the transformer's output however the stage ends. On a panic it
/// also abandons the input so queued permits return to the gate and the
/// producer stops.
struct TransformExit<'q, T, U> {
    input: &'q StageQueue<T>,
    output: &'q StageQueue<U>,
}

impl<T, U> Drop for TransformExit<'_, T, U> {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!(stage = "transform", "transform panicked; abandoning input");
            self.input.abandon();
        }
        self.output.close();
    }
}

/// Apply `f` to each admitted item, release its slot and forward the result.
pub fn transform<'g, T, U, F>(
    input: &StageQueue<Admitted<'g, T>>,
    f: F,
    output: &StageQueue<U>,
    poll: Duration,
) -> usize
where
    F: Fn(T) -> U,
    U: Debug,
{
    let exit = TransformExit { input, output };
    let mut transformed = 0;
    while let Some(Admitted { item, permit }) = input.pop_wait(poll) {
        let value = f(item);
        permit.release();
        tracing::info!(stage = "transform", ?value, "processed value");
        output.push(value);
        transformed += 1;
    }
    drop(exit);
    tracing::debug!(stage = "transform", transformed, "input drained");
    transformed
}

/// Hand every item to `sink`, which is guarded by its own lock.
pub fn consume<U, S>(input: &StageQueue<U>, sink: &Mutex<S>, poll: Duration) -> usize
where
    S: FnMut(U),
    U: Debug,
{
    let mut consumed = 0;
    while let Some(value) = input.pop_wait(poll) {
        tracing::info!(stage = "consume", ?value, "sending value");
        let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
        (*sink)(value);
        consumed += 1;
    }
    tracing::debug!(stage = "consume", consumed, "input drained");
    consumed
}
