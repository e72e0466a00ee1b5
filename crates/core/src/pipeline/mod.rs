// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Three-stage producer / transformer / consumer pipeline.
//!
//! The producer may run at most `capacity` items ahead of the transformer;
//! the transformer hands each slot back as it takes the item.

pub mod queue;
pub mod stages;

pub use queue::StageQueue;

use crate::sync::AdmissionGate;
use crate::SimResult;
use std::fmt::Debug;
use std::sync::Mutex;
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PipelineConfig {
    /// Items allowed between produce and transform at once.
    pub capacity: usize,
    /// Sleep of an idle stage between queue checks.
    pub poll_interval: Duration,
    /// Pause after each produced item.
    pub produce_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            poll_interval: Duration::from_millis(1),
            produce_interval: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PipelineReport {
    pub capacity: usize,
    pub produced: usize,
    pub transformed: usize,
    pub consumed: usize,
    /// Highest number of items held between produce and transform.
    pub peak_in_flight: usize,
}

#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    gate: AdmissionGate,
}

fn join<R>(handle: ScopedJoinHandle<'_, R>) -> R {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> SimResult<Self> {
        Ok(Self {
            gate: AdmissionGate::new(config.capacity)?,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Push `items` through `transform` into `sink`.
    ///
    /// Every stage runs on its own thread and all of them are joined before
    /// this returns, after the last item reached the sink.
    pub fn run<T, U, I, F, S>(&self, items: I, transform: F, sink: S) -> PipelineReport
    where
        I: IntoIterator<Item = T> + Send,
        T: Send + Debug,
        U: Send + Debug,
        F: Fn(T) -> U + Send,
        S: FnMut(U) + Send,
    {
        let raw = StageQueue::new();
        let processed = StageQueue::new();
        let sink = Mutex::new(sink);
        let gate = &self.gate;
        let poll = self.config.poll_interval;
        let interval = self.config.produce_interval;

        tracing::info!(capacity = gate.capacity(), "pipeline starting");
        let (produced, transformed, consumed) = thread::scope(|s| {
            let (raw, processed, sink) = (&raw, &processed, &sink);
            let producer = s.spawn(move || stages::produce(items, gate, raw, interval));
            let transformer =
                s.spawn(move || stages::transform(raw, transform, processed, poll));
            let consumer = s.spawn(move || stages::consume(processed, sink, poll));
            // A transform panic is re-raised first; the other stages still
            // finish because the transformer abandons its input.
            let transformed = join(transformer);
            (join(producer), transformed, join(consumer))
        });

        let report = PipelineReport {
            capacity: gate.capacity(),
            produced,
            transformed,
            consumed,
            peak_in_flight: gate.peak_in_use(),
        };
        tracing::info!(?report, "pipeline drained");
        report
    }

    /// Like [`run`](Self::run), collecting the consumed items in order.
    pub fn run_collect<T, U, I, F>(&self, items: I, transform: F) -> (Vec<U>, PipelineReport)
    where
        I: IntoIterator<Item = T> + Send,
        T: Send + Debug,
        U: Send + Debug,
        F: Fn(T) -> U + Send,
    {
        let mut out = Vec::new();
        let report = self.run(items, transform, |v| out.push(v));
        (out, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(capacity: usize) -> PipelineConfig {
        PipelineConfig {
            capacity,
            poll_interval: Duration::from_micros(100),
            produce_interval: Duration::ZERO,
        }
    }

    #[test]
    fn test_doubles_five_items_with_two_slots() {
        let pipeline = Pipeline::new(fast(2)).unwrap();
        let (out, report) = pipeline.run_collect(1..=5, |v: i32| v * 2);
        assert_eq!(out, vec![2, 4, 6, 8, 10]);
        assert_eq!(report.produced, 5);
        assert_eq!(report.transformed, 5);
        assert_eq!(report.consumed, 5);
        assert!(report.peak_in_flight <= 2);
        assert_eq!(pipeline.gate().available(), 2);
    }

    #[test]
    fn test_fifo_preserved_for_various_bursts() {
        for n in [1usize, 5, 100] {
            let pipeline = Pipeline::new(fast(3)).unwrap();
            let (out, report) = pipeline.run_collect(0..n, |v| v);
            assert_eq!(out, (0..n).collect::<Vec<_>>());
            assert_eq!(report.consumed, n);
        }
    }

    #[test]
    fn test_empty_burst_terminates() {
        let pipeline = Pipeline::new(fast(1)).unwrap();
        let (out, report) = pipeline.run_collect(Vec::<u8>::new(), |v| v);
        assert!(out.is_empty());
        assert_eq!(report, PipelineReport {
            capacity: 1,
            ..PipelineReport::default()
        });
    }

    #[test]
    fn test_slow_transform_applies_backpressure() {
        let pipeline = Pipeline::new(fast(2)).unwrap();
        let gate = pipeline.gate();
        let max_in_use = AtomicUsize::new(0);

        let (out, report) = pipeline.run_collect(0..20u32, |v| {
            max_in_use.fetch_max(gate.in_use(), Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
            v + 1
        });

        assert_eq!(out, (1..=20).collect::<Vec<_>>());
        assert!(max_in_use.load(Ordering::SeqCst) <= 2);
        // The producer outruns a slow transformer, so it fills every slot.
        assert_eq!(report.peak_in_flight, 2);
        assert_eq!(gate.acquired_total(), 20);
        assert_eq!(gate.released_total(), 20);
    }

    #[test]
    fn test_panicking_transform_propagates() {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let pipeline = Pipeline::new(fast(2)).unwrap();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                pipeline.run_collect(1..=10, |v: i32| if v == 3 { panic!("bad item") } else { v })
            }));
            let _ = tx.send((outcome.is_err(), pipeline.gate().available()));
        });

        let (panicked, available) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("pipeline run did not return after a transform panic");
        assert!(panicked);
        assert_eq!(available, 2);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(Pipeline::new(fast(0)).is_err());
    }
}
