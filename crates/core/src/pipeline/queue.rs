// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    abandoned: bool,
}

/// FIFO between two pipeline stages, with an explicit end-of-stream marker.
#[derive(Debug)]
pub struct StageQueue<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> Default for StageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StageQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
                abandoned: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`. Returns `false`, dropping the item, once the reading
    /// side has abandoned the queue.
    pub fn push(&self, item: T) -> bool {
        {
            let mut state = self.lock();
            if !state.abandoned {
                debug_assert!(!state.closed, "push after close");
                state.items.push_back(item);
                return true;
            }
        }
        false
    }

    /// No more items will be pushed. Consumers drain what is left and stop.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// The reader is gone: drop every queued item and refuse later pushes.
    /// Items are dropped after the lock is released.
    pub fn abandon(&self) {
        let dropped = {
            let mut state = self.lock();
            state.closed = true;
            state.abandoned = true;
            std::mem::take(&mut state.items)
        };
        drop(dropped);
    }

    pub fn is_abandoned(&self) -> bool {
        self.lock().abandoned
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Pop the oldest item, sleeping `poll` between checks while the queue
    /// is empty. Returns `None` once the queue is closed and drained.
    pub fn pop_wait(&self, poll: Duration) -> Option<T> {
        loop {
            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            thread::sleep(poll);
        }
    }
}
