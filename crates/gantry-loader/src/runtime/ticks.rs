// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Cooperative tick queue
//!
//! A tick is one bounded slice of deferred work. Callbacks queued while a
//! tick runs land in the *next* tick, so a single `run_tick` call never
//! observes work it caused itself.

use std::cell::RefCell;
use std::collections::VecDeque;

type Thunk = Box<dyn FnOnce()>;

/// FIFO of deferred callbacks, drained one tick at a time.
///
/// The embedder drives the queue (directly or through
/// [`Loader::pump`](crate::Loader::pump)); the engine itself never spins.
pub struct TickQueue {
    queue: RefCell<VecDeque<Thunk>>,
}

impl TickQueue {
    /// Create an empty tick queue
    pub fn new() -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
        }
    }

    /// Queue a callback for the next tick
    pub fn enqueue(&self, thunk: Box<dyn FnOnce()>) {
        self.queue.borrow_mut().push_back(thunk);
    }

    /// Whether any callbacks are queued
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Run one tick: exactly the callbacks queued when the tick starts.
    ///
    /// Returns the number of callbacks run.
    pub fn run_tick(&self) -> usize {
        let batch: VecDeque<Thunk> = std::mem::take(&mut *self.queue.borrow_mut());
        let count = batch.len();
        for thunk in batch {
            thunk();
        }
        count
    }

    /// Run ticks until the queue is quiescent.
    ///
    /// Returns the total number of callbacks run.
    pub fn pump(&self) -> usize {
        let mut total = 0;
        while !self.is_empty() {
            total += self.run_tick();
        }
        total
    }
}

impl Default for TickQueue {
    fn default() -> Self {
        Self::new()
    }
}
