// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Task scheduler
//!
//! Bounds how much synchronous callback work runs before yielding to a
//! fresh cooperative tick. A negative budget disables the scheduler
//! entirely; a zero budget forces one callback per tick; a positive budget
//! batches callbacks until the deadline is exceeded.

use crate::runtime::ticks::TickQueue;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::trace;

type Thunk = Box<dyn FnOnce()>;

/// Wraps callbacks so that a bounded amount of synchronous work happens per
/// cooperative tick.
pub struct TaskScheduler {
    inner: Rc<SchedulerInner>,
}

struct SchedulerInner {
    budget: Cell<Option<Duration>>,
    deadline: Cell<Instant>,
    yield_pending: Cell<bool>,
    chained: RefCell<VecDeque<Thunk>>,
    ticks: Rc<TickQueue>,
}

impl TaskScheduler {
    /// Create a scheduler yielding through the given tick queue.
    ///
    /// A negative `budget_ms` disables throttling.
    pub fn new(ticks: Rc<TickQueue>, budget_ms: i64) -> Self {
        let budget = budget_from_ms(budget_ms);
        Self {
            inner: Rc::new(SchedulerInner {
                budget: Cell::new(budget),
                deadline: Cell::new(Instant::now() + budget.unwrap_or_default()),
                yield_pending: Cell::new(false),
                chained: RefCell::new(VecDeque::new()),
                ticks,
            }),
        }
    }

    /// Replace the time budget; negative disables throttling
    pub fn set_budget_ms(&self, budget_ms: i64) {
        let budget = budget_from_ms(budget_ms);
        self.inner.budget.set(budget);
        self.inner
            .deadline
            .set(Instant::now() + budget.unwrap_or_default());
    }

    /// Whether throttling is active
    pub fn is_enabled(&self) -> bool {
        self.inner.budget.get().is_some()
    }

    /// Wrap `callback` under the current budget.
    ///
    /// When the scheduler is disabled the callback is returned unchanged.
    /// Otherwise, calling the wrapped callback runs it immediately unless a
    /// yield is pending, in which case it is chained to run after the next
    /// tick, re-subjected to the budget.
    pub fn schedule(&self, callback: Box<dyn FnOnce()>) -> Box<dyn FnOnce()> {
        if self.inner.budget.get().is_none() {
            return callback;
        }
        let inner = Rc::clone(&self.inner);
        Box::new(move || SchedulerInner::run(inner, callback))
    }
}

fn budget_from_ms(budget_ms: i64) -> Option<Duration> {
    if budget_ms < 0 {
        None
    } else {
        Some(Duration::from_millis(budget_ms as u64))
    }
}

impl SchedulerInner {
    fn run(inner: Rc<SchedulerInner>, callback: Thunk) {
        if inner.yield_pending.get() {
            inner.chained.borrow_mut().push_back(callback);
            return;
        }
        callback();
        if let Some(budget) = inner.budget.get() {
            if !inner.yield_pending.get() && Instant::now() >= inner.deadline.get() {
                Self::arrange_yield(inner, budget);
            }
        }
    }

    /// Queue a fresh tick; the deadline resets when that tick starts and the
    /// chained callbacks run through the budget again.
    fn arrange_yield(inner: Rc<SchedulerInner>, budget: Duration) {
        trace!("scheduler budget exceeded, yielding to a fresh tick");
        inner.yield_pending.set(true);
        let tick_inner = Rc::clone(&inner);
        inner.ticks.enqueue(Box::new(move || {
            tick_inner.yield_pending.set(false);
            tick_inner
                .deadline
                .set(Instant::now() + tick_inner.budget.get().unwrap_or(budget));
            let batch: VecDeque<Thunk> = std::mem::take(&mut *tick_inner.chained.borrow_mut());
            for thunk in batch {
                Self::run(Rc::clone(&tick_inner), thunk);
            }
        }));
    }
}
