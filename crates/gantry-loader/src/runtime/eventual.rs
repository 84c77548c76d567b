// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Maybe-deferred results
//!
//! One resolution algorithm serves both execution modes by returning an
//! [`Eventual`]: either an immediate outcome (blocking mode, cache hits) or
//! a [`Deferred`] that settles later. Blocking mode drives eventuals to
//! completion on the caller's stack, which is valid because the engine is
//! single-threaded and re-entrant.

use crate::error::LoaderError;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::trace;

/// Outcome of a module resolution: a value or a memoized failure
pub(crate) type Outcome = crate::error::Result<Value>;

type Subscriber = Box<dyn FnOnce(&Outcome)>;

/// A single-settlement deferred result with subscriber callbacks.
///
/// Settling a second time is a traced no-op, never a silent overwrite.
pub(crate) struct Deferred {
    state: RefCell<DeferredState>,
}

enum DeferredState {
    Pending(Vec<Subscriber>),
    Settled(Outcome),
}

impl Deferred {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(DeferredState::Pending(Vec::new())),
        })
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match &*self.state.borrow() {
            DeferredState::Settled(outcome) => Some(outcome.clone()),
            DeferredState::Pending(_) => None,
        }
    }

    /// Settle and notify subscribers; repeated settlement is ignored
    pub fn settle(&self, outcome: Outcome) {
        let subscribers = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                DeferredState::Settled(_) => {
                    trace!("deferred already settled, ignoring repeated settlement");
                    return;
                }
                DeferredState::Pending(subs) => {
                    let subs = std::mem::take(subs);
                    *state = DeferredState::Settled(outcome.clone());
                    subs
                }
            }
        };
        for subscriber in subscribers {
            subscriber(&outcome);
        }
    }

    /// Register a callback; runs immediately when already settled
    pub fn subscribe(&self, callback: Subscriber) {
        let outcome = {
            let mut state = self.state.borrow_mut();
            match &mut *state {
                DeferredState::Pending(subs) => {
                    subs.push(callback);
                    return;
                }
                DeferredState::Settled(outcome) => outcome.clone(),
            }
        };
        callback(&outcome);
    }
}

/// An immediate outcome or a pending deferred
pub(crate) enum Eventual {
    Ready(Outcome),
    Pending(Rc<Deferred>),
}

impl Eventual {
    pub fn ok(value: Value) -> Self {
        Eventual::Ready(Ok(value))
    }

    pub fn failed(error: LoaderError) -> Self {
        Eventual::Ready(Err(error))
    }

    /// Wrap a deferred, collapsing ones that already settled
    pub fn pending(deferred: &Rc<Deferred>) -> Self {
        match deferred.outcome() {
            Some(outcome) => Eventual::Ready(outcome),
            None => Eventual::Pending(Rc::clone(deferred)),
        }
    }

    /// Run `callback` with the outcome, now or when it settles
    pub fn on_settle(self, callback: impl FnOnce(&Outcome) + 'static) {
        match self {
            Eventual::Ready(outcome) => callback(&outcome),
            Eventual::Pending(deferred) => deferred.subscribe(Box::new(callback)),
        }
    }

    /// Drive the result to completion on the current stack (blocking mode).
    ///
    /// Blocking mode never legitimately observes an unsettled eventual;
    /// when it would, an execution error for `context` is reported instead
    /// of a panic.
    pub fn into_outcome(self, context: &str) -> Outcome {
        match self {
            Eventual::Ready(outcome) => outcome,
            Eventual::Pending(deferred) => deferred.outcome().unwrap_or_else(|| {
                Err(LoaderError::execution(
                    context,
                    "resolution did not complete synchronously",
                ))
            }),
        }
    }

    /// Combine many eventuals into one that yields all values in order.
    ///
    /// Fails fast: the first failure settles the combined result and later
    /// outcomes are ignored. The success value is an array of the parts'
    /// values in their original order.
    pub fn join(parts: Vec<Eventual>) -> Eventual {
        let total = parts.len();
        if total == 0 {
            return Eventual::ok(Value::array(Vec::new()));
        }
        let slots: Rc<RefCell<Vec<Option<Value>>>> = Rc::new(RefCell::new(vec![None; total]));
        let remaining = Rc::new(Cell::new(total));
        let joined = Deferred::new();
        for (index, part) in parts.into_iter().enumerate() {
            let slots = Rc::clone(&slots);
            let remaining = Rc::clone(&remaining);
            let joined = Rc::clone(&joined);
            part.on_settle(move |outcome| match outcome {
                Ok(value) => {
                    slots.borrow_mut()[index] = Some(value.clone());
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        let values: Vec<Value> = slots
                            .borrow_mut()
                            .drain(..)
                            .map(|slot| slot.unwrap_or(Value::Undefined))
                            .collect();
                        joined.settle(Ok(Value::array(values)));
                    }
                }
                Err(error) => joined.settle(Err(error.clone())),
            });
        }
        Eventual::pending(&joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_subscribe_after_settlement_runs_immediately() {
        let deferred = Deferred::new();
        deferred.settle(Ok(Value::Number(7.0)));

        let seen = Rc::new(RefCell::new(None));
        let seen2 = Rc::clone(&seen);
        deferred.subscribe(Box::new(move |outcome| {
            *seen2.borrow_mut() = Some(outcome.clone());
        }));
        let outcome = seen.borrow().clone().unwrap().unwrap();
        assert_eq!(outcome, Value::Number(7.0));
    }

    #[test]
    fn test_repeated_settlement_is_ignored() {
        let deferred = Deferred::new();
        deferred.settle(Ok(Value::Number(1.0)));
        deferred.settle(Ok(Value::Number(2.0)));
        assert_eq!(deferred.outcome().unwrap().unwrap(), Value::Number(1.0));
    }

    #[test]
    fn test_join_preserves_order() {
        let pending = Deferred::new();
        let parts = vec![
            Eventual::ok(Value::Number(1.0)),
            Eventual::pending(&pending),
            Eventual::ok(Value::Number(3.0)),
        ];
        let joined = Eventual::join(parts);
        let seen = Rc::new(RefCell::new(None));
        let seen2 = Rc::clone(&seen);
        joined.on_settle(move |outcome| *seen2.borrow_mut() = Some(outcome.clone()));

        assert!(seen.borrow().is_none());
        pending.settle(Ok(Value::Number(2.0)));

        let outcome = seen.borrow().clone().unwrap().unwrap();
        let values = outcome.as_array().unwrap().borrow().clone();
        assert_eq!(
            values,
            vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]
        );
    }

    #[test]
    fn test_join_fails_fast() {
        let pending = Deferred::new();
        let parts = vec![
            Eventual::pending(&pending),
            Eventual::failed(LoaderError::execution("m.js", "boom")),
        ];
        let joined = Eventual::join(parts);
        let seen = Rc::new(RefCell::new(None));
        let seen2 = Rc::clone(&seen);
        joined.on_settle(move |outcome| *seen2.borrow_mut() = Some(outcome.clone()));

        // the failure settles the join before the pending part completes
        assert!(matches!(
            seen.borrow().clone(),
            Some(Err(LoaderError::Execution { .. }))
        ));
        pending.settle(Ok(Value::Number(1.0)));
        assert!(matches!(
            seen.borrow().clone(),
            Some(Err(LoaderError::Execution { .. }))
        ));
    }

    #[test]
    fn test_empty_join_is_ready() {
        let joined = Eventual::join(Vec::new());
        let outcome = joined.into_outcome("none");
        assert_eq!(outcome.unwrap().as_array().unwrap().borrow().len(), 0);
    }
}
