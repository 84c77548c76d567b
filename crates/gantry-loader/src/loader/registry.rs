// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Module registry
//!
//! Owns one record per canonical module identifier. Records are created
//! lazily on first reference and never deleted except through explicit
//! eviction of unexecuted records.

use crate::error::LoaderError;
use crate::runtime::eventual::Deferred;
use crate::value::{SharedObject, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use tracing::trace;

/// Lifecycle state of a module record.
///
/// Transitions move forward through the declared order, with one deliberate
/// exception: a blocking caller demotes a pending deferred execution from
/// `Executing` back to `Preloaded` to re-run it inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModuleState {
    /// Known by name only; nothing fetched yet
    Initial,
    /// Raw content registered without a fetch (bulk preload)
    Preloaded,
    /// A fetch is in flight
    Loading,
    /// Content is available but has not been executed
    Loaded,
    /// The unit or factory is executing (or awaiting its dependencies)
    Executing,
    /// Export value determined; terminal
    Ready,
    /// Permanently failed; terminal
    Failed,
}

impl ModuleState {
    /// Whether this state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, ModuleState::Ready | ModuleState::Failed)
    }
}

pub(crate) type SharedRecord = Rc<RefCell<ModuleRecord>>;

/// One record per canonical module identifier
pub(crate) struct ModuleRecord {
    /// Canonical identifier
    pub name: String,
    pub state: ModuleState,
    /// Monotonic: true once the outcome is fixed and observers notified.
    /// The resolved value never changes afterwards.
    pub settled: bool,
    /// Resolved network location, once known
    pub url: Option<String>,
    /// Fetched-but-not-yet-executed content; cleared at settlement
    pub raw_payload: Option<String>,
    /// Containing bundle, if any
    pub group: Option<String>,
    /// Names this module has started requesting (cycle detection only)
    pub pending_deps: HashSet<String>,
    /// Module names settled identically to this one
    pub aliases: Vec<String>,
    /// Resolved export value; `Undetermined` until settlement
    pub content: Value,
    /// Failure detail, present only when `state` is `Failed`
    pub error: Option<LoaderError>,
    /// Whether the current in-flight load runs in deferred mode
    pub async_load: bool,
    /// Deferred observed by deferred-mode callers; lazily created
    pub deferred: Option<Rc<Deferred>>,
    /// Live exports object injected into factories; lazily created
    pub exports: Option<SharedObject>,
}

impl ModuleRecord {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ModuleState::Initial,
            settled: false,
            url: None,
            raw_payload: None,
            group: None,
            pending_deps: HashSet::new(),
            aliases: Vec::new(),
            content: Value::Undetermined,
            error: None,
            async_load: false,
            deferred: None,
            exports: None,
        }
    }

    /// The deferred observed by deferred-mode callers
    pub fn deferred(&mut self) -> Rc<Deferred> {
        if let Some(deferred) = &self.deferred {
            return Rc::clone(deferred);
        }
        let deferred = Deferred::new();
        self.deferred = Some(Rc::clone(&deferred));
        deferred
    }

    /// The live exports object injected into this module's factory
    pub fn exports_object(&mut self) -> SharedObject {
        if let Some(exports) = &self.exports {
            return Rc::clone(exports);
        }
        let exports: SharedObject = Rc::new(RefCell::new(BTreeMap::new()));
        self.exports = Some(Rc::clone(&exports));
        exports
    }

    pub fn transition(&mut self, next: ModuleState) {
        trace!(module = %self.name, from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }
}

/// Owns all module records
pub(crate) struct Registry {
    records: RefCell<HashMap<String, SharedRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            records: RefCell::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<SharedRecord> {
        self.records.borrow().get(name).cloned()
    }

    /// The record for `name`, created in `Initial` state on first reference
    pub fn get_or_create(&self, name: &str, group: Option<&str>) -> SharedRecord {
        if let Some(record) = self.lookup(name) {
            return record;
        }
        let mut record = ModuleRecord::new(name);
        record.group = group.map(str::to_owned);
        let record = Rc::new(RefCell::new(record));
        self.records
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&record));
        record
    }

    pub fn remove(&self, name: &str) -> Option<SharedRecord> {
        self.records.borrow_mut().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `from` can reach `to` following pending-dependency edges.
    ///
    /// This is the cycle check: a module that transitively depends on its
    /// own requester must not be waited for.
    pub fn has_pending_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack = vec![from.to_string()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(record) = self.lookup(&current) else {
                continue;
            };
            let deps: Vec<String> = record.borrow().pending_deps.iter().cloned().collect();
            for dep in deps {
                if dep == to {
                    return true;
                }
                stack.push(dep);
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_returns_the_same_record() {
        let registry = Registry::new();
        let first = registry.get_or_create("app/a.js", None);
        let second = registry.get_or_create("app/a.js", Some("ignored.js"));
        assert!(Rc::ptr_eq(&first, &second));
        // group assignment only happens at creation
        assert!(second.borrow().group.is_none());
    }

    #[test]
    fn test_state_order_matches_lifecycle() {
        assert!(ModuleState::Initial < ModuleState::Loading);
        assert!(ModuleState::Preloaded < ModuleState::Loaded);
        assert!(ModuleState::Loaded < ModuleState::Executing);
        assert!(ModuleState::Executing < ModuleState::Ready);
        assert!(ModuleState::Ready.is_terminal());
        assert!(ModuleState::Failed.is_terminal());
        assert!(!ModuleState::Executing.is_terminal());
    }

    #[test]
    fn test_pending_path_reachability() {
        let registry = Registry::new();
        let a = registry.get_or_create("a.js", None);
        let b = registry.get_or_create("b.js", None);
        registry.get_or_create("c.js", None);

        a.borrow_mut().pending_deps.insert("b.js".to_string());
        b.borrow_mut().pending_deps.insert("c.js".to_string());

        assert!(registry.has_pending_path("a.js", "c.js"));
        assert!(registry.has_pending_path("a.js", "a.js"));
        assert!(!registry.has_pending_path("c.js", "a.js"));
    }

    #[test]
    fn test_pending_path_survives_cycles_in_the_graph() {
        let registry = Registry::new();
        let a = registry.get_or_create("a.js", None);
        let b = registry.get_or_create("b.js", None);
        a.borrow_mut().pending_deps.insert("b.js".to_string());
        b.borrow_mut().pending_deps.insert("a.js".to_string());

        assert!(registry.has_pending_path("a.js", "b.js"));
        assert!(!registry.has_pending_path("a.js", "x.js"));
    }
}
