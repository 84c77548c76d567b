// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Legacy global namespace
//!
//! Some modules interact with a dotted legacy namespace instead of the
//! define mechanism: shimmed modules publish their export value under a
//! global name, and `exportGlobally` definitions mirror their content
//! there. The namespace is an injected capability; the default discards
//! writes and resolves nothing.

use crate::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use tracing::trace;

/// Read/write access to a dotted legacy global namespace.
///
/// Implementations must never raise; the loader's invariants do not survive
/// failures inside this collaborator.
pub trait GlobalNamespace {
    /// The value published under a dotted name, if any
    fn read(&self, name: &str) -> Option<Value>;

    /// Publish a value under a dotted name
    fn write(&self, name: &str, value: Value);
}

/// Namespace that discards writes and resolves no names
pub struct NoopNamespace;

impl GlobalNamespace for NoopNamespace {
    fn read(&self, _name: &str) -> Option<Value> {
        None
    }

    fn write(&self, name: &str, _value: Value) {
        trace!(name, "global export discarded");
    }
}

/// Map-backed namespace for embeddings and tests
#[derive(Default)]
pub struct MapNamespace {
    values: RefCell<BTreeMap<String, Value>>,
}

impl MapNamespace {
    /// Create an empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a dotted name, e.g. a legacy library's export
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.values.borrow_mut().insert(name.into(), value);
    }

    /// The value stored under a dotted name, if any
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.borrow().get(name).cloned()
    }
}

impl GlobalNamespace for MapNamespace {
    fn read(&self, name: &str) -> Option<Value> {
        self.get(name)
    }

    fn write(&self, name: &str, value: Value) {
        self.values.borrow_mut().insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_namespace_round_trip() {
        let namespace = MapNamespace::new();
        assert!(namespace.read("app.widget").is_none());
        namespace.write("app.widget", Value::Number(4.0));
        assert_eq!(namespace.read("app.widget"), Some(Value::Number(4.0)));
    }

    #[test]
    fn test_noop_namespace_resolves_nothing() {
        let namespace = NoopNamespace;
        namespace.write("anything", Value::Null);
        assert!(namespace.read("anything").is_none());
    }
}
