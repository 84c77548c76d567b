// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Definition queue
//!
//! One fetched unit may issue any number of `define` calls while it
//! executes (a concatenated bundle issues many). The queue collects them
//! per unit frame; units nest because blocking resolution executes
//! dependency units on the same stack. Definitions made outside any unit
//! are held separately and processed on a later tick.

use crate::value::Factory;
use std::cell::{Cell, RefCell};

/// A single `define` call captured for later reconciliation
pub(crate) struct QueuedDefinition {
    /// Declared name; anonymous definitions take the requested module's name
    pub name: Option<String>,
    /// Declared dependency names, unresolved
    pub deps: Vec<String>,
    pub factory: Factory,
    /// Mirror the content under the dotted legacy global name
    pub export: bool,
}

/// Collects definitions per executing unit
pub(crate) struct DefinitionQueue {
    frames: RefCell<Vec<Vec<QueuedDefinition>>>,
    standalone: RefCell<Vec<QueuedDefinition>>,
    fallback_armed: Cell<bool>,
}

impl DefinitionQueue {
    pub fn new() -> Self {
        Self {
            frames: RefCell::new(Vec::new()),
            standalone: RefCell::new(Vec::new()),
            fallback_armed: Cell::new(false),
        }
    }

    /// Open a collection frame for one unit execution
    pub fn begin_unit(&self) {
        self.frames.borrow_mut().push(Vec::new());
    }

    /// Close the innermost frame and return its definitions
    pub fn end_unit(&self) -> Vec<QueuedDefinition> {
        self.frames.borrow_mut().pop().unwrap_or_default()
    }

    /// Record a definition.
    ///
    /// Returns true when no unit is executing (the standalone fallback must
    /// be scheduled).
    pub fn push(&self, definition: QueuedDefinition) -> bool {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            frame.push(definition);
            return false;
        }
        self.standalone.borrow_mut().push(definition);
        true
    }

    /// Take all standalone definitions queued so far
    pub fn take_standalone(&self) -> Vec<QueuedDefinition> {
        std::mem::take(&mut *self.standalone.borrow_mut())
    }

    /// Arm the standalone fallback; returns true when it was not armed yet
    pub fn arm_fallback(&self) -> bool {
        !self.fallback_armed.replace(true)
    }

    /// Disarm the standalone fallback
    pub fn disarm_fallback(&self) {
        self.fallback_armed.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Factory, Value};

    fn definition(name: Option<&str>) -> QueuedDefinition {
        QueuedDefinition {
            name: name.map(str::to_owned),
            deps: Vec::new(),
            factory: Factory::Value(Value::Null),
            export: false,
        }
    }

    #[test]
    fn test_definitions_land_in_the_innermost_frame() {
        let queue = DefinitionQueue::new();
        queue.begin_unit();
        assert!(!queue.push(definition(Some("outer.js"))));
        queue.begin_unit();
        assert!(!queue.push(definition(Some("inner.js"))));

        let inner = queue.end_unit();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].name.as_deref(), Some("inner.js"));

        let outer = queue.end_unit();
        assert_eq!(outer.len(), 1);
        assert_eq!(outer[0].name.as_deref(), Some("outer.js"));
    }

    #[test]
    fn test_definitions_outside_any_unit_are_standalone() {
        let queue = DefinitionQueue::new();
        assert!(queue.push(definition(Some("loose.js"))));
        assert!(queue.arm_fallback());
        // arming twice is reported only once
        assert!(!queue.arm_fallback());

        let standalone = queue.take_standalone();
        assert_eq!(standalone.len(), 1);
        queue.disarm_fallback();
        assert!(queue.arm_fallback());
    }
}
