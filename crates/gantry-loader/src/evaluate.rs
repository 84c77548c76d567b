// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Unit evaluation
//!
//! A fetched unit is opaque text until something interprets it. Embedders
//! supply a [`UnitEvaluator`] that evaluates the text and issues `define`
//! calls against the loader; the definition queue associates those calls
//! with the module that was actually requested. [`JsonEvaluator`] is a
//! shipped implementation for JSON definition manifests.

use crate::error::{LoaderError, Result};
use crate::loader::{Definition, Loader};
use crate::value::{Factory, NativeFn, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Interprets one fetched unit, issuing `define` calls against the loader
pub trait UnitEvaluator {
    /// Evaluate `source`, fetched from `url` (absent for preloaded
    /// content with no recorded location).
    ///
    /// Definitions made during evaluation are collected by the loader and
    /// reconciled with the requesting module afterwards. An error fails the
    /// requesting module with an execution error.
    fn evaluate(&self, loader: &Loader, url: Option<&str>, source: &str) -> Result<()>;
}

/// Evaluates JSON definition manifests.
///
/// A unit is a JSON object or array of objects, each describing one
/// definition:
///
/// ```json
/// [
///   {"name": "app/util", "deps": ["app/base"], "factory": {"ref": "make-util"}},
///   {"deps": ["./config"], "factory": {"value": {"answer": 42}}, "export": true}
/// ]
/// ```
///
/// `factory` is either `{"value": ...}` (a static-value module) or
/// `{"ref": "<key>"}` naming a native factory registered with
/// [`JsonEvaluator::register`].
#[derive(Default)]
pub struct JsonEvaluator {
    factories: RefCell<BTreeMap<String, NativeFn>>,
}

impl JsonEvaluator {
    /// Create an evaluator with no registered factories
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native factory addressable as `{"ref": "<key>"}`
    pub fn register(
        &self,
        key: impl Into<String>,
        factory: impl Fn(&[Value]) -> Result<Value> + 'static,
    ) {
        self.factories.borrow_mut().insert(key.into(), Rc::new(factory));
    }

    fn definition_from(&self, unit: &str, entry: &serde_json::Value) -> Result<Definition> {
        let object = entry.as_object().ok_or_else(|| {
            LoaderError::execution(unit, "definition entry must be an object")
        })?;

        let factory_spec = object.get("factory").ok_or_else(|| {
            LoaderError::execution(unit, "definition entry is missing 'factory'")
        })?;
        let factory = self.factory_from(unit, factory_spec)?;
        let mut definition = Definition::new(factory);

        if let Some(name) = object.get("name") {
            let name = name.as_str().ok_or_else(|| {
                LoaderError::execution(unit, "definition 'name' must be a string")
            })?;
            definition = definition.named(name);
        }
        if let Some(deps) = object.get("deps") {
            let deps = deps.as_array().ok_or_else(|| {
                LoaderError::execution(unit, "definition 'deps' must be an array")
            })?;
            let mut names = Vec::with_capacity(deps.len());
            for dep in deps {
                let dep = dep.as_str().ok_or_else(|| {
                    LoaderError::execution(unit, "dependency names must be strings")
                })?;
                names.push(dep.to_string());
            }
            definition = definition.with_dependencies(names);
        }
        if object
            .get("export")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            definition = definition.export_globally();
        }
        Ok(definition)
    }

    fn factory_from(&self, unit: &str, spec: &serde_json::Value) -> Result<Factory> {
        if let Some(map) = spec.as_object() {
            if let Some(reference) = map.get("ref") {
                let key = reference.as_str().ok_or_else(|| {
                    LoaderError::execution(unit, "factory 'ref' must be a string")
                })?;
                let factory = self.factories.borrow().get(key).cloned().ok_or_else(|| {
                    LoaderError::execution(unit, format!("unknown factory reference '{key}'"))
                })?;
                return Ok(Factory::Function(factory));
            }
            if let Some(value) = map.get("value") {
                return Ok(Factory::Value(Value::from_json(value)));
            }
        }
        Err(LoaderError::execution(
            unit,
            "factory must be {\"ref\": ...} or {\"value\": ...}",
        ))
    }
}

impl UnitEvaluator for JsonEvaluator {
    fn evaluate(&self, loader: &Loader, url: Option<&str>, source: &str) -> Result<()> {
        let unit = url.unwrap_or("<unit>");
        let parsed: serde_json::Value = serde_json::from_str(source)
            .map_err(|error| LoaderError::execution(unit, format!("syntax error in unit: {error}")))?;
        let entries = match parsed {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        for entry in entries {
            let definition = self.definition_from(unit, &entry)?;
            loader.define(definition)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_manifest() {
        let evaluator = JsonEvaluator::new();
        let error = evaluator
            .definition_from("u.js", &serde_json::json!("not an object"))
            .unwrap_err();
        assert!(matches!(error, LoaderError::Execution { .. }));
    }

    #[test]
    fn test_unknown_factory_reference_is_an_error() {
        let evaluator = JsonEvaluator::new();
        let entry = serde_json::json!({"factory": {"ref": "nope"}});
        let error = evaluator.definition_from("u.js", &entry).unwrap_err();
        assert!(error.to_string().contains("unknown factory reference"));
    }

    #[test]
    fn test_value_factory_parses() {
        let evaluator = JsonEvaluator::new();
        let entry = serde_json::json!({
            "name": "app/const",
            "factory": {"value": 3},
            "export": true
        });
        let definition = evaluator.definition_from("u.js", &entry).unwrap();
        assert_eq!(definition.name(), Some("app/const"));
        assert!(definition.exports_globally());
    }
}
