// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Unit execution and factory application
//!
//! Executing a unit evaluates its text inside a definition-queue frame and
//! reconciles the collected definitions with the requested module.
//! Applying a definition resolves its dependencies, runs the factory
//! exactly once, determines the export value and settles the module,
//! propagating the outcome to aliases.

use super::queue::QueuedDefinition;
use super::registry::{ModuleState, SharedRecord};
use super::resolve::{ExecutionMode, PSEUDO_EXPORTS, PSEUDO_MODULE};
use super::{names, Loader};
use crate::error::LoaderError;
use crate::value::{Factory, SharedObject, Value};
use std::rc::Rc;
use tracing::{debug, error, info, trace, warn};

/// Synthetic id for definitions that cannot be matched to a name under the
/// lenient policy
pub(crate) fn synthetic_name() -> String {
    format!("~anonymous-{}.js", uuid::Uuid::new_v4())
}

impl Loader {
    /// Execute a module's fetched or preloaded unit.
    ///
    /// The raw payload stays on the record until settlement; that window is
    /// what allows a blocking caller to demote and re-run a pending
    /// deferred execution.
    pub(crate) fn execute_unit(&self, record: &SharedRecord, mode: ExecutionMode) {
        let (name, url, payload, settled) = {
            let record = record.borrow();
            (
                record.name.clone(),
                record.url.clone(),
                record.raw_payload.clone(),
                record.settled,
            )
        };
        if settled {
            trace!(module = %name, "unit already settled, skipping execution");
            return;
        }
        let Some(source) = payload else {
            self.settle_err(
                record,
                LoaderError::execution(&name, "no content available to execute"),
            );
            return;
        };
        record.borrow_mut().transition(ModuleState::Executing);
        debug!(module = %name, "executing unit");

        self.inner.queue.begin_unit();
        let evaluated = self.inner.evaluator.evaluate(self, url.as_deref(), &source);
        let definitions = self.inner.queue.end_unit();

        if let Err(err) = evaluated {
            if !definitions.is_empty() {
                trace!(module = %name, count = definitions.len(), "dropping definitions of a failed unit");
            }
            self.settle_err(record, LoaderError::execution(&name, err.to_string()));
            return;
        }
        self.process_unit_definitions(record, definitions, mode);
    }

    /// Reconcile one unit's queued definitions with the requested module
    fn process_unit_definitions(
        &self,
        requested: &SharedRecord,
        definitions: Vec<QueuedDefinition>,
        mode: ExecutionMode,
    ) {
        let requested_name = requested.borrow().name.clone();
        let strict = self.inner.store.borrow().strict_definitions;

        // a shimmed module outside the foreign-module protocol takes its
        // value from the legacy namespace, even when the unit defines
        let global_shim_wins = {
            let store = self.inner.store.borrow();
            store
                .shims
                .get(&requested_name)
                .is_some_and(|shim| !shim.exports.is_empty() && !shim.amd)
        };
        if global_shim_wins {
            if let Some(content) = self.shim_export_content(&requested_name) {
                if !definitions.is_empty() {
                    debug!(module = %requested_name, "shim exports take precedence over unit definitions");
                }
                self.settle_ok(requested, content);
            }
        }

        let mut consumed = false;
        let mut anonymous_seen = false;
        let mut prepared: Vec<(String, QueuedDefinition)> = Vec::new();

        for mut definition in definitions {
            let id = match &definition.name {
                None => {
                    if anonymous_seen || consumed {
                        // a unit may contain at most one anonymous definition,
                        // and only while the requested name is unclaimed
                        if strict {
                            self.settle_err(
                                requested,
                                LoaderError::declaration(
                                    &requested_name,
                                    "ambiguous anonymous definition in unit",
                                ),
                            );
                            return;
                        }
                        let synthetic = synthetic_name();
                        warn!(module = %requested_name, synthetic = %synthetic, "ambiguous anonymous definition, assigned synthetic id");
                        anonymous_seen = true;
                        synthetic
                    } else {
                        anonymous_seen = true;
                        consumed = true;
                        requested_name.clone()
                    }
                }
                Some(name) => match self.canonical(name, Some(&requested_name)) {
                    Ok(id) => {
                        if id == requested_name {
                            consumed = true;
                        }
                        id
                    }
                    Err(err) => {
                        self.settle_err(requested, err);
                        return;
                    }
                },
            };
            definition.name = Some(id.clone());
            prepared.push((id, definition));
        }

        if !consumed {
            match prepared.first() {
                Some((first_id, _)) if *first_id != requested_name => {
                    // heuristic: this unit's first module probably is what
                    // was asked for under a different name
                    debug!(module = %requested_name, alias_of = %first_id, "treating first defined module as an alias of the request");
                    let first = self.record(first_id);
                    first.borrow_mut().aliases.push(requested_name.clone());
                    let outcome = {
                        let first = first.borrow();
                        if first.settled {
                            Some((first.content.clone(), first.error.clone()))
                        } else {
                            None
                        }
                    };
                    if let Some((content, err)) = outcome {
                        match err {
                            Some(err) => self.settle_err(requested, err),
                            None => self.settle_ok(requested, content),
                        }
                    }
                }
                Some(_) => {}
                None => {
                    // nothing was defined at all: the value lives elsewhere
                    match self.shim_export_content(&requested_name) {
                        Some(content) => {
                            debug!(module = %requested_name, "settling from shim global exports");
                            self.settle_ok(requested, content);
                        }
                        None => {
                            trace!(module = %requested_name, "unit defined nothing, settling with undetermined content");
                            self.settle_ok(requested, Value::Undetermined);
                        }
                    }
                    return;
                }
            }
        }

        for (id, definition) in prepared {
            self.apply_definition(&id, definition, mode);
        }
    }

    /// Resolve a definition's dependencies, run its factory and settle
    pub(crate) fn apply_definition(
        &self,
        id: &str,
        definition: QueuedDefinition,
        mode: ExecutionMode,
    ) {
        let record = self.record(id);
        if record.borrow().settled {
            info!(module = %id, "skipping duplicate execution of a settled module");
            return;
        }
        {
            let mut record = record.borrow_mut();
            if record.state < ModuleState::Loaded {
                record.transition(ModuleState::Loaded);
            }
            record.transition(ModuleState::Executing);
        }

        let uses_exports_handle = definition
            .deps
            .iter()
            .any(|dep| dep == PSEUDO_EXPORTS || dep == PSEUDO_MODULE);
        let dependencies = self.resolve_all(Some(&record), &definition.deps, mode);

        let this = self.clone();
        let target = Rc::clone(&record);
        let id = id.to_string();
        let factory = definition.factory;
        let export = definition.export;
        dependencies.on_settle(move |outcome| match outcome {
            Ok(values) => {
                let args = super::array_values(values.clone());
                this.run_factory(&target, factory, &args, uses_exports_handle, export);
            }
            Err(err) => {
                let url = target.borrow().url.clone();
                let wrapped = LoaderError::dependency(&id, url.as_deref(), err.clone());
                this.settle_err(&target, wrapped);
            }
        });
    }

    /// Invoke the factory and determine the export value
    fn run_factory(
        &self,
        record: &SharedRecord,
        factory: Factory,
        args: &[Value],
        uses_exports_handle: bool,
        export: bool,
    ) {
        let (name, settled) = {
            let record = record.borrow();
            (record.name.clone(), record.settled)
        };
        if settled {
            info!(module = %name, "skipping duplicate settlement");
            return;
        }
        match factory {
            Factory::Function(function) => match function(args) {
                Ok(returned) => {
                    let content = self.determine_content(record, returned, uses_exports_handle);
                    if export {
                        self.export_globally(&name, &content);
                    }
                    self.settle_ok(record, content);
                }
                Err(err) => {
                    let wrapped =
                        LoaderError::execution(&name, format!("factory failed: {err}"));
                    self.settle_err(record, wrapped);
                }
            },
            Factory::Value(value) => {
                if export {
                    self.export_globally(&name, &value);
                }
                self.settle_ok(record, value);
            }
        }
    }

    /// Export-value precedence: a populated exports handle that differs
    /// from the returned value wins, as does a populated handle when the
    /// factory returned the undetermined sentinel
    fn determine_content(
        &self,
        record: &SharedRecord,
        returned: Value,
        uses_exports_handle: bool,
    ) -> Value {
        if !uses_exports_handle {
            return returned;
        }
        let handle: Option<SharedObject> = record.borrow().exports.clone();
        let Some(handle) = handle else {
            return returned;
        };
        let populated = !handle.borrow().is_empty();
        let handle_value = Value::Object(Rc::clone(&handle));
        if populated && handle_value != returned {
            return handle_value;
        }
        if returned.is_undetermined() && populated {
            return handle_value;
        }
        returned
    }

    /// Best-effort write of a module's content to the legacy namespace
    fn export_globally(&self, id: &str, content: &Value) {
        if self.inner.store.borrow().suppress_global_exports {
            return;
        }
        let global = names::global_name(id);
        if content.is_undetermined() {
            warn!(module = %id, %global, "no content available for global export");
            return;
        }
        trace!(module = %id, %global, "exporting under legacy global name");
        self.inner.namespace.write(&global, content.clone());
    }

    /// The export value of a shimmed module, read from the legacy namespace
    fn shim_export_content(&self, id: &str) -> Option<Value> {
        let exports: Vec<String> = {
            let store = self.inner.store.borrow();
            store
                .shims
                .get(id)
                .map(|shim| shim.exports.clone())
                .unwrap_or_default()
        };
        match exports.as_slice() {
            [] => None,
            [single] => self.inner.namespace.read(single),
            many => {
                let entries: Vec<(String, Value)> = many
                    .iter()
                    .map(|name| {
                        let key = name.rsplit('.').next().unwrap_or(name).to_string();
                        let value = self
                            .inner
                            .namespace
                            .read(name)
                            .unwrap_or(Value::Undefined);
                        (key, value)
                    })
                    .collect();
                Some(Value::object_with(entries))
            }
        }
    }

    /// Fix a module's successful outcome and notify observers
    pub(crate) fn settle_ok(&self, record: &SharedRecord, content: Value) {
        let (aliases, deferred, name) = {
            let mut record = record.borrow_mut();
            if record.settled {
                trace!(module = %record.name, "already settled, ignoring repeated settlement");
                return;
            }
            record.settled = true;
            record.content = content.clone();
            record.error = None;
            record.raw_payload = None;
            record.pending_deps.clear();
            record.transition(ModuleState::Ready);
            (
                std::mem::take(&mut record.aliases),
                record.deferred.clone(),
                record.name.clone(),
            )
        };
        debug!(module = %name, "module ready");
        if let Some(deferred) = deferred {
            deferred.settle(Ok(content.clone()));
        }
        for alias in aliases {
            let alias_record = self.record(&alias);
            self.settle_ok(&alias_record, content.clone());
        }
    }

    /// Fix a module's failure and notify observers
    pub(crate) fn settle_err(&self, record: &SharedRecord, err: LoaderError) {
        let (aliases, deferred, name) = {
            let mut record = record.borrow_mut();
            if record.settled {
                trace!(module = %record.name, "already settled, ignoring repeated failure");
                return;
            }
            record.settled = true;
            record.error = Some(err.clone());
            record.raw_payload = None;
            record.pending_deps.clear();
            record.transition(ModuleState::Failed);
            (
                std::mem::take(&mut record.aliases),
                record.deferred.clone(),
                record.name.clone(),
            )
        };
        error!(module = %name, %err, "module failed");
        if let Some(deferred) = deferred {
            deferred.settle(Err(err.clone()));
        }
        for alias in aliases {
            let alias_record = self.record(&alias);
            self.settle_err(&alias_record, err.clone());
        }
    }
}
