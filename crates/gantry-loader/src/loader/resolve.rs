// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Dependency resolution
//!
//! The recursive algorithm behind `require`: shims and containing bundles
//! load first, the module's state decides between memoized outcomes,
//! inline execution and new loads, and cycles yield a placeholder instead
//! of deadlocking. One algorithm serves both execution modes; blocking
//! mode re-enters it recursively on the same stack.

use super::registry::{ModuleState, SharedRecord};
use super::{names, Loader};
use crate::error::LoaderError;
use crate::fetch::FetchResponse;
use crate::runtime::eventual::{Deferred, Eventual};
use crate::value::Value;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Whether a resolution may suspend or must complete on the caller's stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionMode {
    /// Synchronous resolution; may perform blocking fetches
    Blocking,
    /// Non-blocking resolution through deferreds and ticks
    Deferred,
}

/// Contextual resolver function, injected without loading
pub(crate) const PSEUDO_REQUIRE: &str = "require";
/// Opaque per-module handle, injected without loading
pub(crate) const PSEUDO_MODULE: &str = "module";
/// Live exports object, injected without loading
pub(crate) const PSEUDO_EXPORTS: &str = "exports";

impl Loader {
    /// Resolve one canonical module id.
    ///
    /// `skip_shim_deps` and `skip_bundle` break the re-entry recursion of
    /// the shim and bundle pre-passes.
    pub(crate) fn resolve_module(
        &self,
        requester: Option<&str>,
        id: &str,
        mode: ExecutionMode,
        skip_shim_deps: bool,
        skip_bundle: bool,
    ) -> Eventual {
        // shim dependencies load before the module itself
        if !skip_shim_deps {
            let shim_deps: Option<Vec<String>> = {
                let store = self.inner.store.borrow();
                store
                    .shims
                    .get(id)
                    .filter(|shim| !shim.deps.is_empty())
                    .map(|shim| shim.deps.clone())
            };
            if let Some(deps) = shim_deps {
                trace!(module = %id, "resolving shim dependencies first");
                let record = self.record(id);
                let eventual = self.resolve_all(Some(&record), &deps, mode);
                match mode {
                    ExecutionMode::Blocking => {
                        // best effort in blocking mode: the primary load proceeds
                        if let Err(err) = eventual.into_outcome(id) {
                            warn!(module = %id, %err, "ignoring shim dependency failure");
                        }
                        return self.resolve_module(requester, id, mode, true, skip_bundle);
                    }
                    ExecutionMode::Deferred => {
                        let chained = Deferred::new();
                        let this = self.clone();
                        let requester = requester.map(str::to_owned);
                        let id = id.to_string();
                        let settle = Rc::clone(&chained);
                        eventual.on_settle(move |outcome| {
                            if let Err(err) = outcome {
                                settle.settle(Err(err.clone()));
                                return;
                            }
                            this.resolve_module(
                                requester.as_deref(),
                                &id,
                                ExecutionMode::Deferred,
                                true,
                                skip_bundle,
                            )
                            .on_settle(move |next| settle.settle(next.clone()));
                        });
                        return Eventual::pending(&chained);
                    }
                }
            }
        }

        // a bundled module loads its bundle first, best effort
        if !skip_bundle {
            let bundle: Option<String> = {
                let record = self.record(id);
                let record = record.borrow();
                if record.state == ModuleState::Initial {
                    record.group.clone().filter(|group| group != id)
                } else {
                    None
                }
            };
            if let Some(bundle_id) = bundle {
                debug!(module = %id, bundle = %bundle_id, "loading containing bundle first");
                match mode {
                    ExecutionMode::Blocking => {
                        if let Err(err) = self
                            .resolve_module(None, &bundle_id, mode, false, false)
                            .into_outcome(&bundle_id)
                        {
                            warn!(bundle = %bundle_id, %err, "ignoring bundle failure");
                        }
                        return self.resolve_module(requester, id, mode, skip_shim_deps, true);
                    }
                    ExecutionMode::Deferred => {
                        let chained = Deferred::new();
                        let this = self.clone();
                        let requester = requester.map(str::to_owned);
                        let id = id.to_string();
                        let settle = Rc::clone(&chained);
                        self.resolve_module(None, &bundle_id, ExecutionMode::Deferred, false, false)
                            .on_settle(move |outcome| {
                                if let Err(err) = outcome {
                                    warn!(bundle = %bundle_id, %err, "ignoring bundle failure");
                                }
                                this.resolve_module(
                                    requester.as_deref(),
                                    &id,
                                    ExecutionMode::Deferred,
                                    skip_shim_deps,
                                    true,
                                )
                                .on_settle(move |next| settle.settle(next.clone()));
                            });
                        return Eventual::pending(&chained);
                    }
                }
            }
        }

        let record = self.record(id);
        let (state, async_load, has_payload) = {
            let record = record.borrow();
            (record.state, record.async_load, record.raw_payload.is_some())
        };
        match state {
            ModuleState::Ready => Eventual::Ready(Ok(record.borrow().content.clone())),
            ModuleState::Failed => {
                let err = record.borrow().error.clone().unwrap_or_else(|| {
                    LoaderError::execution(id, "module failed without a recorded error")
                });
                Eventual::Ready(Err(err))
            }
            ModuleState::Preloaded => self.promote_and_execute(&record, mode),
            ModuleState::Loading | ModuleState::Loaded | ModuleState::Executing => {
                // a blocking caller wins over a still-pending deferred
                // execution: demote and reload inline. Deliberate legacy
                // compatibility; the trigger must not be widened.
                if mode == ExecutionMode::Blocking
                    && state == ModuleState::Executing
                    && async_load
                    && has_payload
                {
                    warn!(module = %id, "demoting pending deferred execution for a blocking caller");
                    record.borrow_mut().transition(ModuleState::Preloaded);
                    return self.promote_and_execute(&record, mode);
                }
                // cycle breaking: never wait on a module that transitively
                // depends on its own requester
                if let Some(origin) = requester {
                    if self.inner.registry.has_pending_path(id, origin) {
                        debug!(module = %id, requester = %origin, "dependency cycle detected, yielding placeholder");
                        return Eventual::ok(Value::Undefined);
                    }
                }
                match mode {
                    ExecutionMode::Deferred => Eventual::pending(&record.borrow_mut().deferred()),
                    ExecutionMode::Blocking if !async_load => {
                        trace!(module = %id, "blocking re-entry into an in-flight blocking load, yielding placeholder");
                        Eventual::ok(Value::Undefined)
                    }
                    ExecutionMode::Blocking => {
                        warn!(module = %id, "blocking request while a deferred load is pending, loading again synchronously");
                        let urls = self.candidate_urls(id);
                        self.fetch_blocking(&record, &urls)
                    }
                }
            }
            ModuleState::Initial => self.initiate_load(&record, mode),
        }
    }

    /// Map and resolve a dependency list.
    ///
    /// Pseudo-dependencies are injected in place; every real dependency is
    /// recorded as a pending edge on the requester for cycle detection. The
    /// combined success value is an array of the dependency values in
    /// declaration order.
    pub(crate) fn resolve_all(
        &self,
        requester: Option<&SharedRecord>,
        deps: &[String],
        mode: ExecutionMode,
    ) -> Eventual {
        let requester_name = requester.map(|record| record.borrow().name.clone());
        let mut parts = Vec::with_capacity(deps.len());
        for dep in deps {
            if let Some(record) = requester {
                match dep.as_str() {
                    PSEUDO_REQUIRE => {
                        let base = requester_name.clone().unwrap_or_default();
                        parts.push(Eventual::ok(self.scoped_require(&base)));
                        continue;
                    }
                    PSEUDO_MODULE => {
                        parts.push(Eventual::ok(self.module_handle(record)));
                        continue;
                    }
                    PSEUDO_EXPORTS => {
                        parts.push(Eventual::ok(Value::Object(
                            record.borrow_mut().exports_object(),
                        )));
                        continue;
                    }
                    _ => {}
                }
            }
            let id = match self.canonical(dep, requester_name.as_deref()) {
                Ok(id) => id,
                Err(err) => {
                    parts.push(Eventual::failed(err));
                    continue;
                }
            };
            if let Some(record) = requester {
                record.borrow_mut().pending_deps.insert(id.clone());
            }
            parts.push(self.resolve_module(requester_name.as_deref(), &id, mode, false, false));
        }
        Eventual::join(parts)
    }

    /// Resolve already-canonical ids with no requesting module
    pub(crate) fn resolve_many(&self, ids: &[String], mode: ExecutionMode) -> Eventual {
        let parts = ids
            .iter()
            .map(|id| self.resolve_module(None, id, mode, false, false))
            .collect();
        Eventual::join(parts)
    }

    fn promote_and_execute(&self, record: &SharedRecord, mode: ExecutionMode) -> Eventual {
        record.borrow_mut().transition(ModuleState::Loaded);
        self.execute_unit(record, mode);
        self.outcome_of(record, mode)
    }

    /// The record's current outcome, as seen by a caller in `mode`
    pub(crate) fn outcome_of(&self, record: &SharedRecord, mode: ExecutionMode) -> Eventual {
        let state = record.borrow().state;
        match state {
            ModuleState::Ready => Eventual::Ready(Ok(record.borrow().content.clone())),
            ModuleState::Failed => {
                let (name, err) = {
                    let record = record.borrow();
                    (record.name.clone(), record.error.clone())
                };
                Eventual::Ready(Err(err.unwrap_or_else(|| {
                    LoaderError::execution(&name, "module failed without a recorded error")
                })))
            }
            _ => match mode {
                ExecutionMode::Deferred => Eventual::pending(&record.borrow_mut().deferred()),
                ExecutionMode::Blocking => {
                    let name = record.borrow().name.clone();
                    Eventual::failed(LoaderError::execution(
                        &name,
                        "module did not settle during blocking execution",
                    ))
                }
            },
        }
    }

    /// URL candidates for a module, debug variant first when enabled
    fn candidate_urls(&self, id: &str) -> Vec<String> {
        let store = self.inner.store.borrow();
        let url = names::resource_path(&store, id, None);
        if store.debug_sources {
            if let Some(dbg) = names::debug_variant(id) {
                return vec![names::resource_path(&store, &dbg, None), url];
            }
        }
        vec![url]
    }

    /// First load of a module: `Initial → Loading`, then fetch
    fn initiate_load(&self, record: &SharedRecord, mode: ExecutionMode) -> Eventual {
        let id = record.borrow().name.clone();
        let urls = self.candidate_urls(&id);
        {
            let mut record = record.borrow_mut();
            record.url = urls.last().cloned();
            record.async_load = mode == ExecutionMode::Deferred;
            record.transition(ModuleState::Loading);
        }
        debug!(module = %id, url = %urls.last().cloned().unwrap_or_default(), mode = ?mode, "initiating load");

        match mode {
            ExecutionMode::Blocking => self.fetch_blocking(record, &urls),
            ExecutionMode::Deferred => {
                let deferred = record.borrow_mut().deferred();
                // known dependencies are prefetched before the module's own
                // unit arrives, best effort
                let hints: Vec<String> = self
                    .inner
                    .store
                    .borrow()
                    .dep_cache
                    .get(&id)
                    .cloned()
                    .unwrap_or_default();
                for hint in hints {
                    match self.canonical(&hint, Some(&id)) {
                        Ok(hint_id) => {
                            trace!(module = %id, hint = %hint_id, "prefetching hinted dependency");
                            let _ = self.resolve_module(
                                None,
                                &hint_id,
                                ExecutionMode::Deferred,
                                false,
                                false,
                            );
                        }
                        Err(err) => trace!(module = %id, %err, "ignoring bad dependency hint"),
                    }
                }
                self.fetch_deferred_chain(Rc::clone(record), urls, 0);
                Eventual::pending(&deferred)
            }
        }
    }

    /// Try each URL candidate synchronously; execute the first hit inline
    pub(crate) fn fetch_blocking(&self, record: &SharedRecord, urls: &[String]) -> Eventual {
        let id = record.borrow().name.clone();
        let mut last_error: Option<LoaderError> = None;
        for (index, url) in urls.iter().enumerate() {
            let fetched = self
                .inner
                .fetcher
                .fetch_sync(url)
                .and_then(|response| check_status(url, response));
            match fetched {
                Ok(text) => {
                    if index > 0 {
                        debug!(module = %id, %url, "fallback URL succeeded");
                    }
                    {
                        let mut record = record.borrow_mut();
                        record.url = Some(url.clone());
                        record.raw_payload = Some(text);
                        record.async_load = false;
                        record.transition(ModuleState::Loaded);
                    }
                    self.execute_unit(record, ExecutionMode::Blocking);
                    return self.outcome_of(record, ExecutionMode::Blocking);
                }
                Err(err) => {
                    trace!(module = %id, %url, %err, "fetch attempt failed");
                    last_error = Some(err);
                }
            }
        }
        let err = last_error
            .unwrap_or_else(|| LoaderError::fetch(id.clone(), None, "no URL candidates"));
        self.settle_err(record, err.clone());
        Eventual::Ready(Err(err))
    }

    /// Non-blocking fetch with fallback URLs; unit execution is paced by
    /// the task scheduler
    fn fetch_deferred_chain(&self, record: SharedRecord, urls: Vec<String>, index: usize) {
        let Some(url) = urls.get(index).cloned() else {
            return;
        };
        let request_url = url.clone();
        let this = self.clone();
        let done: crate::fetch::FetchCallback = Box::new(move |result| {
            if record.borrow().settled {
                trace!(url = %url, "late fetch completion for a settled module, ignoring");
                return;
            }
            match result.and_then(|response| check_status(&url, response)) {
                Ok(text) => {
                    {
                        let mut entry = record.borrow_mut();
                        entry.url = Some(url.clone());
                        entry.raw_payload = Some(text);
                        entry.transition(ModuleState::Loaded);
                    }
                    let runner = this.clone();
                    let unit = Rc::clone(&record);
                    let task = this.inner.scheduler.schedule(Box::new(move || {
                        runner.execute_unit(&unit, ExecutionMode::Deferred);
                    }));
                    task();
                }
                Err(err) => {
                    if index + 1 < urls.len() {
                        debug!(url = %url, %err, "fetch failed, trying fallback URL");
                        this.fetch_deferred_chain(record, urls, index + 1);
                    } else {
                        this.settle_err(&record, err);
                    }
                }
            }
        });
        self.inner.fetcher.fetch_deferred(&request_url, done);
    }

    /// The contextual `require` injected into factories
    fn scoped_require(&self, base: &str) -> Value {
        let loader = self.clone();
        let base = base.to_string();
        Value::function(move |args| match args {
            // probe form: current value or undefined, never loads
            [Value::String(name)] => {
                let id = loader.canonical(name, Some(&base))?;
                match loader.inner.registry.lookup(&id) {
                    Some(record) => {
                        let record = record.borrow();
                        if record.state == ModuleState::Ready {
                            Ok(super::publicize(loader.export_value(&record)))
                        } else {
                            Ok(Value::Undefined)
                        }
                    }
                    None => Ok(Value::Undefined),
                }
            }
            // callback form: deferred resolution relative to this module
            [Value::Array(names), rest @ ..] => {
                let callback = match rest {
                    [] => None,
                    [Value::Function(callback)] => Some(Rc::clone(callback)),
                    _ => {
                        return Err(LoaderError::execution(
                            &base,
                            "require callback must be a function",
                        ));
                    }
                };
                let list: Vec<String> = names
                    .borrow()
                    .iter()
                    .filter_map(|value| value.as_str().map(str::to_owned))
                    .collect();
                let requester = loader.inner.registry.lookup(&base);
                let mut parts = Vec::with_capacity(list.len());
                for name in &list {
                    let id = loader.canonical(name, Some(&base))?;
                    if let Some(record) = &requester {
                        record.borrow_mut().pending_deps.insert(id.clone());
                    }
                    parts.push(loader.resolve_module(
                        Some(&base),
                        &id,
                        ExecutionMode::Deferred,
                        false,
                        false,
                    ));
                }
                let dispatcher = loader.clone();
                crate::runtime::eventual::Eventual::join(parts).on_settle(move |outcome| {
                    match outcome {
                        Ok(values) => {
                            if let Some(callback) = callback {
                                let values = super::array_values(values.clone());
                                let thunk = dispatcher.inner.scheduler.schedule(Box::new(
                                    move || {
                                        if let Err(err) = callback(&values) {
                                            tracing::error!(%err, "require callback failed");
                                        }
                                    },
                                ));
                                dispatcher.inner.ticks.enqueue(thunk);
                            }
                        }
                        Err(err) => tracing::error!(%err, "scoped require failed"),
                    }
                });
                Ok(Value::Undefined)
            }
            _ => Err(LoaderError::execution(&base, "unsupported require invocation")),
        })
    }

    /// The opaque module handle injected into factories
    fn module_handle(&self, record: &SharedRecord) -> Value {
        let (name, url, exports) = {
            let mut record = record.borrow_mut();
            (record.name.clone(), record.url.clone(), record.exports_object())
        };
        Value::object_with([
            ("id".to_string(), Value::String(name)),
            (
                "url".to_string(),
                url.map(Value::String).unwrap_or(Value::Undefined),
            ),
            ("exports".to_string(), Value::Object(exports)),
        ])
    }
}

fn check_status(url: &str, response: FetchResponse) -> crate::error::Result<String> {
    if (200..300).contains(&response.status) {
        Ok(response.text)
    } else {
        Err(LoaderError::fetch(
            url,
            Some(response.status),
            format!("unexpected status {}", response.status),
        ))
    }
}
