// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! The loader context and its embedding API
//!
//! A [`Loader`] owns the module registry, definition queue, configuration,
//! tick queue and scheduler, plus the injected collaborators (resource
//! fetcher, unit evaluator, global namespace). Loaders are independent of
//! one another; creating several in one process is supported and is how the
//! tests isolate themselves.

mod execute;
mod names;
mod queue;
mod registry;
mod resolve;

pub use registry::ModuleState;

use crate::config::{ConfigStore, LoaderConfig};
use crate::error::{LoaderError, Result};
use crate::evaluate::{JsonEvaluator, UnitEvaluator};
use crate::fetch::{MemoryFetcher, ResourceFetcher};
use crate::global::{GlobalNamespace, NoopNamespace};
use crate::runtime::scheduler::TaskScheduler;
use crate::runtime::ticks::TickQueue;
use crate::value::{Factory, Value};
use queue::{DefinitionQueue, QueuedDefinition};
use registry::Registry;
use resolve::ExecutionMode;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, error, trace, warn};

/// A module declaration handed to [`Loader::define`].
///
/// Name and dependency list are optional: anonymous definitions take the
/// name of the module that was requested, and a missing dependency list
/// means the factory runs with no arguments.
#[derive(Debug)]
pub struct Definition {
    name: Option<String>,
    deps: Vec<String>,
    factory: Factory,
    export: bool,
}

impl Definition {
    /// Declare a module from a prepared factory
    pub fn new(factory: Factory) -> Self {
        Self {
            name: None,
            deps: Vec::new(),
            factory,
            export: false,
        }
    }

    /// Declare a module produced by a callable factory
    pub fn function(factory: impl Fn(&[Value]) -> Result<Value> + 'static) -> Self {
        Self::new(Factory::Function(Rc::new(factory)))
    }

    /// Declare a static-value module
    pub fn value(value: impl Into<Value>) -> Self {
        Self::new(Factory::Value(value.into()))
    }

    /// Name the module
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare dependencies, resolved before the factory runs.
    ///
    /// The pseudo-dependencies `require`, `module` and `exports` are
    /// injected without loading anything.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Additionally publish the content under the dotted legacy global name
    pub fn export_globally(mut self) -> Self {
        self.export = true;
        self
    }

    /// The declared name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The declared dependency names
    pub fn dependencies(&self) -> &[String] {
        &self.deps
    }

    /// Whether the content is mirrored to the legacy global namespace
    pub fn exports_globally(&self) -> bool {
        self.export
    }
}

pub(crate) struct LoaderInner {
    store: RefCell<ConfigStore>,
    registry: Registry,
    queue: DefinitionQueue,
    ticks: Rc<TickQueue>,
    scheduler: TaskScheduler,
    fetcher: Rc<dyn ResourceFetcher>,
    evaluator: Rc<dyn UnitEvaluator>,
    namespace: Rc<dyn GlobalNamespace>,
}

/// The module dependency-resolution and loading engine.
///
/// Cloning is cheap and yields a handle to the same loader context.
#[derive(Clone)]
pub struct Loader {
    inner: Rc<LoaderInner>,
}

/// Builds a [`Loader`] with its collaborators and initial configuration
pub struct LoaderBuilder {
    fetcher: Option<Rc<dyn ResourceFetcher>>,
    evaluator: Option<Rc<dyn UnitEvaluator>>,
    namespace: Option<Rc<dyn GlobalNamespace>>,
    config: LoaderConfig,
}

impl LoaderBuilder {
    /// Use the given resource fetcher (default: an empty [`MemoryFetcher`])
    pub fn fetcher(mut self, fetcher: Rc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Use the given unit evaluator (default: a plain [`JsonEvaluator`])
    pub fn evaluator(mut self, evaluator: Rc<dyn UnitEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Use the given global namespace (default: discard everything)
    pub fn namespace(mut self, namespace: Rc<dyn GlobalNamespace>) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Apply an initial configuration
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the loader
    pub fn build(self) -> Result<Loader> {
        let ticks = Rc::new(TickQueue::new());
        let scheduler = TaskScheduler::new(Rc::clone(&ticks), self.config.tick_budget_ms);
        let loader = Loader {
            inner: Rc::new(LoaderInner {
                store: RefCell::new(ConfigStore::new()),
                registry: Registry::new(),
                queue: DefinitionQueue::new(),
                ticks,
                scheduler,
                fetcher: self
                    .fetcher
                    .unwrap_or_else(|| Rc::new(MemoryFetcher::new())),
                evaluator: self
                    .evaluator
                    .unwrap_or_else(|| Rc::new(JsonEvaluator::new())),
                namespace: self.namespace.unwrap_or_else(|| Rc::new(NoopNamespace)),
            }),
        };
        loader.configure(self.config)?;
        Ok(loader)
    }
}

impl Loader {
    /// Start building a loader
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder {
            fetcher: None,
            evaluator: None,
            namespace: None,
            config: LoaderConfig::default(),
        }
    }

    /// Apply a configuration.
    ///
    /// Maps, paths, shims, bundles and dependency hints merge into earlier
    /// configuration; flags and the scheduler budget are applied as given.
    /// Must not be called while a resolution is in flight.
    pub fn configure(&self, config: LoaderConfig) -> Result<()> {
        {
            let mut store = self.inner.store.borrow_mut();
            if let Some(base) = &config.base_url {
                store.register_resource_path("", base);
            }
            for (prefix, url) in &config.paths {
                store.register_resource_path(prefix, url);
            }
            for (context, inner) in &config.map {
                store
                    .contexts
                    .entry(context.clone())
                    .or_default()
                    .extend(inner.clone());
            }
            store.debug_sources = config.debug_sources;
            store.strict_definitions = config.strict_definitions;
            store.suppress_global_exports = config.suppress_global_exports;
            store.skip_preload.extend(config.skip_preload.clone());
        }
        // shim, bundle and hint keys are stored canonically; canonicalizing
        // them needs the (partially applied) store, hence the second phase
        for (name, shim) in config.shim {
            let id = self.canonical(&name, None)?;
            self.inner.store.borrow_mut().shims.insert(id, shim);
        }
        for (bundle, members) in config.bundles {
            let bundle_id = self.canonical(&bundle, None)?;
            for member in members {
                let member_id = self.canonical(&member, None)?;
                self.inner
                    .store
                    .borrow_mut()
                    .groups
                    .insert(member_id, bundle_id.clone());
            }
        }
        for (name, hints) in config.dep_cache {
            let id = self.canonical(&name, None)?;
            self.inner.store.borrow_mut().dep_cache.insert(id, hints);
        }
        self.inner.scheduler.set_budget_ms(config.tick_budget_ms);
        Ok(())
    }

    /// Register a name-prefix → URL-prefix mapping
    pub fn register_resource_path(&self, prefix: &str, url: &str) {
        self.inner
            .store
            .borrow_mut()
            .register_resource_path(prefix, url);
    }

    /// Declare a module.
    ///
    /// During unit execution the definition is reconciled with the module
    /// that was requested; outside any unit it is processed on a later
    /// tick.
    pub fn define(&self, definition: Definition) -> Result<()> {
        let queued = QueuedDefinition {
            name: definition.name,
            deps: definition.deps,
            factory: definition.factory,
            export: definition.export,
        };
        let standalone = self.inner.queue.push(queued);
        if standalone && self.inner.queue.arm_fallback() {
            trace!("definition outside any unit, scheduling fallback processing");
            let this = self.clone();
            self.inner
                .ticks
                .enqueue(Box::new(move || this.process_standalone_definitions()));
        }
        Ok(())
    }

    /// Deferred resolution of several modules.
    ///
    /// Resolution errors in the names raise synchronously; runtime failures
    /// reach `on_error`. The callbacks never run on the caller's stack:
    /// they are dispatched through the task scheduler onto the tick queue.
    pub fn require<S, E>(&self, names: &[&str], on_success: S, on_error: E) -> Result<()>
    where
        S: FnOnce(Vec<Value>) + 'static,
        E: FnOnce(LoaderError) + 'static,
    {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(self.canonical(name, None)?);
        }
        let eventual = self.resolve_many(&ids, ExecutionMode::Deferred);
        let this = self.clone();
        eventual.on_settle(move |outcome| {
            let outcome = outcome.clone();
            let thunk: Box<dyn FnOnce()> = Box::new(move || match outcome {
                Ok(values) => on_success(array_values(values)),
                Err(err) => on_error(err),
            });
            let wrapped = this.inner.scheduler.schedule(thunk);
            this.inner.ticks.enqueue(wrapped);
        });
        Ok(())
    }

    /// Synchronous probe: the module's current value, or `None` when it is
    /// not ready. Never triggers a load.
    pub fn probe(&self, name: &str) -> Result<Option<Value>> {
        let id = self.canonical(name, None)?;
        match self.inner.registry.lookup(&id) {
            Some(record) => {
                let record = record.borrow();
                if record.state == ModuleState::Ready {
                    Ok(Some(publicize(self.export_value(&record))))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Blocking resolution of a single module, raising on failure
    pub fn require_sync(&self, name: &str) -> Result<Value> {
        let id = self.canonical(name, None)?;
        self.resolve_module(None, &id, ExecutionMode::Blocking, false, false)
            .into_outcome(&id)
            .map(publicize)
    }

    /// Bulk-register raw content for many modules under one bundle without
    /// fetching. Names matching the skip-preload policy are left alone and
    /// will be fetched individually.
    pub fn preload<I>(&self, modules: I, group: &str, base_url: Option<&str>) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let group_id = self.canonical(group, None)?;
        for (name, text) in modules {
            let id = self.canonical(&name, None)?;
            let skipped = {
                let store = self.inner.store.borrow();
                store
                    .skip_preload
                    .iter()
                    .any(|prefix| names::matches_module(prefix, &id))
            };
            if skipped {
                debug!(module = %id, "preload skipped by policy");
                continue;
            }
            let record = self.record(&id);
            let mut record = record.borrow_mut();
            if record.state == ModuleState::Initial {
                record.raw_payload = Some(text);
                record.group = Some(group_id.clone());
                if let Some(base) = base_url {
                    record.url = Some(format!("{}/{id}", base.trim_end_matches('/')));
                }
                record.transition(ModuleState::Preloaded);
            } else {
                trace!(module = %id, state = ?record.state, "preload ignored, record already active");
            }
        }
        Ok(())
    }

    /// Pure name → URL projection; loads nothing
    pub fn to_url(&self, name: &str) -> Result<String> {
        let normalized = names::normalize(name, None)?;
        let store = self.inner.store.borrow();
        Ok(names::resource_path(&store, &normalized, None))
    }

    /// Remove unexecuted records whose name or containing bundle matches
    /// `target`. In-flight and settled records are untouched. Returns the
    /// number of records removed.
    pub fn evict(&self, target: &str) -> usize {
        let canonical = self.canonical(target, None).ok();
        let mut victims = Vec::new();
        for name in self.inner.registry.names() {
            let Some(record) = self.inner.registry.lookup(&name) else {
                continue;
            };
            let record = record.borrow();
            if record.settled
                || !matches!(record.state, ModuleState::Initial | ModuleState::Preloaded)
            {
                continue;
            }
            let name_hit = names::matches_module(target, &name)
                || canonical.as_deref() == Some(name.as_str());
            let group_hit = record.group.as_deref().is_some_and(|group| {
                names::matches_module(target, group) || canonical.as_deref() == Some(group)
            });
            if name_hit || group_hit {
                victims.push(name.clone());
            }
        }
        for name in &victims {
            self.inner.registry.remove(name);
            debug!(module = %name, "evicted unexecuted record");
        }
        victims.len()
    }

    /// Run queued cooperative ticks until quiescent; returns the number of
    /// callbacks run
    pub fn pump(&self) -> usize {
        self.inner.ticks.pump()
    }

    /// Current state of a module's record, if one exists
    pub fn module_state(&self, name: &str) -> Option<ModuleState> {
        let id = self.canonical(name, None).ok()?;
        self.inner
            .registry
            .lookup(&id)
            .map(|record| record.borrow().state)
    }

    /// Canonical ids of all known module records
    pub fn module_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// The cooperative tick queue driving deferred work
    pub fn tick_queue(&self) -> Rc<TickQueue> {
        Rc::clone(&self.inner.ticks)
    }

    pub(crate) fn canonical(&self, name: &str, requester: Option<&str>) -> Result<String> {
        let store = self.inner.store.borrow();
        names::canonical_id(&store, name, requester)
    }

    pub(crate) fn record(&self, id: &str) -> registry::SharedRecord {
        let group = self.inner.store.borrow().groups.get(id).cloned();
        self.inner.registry.get_or_create(id, group.as_deref())
    }

    pub(crate) fn export_value(&self, record: &registry::ModuleRecord) -> Value {
        if record.content.is_undetermined() {
            if let Some(value) = self.inner.namespace.read(&names::global_name(&record.name)) {
                return value;
            }
            return Value::Undefined;
        }
        record.content.clone()
    }

    /// Timer fallback for definitions made outside any unit execution
    fn process_standalone_definitions(&self) {
        self.inner.queue.disarm_fallback();
        let strict = self.inner.store.borrow().strict_definitions;
        for definition in self.inner.queue.take_standalone() {
            match definition.name.clone() {
                Some(name) => match self.canonical(&name, None) {
                    Ok(id) => self.apply_definition(&id, definition, ExecutionMode::Deferred),
                    Err(err) => {
                        error!(module = %name, %err, "discarding definition with unresolvable name");
                    }
                },
                None if strict => {
                    error!("discarding anonymous definition outside any unit");
                }
                None => {
                    let id = execute::synthetic_name();
                    warn!(module = %id, "anonymous definition outside any unit, assigned synthetic name");
                    self.apply_definition(&id, definition, ExecutionMode::Deferred);
                }
            }
        }
    }
}

/// Map the internal sentinel to `Undefined` at the public boundary
pub(crate) fn publicize(value: Value) -> Value {
    if value.is_undetermined() {
        Value::Undefined
    } else {
        value
    }
}

/// Unpack a joined dependency array into caller-facing values
pub(crate) fn array_values(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.borrow().iter().cloned().map(publicize).collect(),
        other => vec![publicize(other)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_then_pump_makes_module_available() {
        let loader = Loader::builder().build().unwrap();
        loader
            .define(Definition::value(41).named("app/answer"))
            .unwrap();
        assert_eq!(loader.probe("app/answer").unwrap(), None);
        loader.pump();
        assert_eq!(
            loader.probe("app/answer").unwrap(),
            Some(Value::Number(41.0))
        );
    }

    #[test]
    fn test_probe_never_triggers_a_load() {
        let loader = Loader::builder().build().unwrap();
        assert_eq!(loader.probe("app/unknown").unwrap(), None);
        assert!(loader.module_state("app/unknown").is_none());
    }

    #[test]
    fn test_to_url_uses_registered_prefixes() {
        let loader = Loader::builder().build().unwrap();
        loader.register_resource_path("app", "https://cdn/x/");
        assert_eq!(
            loader.to_url("app/foo.json").unwrap(),
            "https://cdn/x/foo.json"
        );
        // relative names have no base at the top level
        assert!(loader.to_url("./foo.js").is_err());
    }

    #[test]
    fn test_loaders_are_independent() {
        let first = Loader::builder().build().unwrap();
        let second = Loader::builder().build().unwrap();
        first
            .define(Definition::value("one").named("shared/name"))
            .unwrap();
        first.pump();
        assert!(first.probe("shared/name").unwrap().is_some());
        assert!(second.probe("shared/name").unwrap().is_none());
    }
}
