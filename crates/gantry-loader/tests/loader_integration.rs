// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! End-to-end tests of the loading engine: memoization, cycle breaking,
//! bundles, shims, error chains and the blocking/deferred interplay.

use gantry_loader::{
    Definition, GlobalNamespace, JsonEvaluator, Loader, LoaderConfig, LoaderError, MapNamespace,
    MemoryFetcher, ModuleState, ResourceFetcher, UnitEvaluator, Value,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct Harness {
    loader: Loader,
    fetcher: Rc<MemoryFetcher>,
    evaluator: Rc<JsonEvaluator>,
    namespace: Rc<MapNamespace>,
}

fn harness(config: LoaderConfig) -> Harness {
    let fetcher = Rc::new(MemoryFetcher::new());
    let evaluator = Rc::new(JsonEvaluator::new());
    let namespace = Rc::new(MapNamespace::new());
    let loader = Loader::builder()
        .fetcher(Rc::clone(&fetcher) as Rc<dyn ResourceFetcher>)
        .evaluator(Rc::clone(&evaluator) as Rc<dyn UnitEvaluator>)
        .namespace(Rc::clone(&namespace) as Rc<dyn GlobalNamespace>)
        .config(config)
        .build()
        .unwrap();
    Harness {
        loader,
        fetcher,
        evaluator,
        namespace,
    }
}

#[test]
fn repeated_resolution_returns_the_memoized_outcome() {
    let h = harness(LoaderConfig::default());
    let runs = Rc::new(Cell::new(0));
    let counter = Rc::clone(&runs);
    h.evaluator.register("make-a", move |_| {
        counter.set(counter.get() + 1);
        Ok(Value::from(1))
    });
    h.fetcher
        .insert("./lib/a.js", r#"[{"factory": {"ref": "make-a"}}]"#);

    let first = h.loader.require_sync("lib/a").unwrap();
    let second = h.loader.require_sync("lib/a").unwrap();

    assert_eq!(first, Value::Number(1.0));
    assert_eq!(second, Value::Number(1.0));
    assert_eq!(runs.get(), 1);
    assert_eq!(h.fetcher.request_count("./lib/a.js"), 1);
    assert_eq!(h.loader.module_state("lib/a"), Some(ModuleState::Ready));
}

#[test]
fn mutual_requires_resolve_without_deadlock() {
    let h = harness(LoaderConfig::default());
    h.fetcher.attach_ticks(h.loader.tick_queue());

    let a_saw = Rc::new(RefCell::new(None));
    let b_saw = Rc::new(RefCell::new(None));
    let a_sink = Rc::clone(&a_saw);
    h.evaluator.register("make-a", move |args| {
        *a_sink.borrow_mut() = Some(args[0].clone());
        Ok(Value::from("a"))
    });
    let b_sink = Rc::clone(&b_saw);
    h.evaluator.register("make-b", move |args| {
        *b_sink.borrow_mut() = Some(args[0].clone());
        Ok(Value::from("b"))
    });
    h.fetcher.insert(
        "./lib/a.js",
        r#"[{"deps": ["lib/b"], "factory": {"ref": "make-a"}}]"#,
    );
    h.fetcher.insert(
        "./lib/b.js",
        r#"[{"deps": ["lib/a"], "factory": {"ref": "make-b"}}]"#,
    );

    let done = Rc::new(RefCell::new(None));
    let done2 = Rc::clone(&done);
    h.loader
        .require(
            &["lib/a", "lib/b"],
            move |values| *done2.borrow_mut() = Some(values),
            |err| panic!("unexpected failure: {err}"),
        )
        .unwrap();
    h.loader.pump();

    let values = done.borrow().clone().expect("require completed");
    assert_eq!(values, vec![Value::from("a"), Value::from("b")]);
    // whichever module was still pending got the placeholder on first pass
    assert_eq!(b_saw.borrow().clone(), Some(Value::Undefined));
    assert_eq!(a_saw.borrow().clone(), Some(Value::from("b")));
}

#[test]
fn bundle_members_trigger_exactly_one_bundle_fetch() {
    let mut config = LoaderConfig::default();
    config.bundles.insert(
        "app/bundle".to_string(),
        vec!["app/x".to_string(), "app/y".to_string()],
    );
    let h = harness(config);
    h.fetcher.insert(
        "./app/bundle.js",
        r#"[
            {"name": "app/x", "factory": {"value": 1}},
            {"name": "app/y", "factory": {"value": 2}}
        ]"#,
    );

    assert_eq!(h.loader.require_sync("app/x").unwrap(), Value::Number(1.0));
    assert_eq!(h.fetcher.request_count("./app/bundle.js"), 1);

    // the second member needs no fetch at all
    assert_eq!(h.loader.require_sync("app/y").unwrap(), Value::Number(2.0));
    assert_eq!(h.fetcher.request_count("./app/bundle.js"), 1);
    assert_eq!(h.fetcher.request_count("./app/x.js"), 0);
    assert_eq!(h.fetcher.request_count("./app/y.js"), 0);
}

#[test]
fn failed_fetch_is_memoized_and_not_retried() {
    let h = harness(LoaderConfig::default());

    let first = h.loader.require_sync("lib/missing").unwrap_err();
    assert!(matches!(
        first,
        LoaderError::Fetch {
            status: Some(404),
            ..
        }
    ));
    assert_eq!(h.loader.module_state("lib/missing"), Some(ModuleState::Failed));

    let second = h.loader.require_sync("lib/missing").unwrap_err();
    assert!(matches!(second, LoaderError::Fetch { status: Some(404), .. }));
    assert_eq!(h.fetcher.request_count("./lib/missing.js"), 1);
}

#[test]
fn dependency_failures_chain_without_nesting_wrappers() {
    let h = harness(LoaderConfig::default());
    // lib/a.js is missing; b depends on a, c depends on b
    h.fetcher.insert(
        "./lib/b.js",
        r#"[{"deps": ["lib/a"], "factory": {"value": 0}}]"#,
    );
    h.fetcher.insert(
        "./lib/c.js",
        r#"[{"deps": ["lib/b"], "factory": {"value": 0}}]"#,
    );

    let err = h.loader.require_sync("lib/c").unwrap_err();
    match &err {
        LoaderError::Dependency {
            module,
            chain,
            cause,
            ..
        } => {
            assert_eq!(module, "lib/c.js");
            assert_eq!(chain, &["lib/c.js".to_string(), "lib/b.js".to_string()]);
            // the stored cause is the innermost concrete error
            assert!(matches!(**cause, LoaderError::Fetch { status: Some(404), .. }));
        }
        other => panic!("expected a dependency error, got {other}"),
    }
    let rendered = err.to_string();
    assert!(rendered.contains("lib/c.js"));
    assert!(rendered.contains("lib/b.js"));
    assert!(rendered.contains("lib/a.js"));
}

#[test]
fn demotion_lets_blocking_caller_win() {
    let h = harness(LoaderConfig::default());
    h.fetcher.attach_ticks(h.loader.tick_queue());

    let runs = Rc::new(Cell::new(0));
    let counter = Rc::clone(&runs);
    h.evaluator.register("make-slow", move |args| {
        counter.set(counter.get() + 1);
        Ok(args[0].clone())
    });
    h.fetcher.insert(
        "./app/slow.js",
        r#"[{"deps": ["app/dep"], "factory": {"ref": "make-slow"}}]"#,
    );
    h.fetcher
        .insert("./app/dep.js", r#"[{"factory": {"value": 5}}]"#);

    h.loader
        .require(&["app/slow"], |_| {}, |err| panic!("unexpected: {err}"))
        .unwrap();
    // deliver only the module's own fetch; its dependency stays in flight
    h.loader.tick_queue().run_tick();
    assert_eq!(
        h.loader.module_state("app/slow"),
        Some(ModuleState::Executing)
    );

    // the blocking caller demotes the pending deferred execution and wins
    let value = h.loader.require_sync("app/slow").unwrap();
    assert_eq!(value, Value::Number(5.0));
    assert_eq!(runs.get(), 1);

    // late deferred completions are ignored, the factory never reruns
    h.loader.pump();
    assert_eq!(runs.get(), 1);
    assert_eq!(h.loader.module_state("app/slow"), Some(ModuleState::Ready));
}

#[test]
fn shim_dependencies_load_before_the_shimmed_module() {
    let mut config = LoaderConfig::default();
    config.shim.insert(
        "vendor/widgets".to_string(),
        gantry_loader::ShimConfig {
            deps: vec!["vendor/core".to_string()],
            exports: vec!["Widgets".to_string()],
            amd: false,
        },
    );
    let h = harness(config);

    let core_ran = Rc::new(Cell::new(false));
    let flag = Rc::clone(&core_ran);
    h.evaluator.register("make-core", move |_| {
        flag.set(true);
        Ok(Value::from("core"))
    });
    h.fetcher
        .insert("./vendor/core.js", r#"[{"factory": {"ref": "make-core"}}]"#);
    // the shimmed unit does not participate in the define mechanism
    h.fetcher.insert("./vendor/widgets.js", "[]");
    h.namespace.define("Widgets", Value::from("widgets"));

    let value = h.loader.require_sync("vendor/widgets").unwrap();
    assert_eq!(value, Value::from("widgets"));
    assert!(core_ran.get());
    assert_eq!(h.loader.module_state("vendor/core"), Some(ModuleState::Ready));
}

#[test]
fn unit_without_definitions_settles_with_undetermined_content() {
    let h = harness(LoaderConfig::default());
    h.fetcher.insert("./legacy/thing.js", "[]");
    h.namespace.define("legacy.thing", Value::from("from-global"));

    // the memoized content is the undetermined sentinel, surfaced as
    // undefined to callers
    assert_eq!(
        h.loader.require_sync("legacy/thing").unwrap(),
        Value::Undefined
    );
    // the probe falls back to the legacy global namespace
    assert_eq!(
        h.loader.probe("legacy/thing").unwrap(),
        Some(Value::from("from-global"))
    );
}

#[test]
fn lenient_policy_gives_second_anonymous_definition_a_synthetic_name() {
    let h = harness(LoaderConfig::default());
    h.fetcher.insert(
        "./app/two.js",
        r#"[{"factory": {"value": 1}}, {"factory": {"value": 2}}]"#,
    );

    assert_eq!(h.loader.require_sync("app/two").unwrap(), Value::Number(1.0));
    let synthetic: Vec<String> = h
        .loader
        .module_names()
        .into_iter()
        .filter(|name| name.starts_with("~anonymous-"))
        .collect();
    assert_eq!(synthetic.len(), 1);
}

#[test]
fn strict_policy_fails_on_ambiguous_definitions() {
    let mut config = LoaderConfig::default();
    config.strict_definitions = true;
    let h = harness(config);
    h.fetcher.insert(
        "./app/two.js",
        r#"[{"factory": {"value": 1}}, {"factory": {"value": 2}}]"#,
    );

    let err = h.loader.require_sync("app/two").unwrap_err();
    assert!(matches!(err, LoaderError::Declaration { .. }));
    assert_eq!(h.loader.module_state("app/two"), Some(ModuleState::Failed));
}

#[test]
fn preload_registers_without_fetching_and_honors_skip_policy() {
    let mut config = LoaderConfig::default();
    config.skip_preload.push("app/debugme".to_string());
    let h = harness(config);

    h.loader
        .preload(
            [
                (
                    "app/a".to_string(),
                    r#"[{"factory": {"value": "preloaded"}}]"#.to_string(),
                ),
                (
                    "app/debugme".to_string(),
                    r#"[{"factory": {"value": "never used"}}]"#.to_string(),
                ),
            ],
            "app/preload",
            None,
        )
        .unwrap();

    assert_eq!(h.loader.module_state("app/a"), Some(ModuleState::Preloaded));
    assert_eq!(h.loader.module_state("app/debugme"), None);

    assert_eq!(
        h.loader.require_sync("app/a").unwrap(),
        Value::from("preloaded")
    );
    assert_eq!(h.fetcher.request_count("./app/a.js"), 0);

    // the skipped module is fetched individually
    h.fetcher.insert(
        "./app/debugme.js",
        r#"[{"factory": {"value": "fetched"}}]"#,
    );
    assert_eq!(
        h.loader.require_sync("app/debugme").unwrap(),
        Value::from("fetched")
    );
    assert_eq!(h.fetcher.request_count("./app/debugme.js"), 1);
}

#[test]
fn evict_removes_only_unexecuted_records() {
    let h = harness(LoaderConfig::default());
    h.loader
        .preload(
            [
                (
                    "app/a".to_string(),
                    r#"[{"factory": {"value": 1}}]"#.to_string(),
                ),
                (
                    "app/b".to_string(),
                    r#"[{"factory": {"value": 2}}]"#.to_string(),
                ),
            ],
            "app/preload",
            None,
        )
        .unwrap();

    // executing one member settles it; eviction must leave it alone
    h.loader.require_sync("app/a").unwrap();

    assert_eq!(h.loader.evict("app/preload"), 1);
    assert_eq!(h.loader.module_state("app/b"), None);
    assert_eq!(h.loader.module_state("app/a"), Some(ModuleState::Ready));

    // the evicted module is fetched individually afterwards
    h.fetcher
        .insert("./app/b.js", r#"[{"factory": {"value": 3}}]"#);
    assert_eq!(h.loader.require_sync("app/b").unwrap(), Value::Number(3.0));
}

#[test]
fn dependency_hints_prefetch_before_the_unit_arrives() {
    let mut config = LoaderConfig::default();
    config
        .dep_cache
        .insert("app/main".to_string(), vec!["app/helper".to_string()]);
    let h = harness(config);
    h.fetcher.attach_ticks(h.loader.tick_queue());

    h.evaluator
        .register("main", |args| Ok(args[0].clone()));
    h.fetcher.insert(
        "./app/main.js",
        r#"[{"deps": ["app/helper"], "factory": {"ref": "main"}}]"#,
    );
    h.fetcher
        .insert("./app/helper.js", r#"[{"factory": {"value": 7}}]"#);

    let done = Rc::new(Cell::new(false));
    let flag = Rc::clone(&done);
    h.loader
        .require(
            &["app/main"],
            move |values| {
                assert_eq!(values, vec![Value::Number(7.0)]);
                flag.set(true);
            },
            |err| panic!("unexpected: {err}"),
        )
        .unwrap();
    // the hint started the helper's load alongside the module's own fetch
    assert_eq!(h.fetcher.request_count("./app/helper.js"), 1);
    h.loader.pump();

    assert!(done.get());
    // the declared dependency reused the prefetched load
    assert_eq!(h.fetcher.request_count("./app/helper.js"), 1);
}

#[test]
fn alias_contexts_redirect_requests() {
    let mut config = LoaderConfig::default();
    let mut wildcard = std::collections::BTreeMap::new();
    wildcard.insert("legacy/util".to_string(), "app/util".to_string());
    config.map.insert("*".to_string(), wildcard);
    let h = harness(config);
    h.fetcher
        .insert("./app/util.js", r#"[{"factory": {"value": "util"}}]"#);

    assert_eq!(
        h.loader.require_sync("legacy/util").unwrap(),
        Value::from("util")
    );
    assert!(h.loader.module_names().contains(&"app/util.js".to_string()));
    assert!(!h.loader.module_names().contains(&"legacy/util.js".to_string()));
}

#[test]
fn exported_content_lands_in_the_global_namespace() {
    let h = harness(LoaderConfig::default());
    h.fetcher.insert(
        "./app/pi.js",
        r#"[{"name": "app/pi", "factory": {"value": 3.14}, "export": true}]"#,
    );

    h.loader.require_sync("app/pi").unwrap();
    assert_eq!(h.namespace.get("app.pi"), Some(Value::Number(3.14)));
}

#[test]
fn populated_exports_handle_wins_over_the_return_value() {
    let h = harness(LoaderConfig::default());
    h.evaluator.register("use-exports", |args| {
        let exports = args[0].as_object().expect("exports handle").clone();
        exports
            .borrow_mut()
            .insert("answer".to_string(), Value::Number(42.0));
        Ok(Value::Undefined)
    });
    h.fetcher.insert(
        "./app/state.js",
        r#"[{"deps": ["exports"], "factory": {"ref": "use-exports"}}]"#,
    );

    let value = h.loader.require_sync("app/state").unwrap();
    let object = value.as_object().expect("object content").borrow().clone();
    assert_eq!(object.get("answer"), Some(&Value::Number(42.0)));
}

#[test]
fn module_handle_exposes_id_and_url() {
    let h = harness(LoaderConfig::default());
    h.evaluator.register("use-module", |args| {
        let handle = args[0].as_object().expect("module handle").borrow().clone();
        assert_eq!(handle.get("id"), Some(&Value::from("app/meta.js")));
        assert_eq!(handle.get("url"), Some(&Value::from("./app/meta.js")));
        Ok(handle.get("id").cloned().unwrap_or(Value::Undefined))
    });
    h.fetcher.insert(
        "./app/meta.js",
        r#"[{"deps": ["module"], "factory": {"ref": "use-module"}}]"#,
    );

    assert_eq!(
        h.loader.require_sync("app/meta").unwrap(),
        Value::from("app/meta.js")
    );
}

#[test]
fn scoped_require_probes_relative_names() {
    let h = harness(LoaderConfig::default());
    h.evaluator.register("probing", |args| {
        let require = args[0].as_function().expect("scoped require").clone();
        // the sibling is already resolved; the probe sees its value
        let probed = require(&[Value::from("./first")])?;
        assert_eq!(probed, Value::from("first"));
        // probing something unknown yields undefined without loading it
        let missing = require(&[Value::from("./unknown")])?;
        assert_eq!(missing, Value::Undefined);
        Ok(probed)
    });
    h.fetcher.insert(
        "./app/probe.js",
        r#"[{"deps": ["require", "app/first"], "factory": {"ref": "probing"}}]"#,
    );
    h.fetcher
        .insert("./app/first.js", r#"[{"factory": {"value": "first"}}]"#);

    assert_eq!(
        h.loader.require_sync("app/probe").unwrap(),
        Value::from("first")
    );
    assert_eq!(h.fetcher.request_count("./app/unknown.js"), 0);
}

#[test]
fn debug_variant_is_tried_first_and_falls_back() {
    let mut config = LoaderConfig::default();
    config.debug_sources = true;
    let h = harness(config);
    // only the regular source exists; the -dbg variant 404s
    h.fetcher
        .insert("./app/main.js", r#"[{"factory": {"value": "regular"}}]"#);

    assert_eq!(
        h.loader.require_sync("app/main").unwrap(),
        Value::from("regular")
    );
    assert_eq!(h.fetcher.request_count("./app/main-dbg.js"), 1);
    assert_eq!(h.fetcher.request_count("./app/main.js"), 1);

    // a module that does have a debug variant never fetches the regular URL
    h.fetcher
        .insert("./app/other-dbg.js", r#"[{"factory": {"value": "debug"}}]"#);
    assert_eq!(
        h.loader.require_sync("app/other").unwrap(),
        Value::from("debug")
    );
    assert_eq!(h.fetcher.request_count("./app/other.js"), 0);
}

#[test]
fn require_callbacks_are_paced_by_the_scheduler() {
    let mut config = LoaderConfig::default();
    config.tick_budget_ms = 0;
    let h = harness(config);
    h.loader
        .define(Definition::value(1).named("app/one"))
        .unwrap();
    h.loader
        .define(Definition::value(2).named("app/two"))
        .unwrap();
    h.loader.pump();

    let hits = Rc::new(Cell::new(0));
    for name in ["app/one", "app/two", "app/one"] {
        let hits = Rc::clone(&hits);
        h.loader
            .require(
                &[name],
                move |_| hits.set(hits.get() + 1),
                |err| panic!("unexpected: {err}"),
            )
            .unwrap();
    }
    // callbacks never run on the caller's stack
    assert_eq!(hits.get(), 0);
    h.loader.pump();
    assert_eq!(hits.get(), 3);
}

#[test]
fn resolution_errors_raise_synchronously_even_in_deferred_mode() {
    let h = harness(LoaderConfig::default());
    let err = h
        .loader
        .require(&["../escape"], |_| {}, |_| {})
        .unwrap_err();
    assert!(matches!(err, LoaderError::Resolution { .. }));

    let err = h.loader.require_sync("app/styles.css").unwrap_err();
    assert!(matches!(err, LoaderError::Resolution { .. }));
}

#[test]
fn bundle_request_settles_via_alias_of_first_member() {
    let mut config = LoaderConfig::default();
    config
        .bundles
        .insert("app/bundle".to_string(), vec!["app/x".to_string()]);
    let h = harness(config);
    h.fetcher.insert(
        "./app/bundle.js",
        r#"[{"name": "app/x", "factory": {"value": "x"}}]"#,
    );

    // requesting the bundle itself: nothing defines under its name, so the
    // first defined module is treated as an alias of the request
    assert_eq!(
        h.loader.require_sync("app/bundle").unwrap(),
        Value::from("x")
    );
    assert_eq!(h.loader.module_state("app/x"), Some(ModuleState::Ready));
}
