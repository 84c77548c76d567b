// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! # gantry-loader
//!
//! A module dependency-resolution and loading engine: given a symbolic
//! module name, it determines a canonical identifier, fetches the module's
//! code if not already available, resolves and loads its declared
//! dependencies (recursively, breaking cycles), executes the module's
//! factory exactly once and memoizes the resulting export value.
//!
//! One name-resolution and state-tracking core serves two execution modes:
//!
//! - **Blocking**: synchronous resolution that may perform blocking
//!   fetches and re-enters the algorithm recursively on one stack
//! - **Deferred**: non-blocking resolution through deferreds and a
//!   cooperative tick queue the embedder drives
//!
//! Batch ("bundle") loading, bulk preloads and a task scheduler that
//! bounds synchronous work per tick sit on top of the same core.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use gantry_loader::{Definition, Loader, Value};
//!
//! let loader = Loader::builder().build()?;
//! loader.define(
//!     Definition::function(|_| Ok(Value::from("hello")))
//!         .named("app/greeting"),
//! )?;
//! loader.pump();
//! assert_eq!(loader.require_sync("app/greeting")?, Value::from("hello"));
//! ```
//!
//! ## Embedding
//!
//! The engine has no I/O of its own. Embedders inject a
//! [`ResourceFetcher`] (how module text is retrieved by URL), a
//! [`UnitEvaluator`] (how fetched text turns into `define` calls) and
//! optionally a [`GlobalNamespace`] (the dotted legacy namespace shimmed
//! modules interact with). Everything is single-threaded and cooperative;
//! there is no executor and no locking.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod evaluate;
pub mod fetch;
pub mod global;
pub mod loader;
pub mod runtime;
pub mod value;

// Re-exports
pub use config::{LoaderConfig, ShimConfig};
pub use error::{LoaderError, Result};
pub use evaluate::{JsonEvaluator, UnitEvaluator};
pub use fetch::{DirectoryFetcher, FetchCallback, FetchResponse, MemoryFetcher, ResourceFetcher};
pub use global::{GlobalNamespace, MapNamespace, NoopNamespace};
pub use loader::{Definition, Loader, LoaderBuilder, ModuleState};
pub use runtime::{TaskScheduler, TickQueue};
pub use value::{Factory, NativeFn, SharedArray, SharedObject, Value};

/// Version of the gantry loader engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
