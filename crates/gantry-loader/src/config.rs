// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Loader configuration
//!
//! Configuration is applied before or between resolutions, never
//! concurrently with one. [`LoaderConfig`] is the serde-friendly public
//! shape; the resolved state (URL prefixes against the base URL, inverted
//! bundle membership, canonical shim keys) lives in the crate-internal
//! `ConfigStore`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Per-module shim facts: extra dependencies and export hints for modules
/// that do not participate in the define mechanism directly
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShimConfig {
    /// Extra dependencies resolved before the module executes
    pub deps: Vec<String>,

    /// Legacy global name(s) holding the module's export value
    pub exports: Vec<String>,

    /// The module issues its own definitions (foreign-module protocol);
    /// those win over the global-name read
    pub amd: bool,
}

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoaderConfig {
    /// Base URL all relative URL prefixes resolve against
    pub base_url: Option<String>,

    /// Name prefix → URL prefix mappings (longest full-segment prefix wins)
    pub paths: BTreeMap<String, String>,

    /// Alias contexts: requesting-module prefix → (name prefix →
    /// replacement prefix); `"*"` is the wildcard fallback context
    pub map: BTreeMap<String, BTreeMap<String, String>>,

    /// Shim table, keyed by module name
    pub shim: BTreeMap<String, ShimConfig>,

    /// Bundle name → member module names
    pub bundles: BTreeMap<String, Vec<String>>,

    /// Known dependency names per module, used to opportunistically
    /// prefetch before they are formally requested
    pub dep_cache: BTreeMap<String, Vec<String>>,

    /// Try a `-dbg` variant URL first, falling back to the regular URL
    pub debug_sources: bool,

    /// Fail a module on ambiguous definitions instead of assigning a
    /// synthetic name and warning
    pub strict_definitions: bool,

    /// Disable writing exported content to the legacy global namespace
    pub suppress_global_exports: bool,

    /// Name prefixes excluded from bulk preloads; matching modules are
    /// fetched individually
    pub skip_preload: Vec<String>,

    /// Scheduler time budget per cooperative tick, in milliseconds.
    /// Negative disables throttling; zero forces one callback per tick.
    pub tick_budget_ms: i64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            paths: BTreeMap::new(),
            map: BTreeMap::new(),
            shim: BTreeMap::new(),
            bundles: BTreeMap::new(),
            dep_cache: BTreeMap::new(),
            debug_sources: false,
            strict_definitions: false,
            suppress_global_exports: false,
            skip_preload: Vec::new(),
            tick_budget_ms: -1,
        }
    }
}

impl LoaderConfig {
    /// Parse a configuration from its JSON representation
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Resolved configuration state owned by the loader context
pub(crate) struct ConfigStore {
    /// URL prefixes keyed by name prefix; the empty prefix always exists
    pub prefixes: BTreeMap<String, String>,
    /// Alias contexts, including the `"*"` wildcard
    pub contexts: BTreeMap<String, BTreeMap<String, String>>,
    /// Shim table keyed by canonical module id
    pub shims: BTreeMap<String, ShimConfig>,
    /// Member id → containing bundle id
    pub groups: BTreeMap<String, String>,
    /// Canonical id → raw dependency-name hints
    pub dep_cache: BTreeMap<String, Vec<String>>,
    pub debug_sources: bool,
    pub strict_definitions: bool,
    pub suppress_global_exports: bool,
    pub skip_preload: Vec<String>,
}

impl ConfigStore {
    pub fn new() -> Self {
        let mut prefixes = BTreeMap::new();
        prefixes.insert(String::new(), "./".to_string());
        Self {
            prefixes,
            contexts: BTreeMap::new(),
            shims: BTreeMap::new(),
            groups: BTreeMap::new(),
            dep_cache: BTreeMap::new(),
            debug_sources: false,
            strict_definitions: false,
            suppress_global_exports: false,
            skip_preload: Vec::new(),
        }
    }

    /// The URL prefix of the empty name prefix (the base URL)
    pub fn base_url(&self) -> &str {
        self.prefixes
            .get("")
            .map(String::as_str)
            .unwrap_or("./")
    }

    /// Register a name-prefix → URL-prefix mapping.
    ///
    /// The URL is resolved against the base URL when relative and stored
    /// with a trailing slash. An empty name prefix replaces the base URL.
    pub fn register_resource_path(&mut self, prefix: &str, url_prefix: &str) {
        let mut resolved = self.resolve_url(url_prefix);
        if !resolved.ends_with('/') {
            resolved.push('/');
        }
        self.prefixes
            .insert(prefix.trim_end_matches('/').to_string(), resolved);
    }

    /// Resolve a possibly-relative URL against the base URL
    pub fn resolve_url(&self, candidate: &str) -> String {
        if let Ok(parsed) = Url::parse(candidate) {
            return parsed.to_string();
        }
        if let Ok(base) = Url::parse(self.base_url()) {
            if let Ok(joined) = base.join(candidate) {
                return joined.to_string();
            }
        }
        candidate.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json_with_defaults() {
        let config = LoaderConfig::from_json(
            r#"{
                "baseUrl": "https://cdn.example.test/resources/",
                "paths": {"app": "https://cdn.example.test/app/"},
                "shim": {"vendor/widgets": {"deps": ["vendor/core"], "exports": ["Widgets"]}},
                "bundles": {"app/library-preload": ["app/a", "app/b"]},
                "tickBudgetMs": 4
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.base_url.as_deref(),
            Some("https://cdn.example.test/resources/")
        );
        assert_eq!(config.shim["vendor/widgets"].deps, vec!["vendor/core"]);
        assert!(!config.shim["vendor/widgets"].amd);
        assert_eq!(config.bundles["app/library-preload"].len(), 2);
        assert_eq!(config.tick_budget_ms, 4);
        // untouched fields keep their defaults
        assert!(!config.debug_sources);
        assert!(config.skip_preload.is_empty());
    }

    #[test]
    fn test_register_resource_path_normalizes_trailing_slash() {
        let mut store = ConfigStore::new();
        store.register_resource_path("app", "https://cdn/x");
        assert_eq!(store.prefixes["app"], "https://cdn/x/");
    }

    #[test]
    fn test_relative_prefix_resolves_against_base() {
        let mut store = ConfigStore::new();
        store.register_resource_path("", "https://cdn.example.test/resources/");
        store.register_resource_path("app", "my/app/");
        assert_eq!(
            store.prefixes["app"],
            "https://cdn.example.test/resources/my/app/"
        );
    }
}
