// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Resource fetching
//!
//! Fetching module code is an external collaborator concern, keyed by a
//! resolved URL. The loader interprets the transport status itself (2xx is
//! success); fetchers only signal transport-level failures as errors.

use crate::error::{LoaderError, Result};
use crate::runtime::ticks::TickQueue;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{debug, trace};
use url::Url;

/// Result of fetching a resource: transport status and body text
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Transport status code
    pub status: u16,
    /// Body text
    pub text: String,
}

/// Completion callback for a deferred fetch
pub type FetchCallback = Box<dyn FnOnce(Result<FetchResponse>)>;

/// Retrieves module code by resolved URL
pub trait ResourceFetcher {
    /// Blocking fetch: returns the response or a transport error
    fn fetch_sync(&self, url: &str) -> Result<FetchResponse>;

    /// Non-blocking fetch: invokes `done` with the response or transport
    /// error. The default implementation completes on the caller's stack.
    fn fetch_deferred(&self, url: &str, done: FetchCallback) {
        done(self.fetch_sync(url));
    }
}

/// Programmable in-memory fetcher.
///
/// Serves registered unit texts, counts requests per URL, and can deliver
/// deferred completions through a tick queue so that deferred loads suspend
/// realistically instead of completing on the caller's stack.
pub struct MemoryFetcher {
    units: RefCell<BTreeMap<String, String>>,
    requests: RefCell<BTreeMap<String, usize>>,
    ticks: RefCell<Option<Rc<TickQueue>>>,
}

impl MemoryFetcher {
    /// Create an empty fetcher
    pub fn new() -> Self {
        Self {
            units: RefCell::new(BTreeMap::new()),
            requests: RefCell::new(BTreeMap::new()),
            ticks: RefCell::new(None),
        }
    }

    /// Deliver deferred completions through the given tick queue
    pub fn attach_ticks(&self, ticks: Rc<TickQueue>) {
        *self.ticks.borrow_mut() = Some(ticks);
    }

    /// Register the unit text served for a URL
    pub fn insert(&self, url: impl Into<String>, text: impl Into<String>) {
        self.units.borrow_mut().insert(url.into(), text.into());
    }

    /// Number of fetches issued for a URL so far
    pub fn request_count(&self, url: &str) -> usize {
        self.requests.borrow().get(url).copied().unwrap_or(0)
    }

    fn lookup(&self, url: &str) -> FetchResponse {
        *self
            .requests
            .borrow_mut()
            .entry(url.to_string())
            .or_insert(0) += 1;
        match self.units.borrow().get(url) {
            Some(text) => FetchResponse {
                status: 200,
                text: text.clone(),
            },
            None => {
                trace!(url, "no unit registered");
                FetchResponse {
                    status: 404,
                    text: String::new(),
                }
            }
        }
    }
}

impl Default for MemoryFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceFetcher for MemoryFetcher {
    fn fetch_sync(&self, url: &str) -> Result<FetchResponse> {
        Ok(self.lookup(url))
    }

    fn fetch_deferred(&self, url: &str, done: FetchCallback) {
        let response = self.lookup(url);
        let ticks = self.ticks.borrow().clone();
        match ticks {
            Some(ticks) => ticks.enqueue(Box::new(move || done(Ok(response)))),
            None => done(Ok(response)),
        }
    }
}

/// Serves resources from a directory: the URL's path is resolved beneath
/// the root. A missing file maps to status 404; other I/O failures are
/// transport errors.
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    /// Create a fetcher rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn local_path(&self, url: &str) -> PathBuf {
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => url.to_string(),
        };
        self.root.join(path.trim_start_matches("./").trim_start_matches('/'))
    }
}

impl ResourceFetcher for DirectoryFetcher {
    fn fetch_sync(&self, url: &str) -> Result<FetchResponse> {
        let path = self.local_path(url);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(FetchResponse { status: 200, text }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(url, path = %path.display(), "resource not found");
                Ok(FetchResponse {
                    status: 404,
                    text: String::new(),
                })
            }
            Err(error) => Err(LoaderError::fetch(url, None, error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_fetcher_counts_requests() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("https://cdn/a.js", "[]");

        let first = fetcher.fetch_sync("https://cdn/a.js").unwrap();
        assert_eq!(first.status, 200);
        assert_eq!(first.text, "[]");
        fetcher.fetch_sync("https://cdn/a.js").unwrap();
        assert_eq!(fetcher.request_count("https://cdn/a.js"), 2);

        let missing = fetcher.fetch_sync("https://cdn/missing.js").unwrap();
        assert_eq!(missing.status, 404);
    }

    #[test]
    fn test_memory_fetcher_delivers_through_ticks() {
        let ticks = Rc::new(TickQueue::new());
        let fetcher = MemoryFetcher::new();
        fetcher.attach_ticks(Rc::clone(&ticks));
        fetcher.insert("https://cdn/a.js", "[]");

        let seen = Rc::new(RefCell::new(None));
        let seen2 = Rc::clone(&seen);
        fetcher.fetch_deferred(
            "https://cdn/a.js",
            Box::new(move |result| {
                *seen2.borrow_mut() = Some(result.unwrap().status);
            }),
        );
        // nothing delivered until the tick runs
        assert_eq!(*seen.borrow(), None);
        ticks.run_tick();
        assert_eq!(*seen.borrow(), Some(200));
    }

    #[test]
    fn test_directory_fetcher_reads_beneath_root() {
        let dir = tempfile::tempdir().unwrap();
        let module_dir = dir.path().join("app");
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join("main.js"), "[]").unwrap();

        let fetcher = DirectoryFetcher::new(dir.path());
        let hit = fetcher
            .fetch_sync("https://example.test/app/main.js")
            .unwrap();
        assert_eq!(hit.status, 200);
        assert_eq!(hit.text, "[]");

        let miss = fetcher
            .fetch_sync("https://example.test/app/other.js")
            .unwrap();
        assert_eq!(miss.status, 404);
    }

    #[test]
    fn test_directory_fetcher_accepts_relative_urls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.js"), "[]").unwrap();

        let fetcher = DirectoryFetcher::new(dir.path());
        assert_eq!(fetcher.fetch_sync("./main.js").unwrap().status, 200);
    }
}
