// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Name resolution
//!
//! Canonicalizes module identifiers: relative-segment resolution against
//! the requesting module, context-scoped alias mapping, longest-prefix URL
//! mapping, and the extension policy that turns public names into canonical
//! module ids.

use crate::config::ConfigStore;
use crate::error::{LoaderError, Result};
use std::collections::BTreeMap;
use tracing::trace;

/// Extensions a module id may carry
const EXECUTABLE_EXTENSIONS: &[&str] = &["js", "mjs"];

/// Known resource extensions that cannot be required as modules
const RESOURCE_EXTENSIONS: &[&str] = &[
    "css", "gif", "htm", "html", "json", "md", "png", "properties", "svg", "txt", "xml",
];

/// Whether `prefix` matches `name` on a full segment boundary.
///
/// The empty prefix matches everything; `"sap/m"` does not match
/// `"sap/main"`.
pub(crate) fn segment_prefix_matches(prefix: &str, name: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    name == prefix
        || (name.len() > prefix.len()
            && name.starts_with(prefix)
            && name.as_bytes()[prefix.len()] == b'/')
}

/// Whether `prefix` matches the module id `id`, ignoring the id's extension
pub(crate) fn matches_module(prefix: &str, id: &str) -> bool {
    segment_prefix_matches(prefix, id) || segment_prefix_matches(prefix, strip_extension(id))
}

/// The module id without its trailing extension
pub(crate) fn strip_extension(id: &str) -> &str {
    match id.rsplit_once('/') {
        Some((_, last)) => match last.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => &id[..id.len() - (last.len() - stem.len())],
            _ => id,
        },
        None => match id.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => id,
        },
    }
}

/// The dotted legacy global name derived from a module id
pub(crate) fn global_name(id: &str) -> String {
    strip_extension(id).replace('/', ".")
}

/// The `-dbg` variant of a module id, when it carries an extension
pub(crate) fn debug_variant(id: &str) -> Option<String> {
    let (stem, extension) = id.rsplit_once('.')?;
    Some(format!("{stem}-dbg.{extension}"))
}

/// Resolve `.` and `..` path segments in a module name.
///
/// A leading relative segment requires `base` (the requesting module's
/// name, whose final segment is dropped). Navigating above the root and
/// segments of three or more dots fail.
pub(crate) fn normalize(name: &str, base: Option<&str>) -> Result<String> {
    let relative =
        name.starts_with("./") || name.starts_with("../") || name == "." || name == "..";
    let mut segments: Vec<&str> = Vec::new();
    if relative {
        let base = base.ok_or_else(|| {
            LoaderError::resolution(name, "relative name requires a requesting module")
        })?;
        segments = base.split('/').collect();
        segments.pop();
    }
    for segment in name.split('/') {
        if segment.is_empty() {
            return Err(LoaderError::resolution(name, "empty name segment"));
        }
        match segment {
            "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(LoaderError::resolution(name, "navigation above root"));
                }
            }
            _ if segment.bytes().all(|b| b == b'.') => {
                return Err(LoaderError::resolution(
                    name,
                    format!("invalid segment '{segment}'"),
                ));
            }
            _ => segments.push(segment),
        }
    }
    if segments.is_empty() {
        return Err(LoaderError::resolution(name, "name resolves to nothing"));
    }
    Ok(segments.join("/"))
}

/// Normalize a name and apply alias contexts.
///
/// The most specific context matching the requesting module wins, then the
/// longest full-segment name prefix within it; the `"*"` context is the
/// ultimate fallback. Unmapped names come back normalized but otherwise
/// unchanged.
pub(crate) fn map_name(store: &ConfigStore, name: &str, requester: Option<&str>) -> Result<String> {
    let normalized = normalize(name, requester)?;

    let mut candidates: Vec<(&String, &BTreeMap<String, String>)> = store
        .contexts
        .iter()
        .filter(|(context, _)| {
            *context != "*"
                && requester
                    .map(|requesting| segment_prefix_matches(context, requesting))
                    .unwrap_or(false)
        })
        .collect();
    // most specific context first
    candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    let wildcard = store.contexts.get("*");

    for inner in candidates
        .iter()
        .map(|(_, inner)| *inner)
        .chain(wildcard.into_iter())
    {
        let mut best: Option<(&String, &String)> = None;
        for (prefix, replacement) in inner {
            if segment_prefix_matches(prefix, &normalized) {
                match &best {
                    Some((current, _)) if current.len() >= prefix.len() => {}
                    _ => best = Some((prefix, replacement)),
                }
            }
        }
        if let Some((prefix, replacement)) = best {
            let mapped = if normalized == **prefix {
                replacement.clone()
            } else {
                format!("{replacement}{}", &normalized[prefix.len()..])
            };
            trace!(from = %normalized, to = %mapped, "alias mapping applied");
            return Ok(mapped);
        }
    }
    Ok(normalized)
}

/// Project a name onto a URL via the longest matching URL prefix.
///
/// The empty prefix always exists as fallback. A trailing slash is
/// stripped before the optional suffix is appended.
pub(crate) fn resource_path(store: &ConfigStore, name: &str, suffix: Option<&str>) -> String {
    let mut best: Option<(&String, &String)> = None;
    for (prefix, url_prefix) in &store.prefixes {
        if segment_prefix_matches(prefix, name) {
            match &best {
                Some((current, _)) if current.len() >= prefix.len() => {}
                _ => best = Some((prefix, url_prefix)),
            }
        }
    }
    let Some((prefix, url_prefix)) = best else {
        return name.to_string();
    };
    let remainder = if prefix.is_empty() {
        name
    } else if name.len() > prefix.len() {
        &name[prefix.len() + 1..]
    } else {
        ""
    };
    let mut path = format!("{url_prefix}{remainder}");
    if path.ends_with('/') {
        path.pop();
    }
    if let Some(suffix) = suffix {
        path.push_str(suffix);
    }
    path
}

/// Map a public name to its canonical module id.
///
/// Names without an extension get `.js` appended; an unknown trailing
/// dot-suffix is not treated as an extension. Known non-executable resource
/// extensions are rejected.
pub(crate) fn canonical_id(
    store: &ConfigStore,
    name: &str,
    requester: Option<&str>,
) -> Result<String> {
    let mapped = map_name(store, name, requester)?;
    let last = mapped.rsplit('/').next().unwrap_or(&mapped);
    match last.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => {
            if EXECUTABLE_EXTENSIONS.contains(&extension) {
                Ok(mapped)
            } else if RESOURCE_EXTENSIONS.contains(&extension) {
                Err(LoaderError::resolution(
                    name,
                    format!("cannot load '.{extension}' resources as modules"),
                ))
            } else {
                Ok(format!("{mapped}.js"))
            }
        }
        _ => Ok(format!("{mapped}.js")),
    }
}
