// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2026 The Gantry Authors

//! Error types for the loader engine

use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors that can occur while resolving, loading or executing modules.
///
/// All variants are `Clone`: a module's failure is memoized on its record
/// and handed out again on every later request for the same module.
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// Malformed module name: relative navigation without a base, navigation
    /// above the root, or an unloadable resource type
    #[error("cannot resolve module name '{name}': {reason}")]
    Resolution {
        /// The offending module name
        name: String,
        /// Reason for failure
        reason: String,
    },

    /// Network or status failure retrieving a module's code
    #[error("failed to load '{url}': {reason}")]
    Fetch {
        /// The resolved URL that was requested
        url: String,
        /// Transport status, when one was received
        status: Option<u16>,
        /// Reason for failure
        reason: String,
    },

    /// A module's factory raised, or its unit could not be evaluated
    #[error("failed to execute module '{module}': {reason}")]
    Execution {
        /// The failing module id
        module: String,
        /// Reason for failure
        reason: String,
    },

    /// A transitive dependency failed.
    ///
    /// The message names every module along the failing chain; `cause`
    /// always holds the innermost concrete error (repeated identical
    /// wrapper templates are collapsed rather than nested).
    #[error("{message}")]
    Dependency {
        /// The module whose dependencies failed
        module: String,
        /// The module's resolved URL, when known
        url: Option<String>,
        /// Module ids along the failing chain, outermost first
        chain: Vec<String>,
        /// Rendered multi-level message
        message: String,
        /// The innermost concrete error
        #[source]
        cause: Box<LoaderError>,
    },

    /// Duplicate or ambiguous module definitions within one fetched unit
    #[error("invalid module definition for '{module}': {reason}")]
    Declaration {
        /// The module being defined when the conflict was detected
        module: String,
        /// Reason for failure
        reason: String,
    },
}

impl LoaderError {
    /// Create a name-resolution error
    pub fn resolution(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a fetch error
    pub fn fetch(url: impl Into<String>, status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            status,
            reason: reason.into(),
        }
    }

    /// Create an execution error
    pub fn execution(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Create a declaration error
    pub fn declaration(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Declaration {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a dependency failure of `module` around `inner`.
    ///
    /// When `inner` is itself a dependency failure the chains are merged and
    /// the innermost cause is kept, so wrapping the same template repeatedly
    /// never nests wrapper objects while the rendered message still names
    /// every module along the chain.
    pub fn dependency(module: impl Into<String>, url: Option<&str>, inner: LoaderError) -> Self {
        let module = module.into();
        let location = url.map(|u| format!(" ({u})")).unwrap_or_default();
        match inner {
            LoaderError::Dependency {
                chain,
                message,
                cause,
                ..
            } => {
                let mut merged = Vec::with_capacity(chain.len() + 1);
                merged.push(module.clone());
                merged.extend(chain);
                let message = format!("failed to resolve dependencies of '{module}'{location}: {message}");
                LoaderError::Dependency {
                    module,
                    url: url.map(str::to_owned),
                    chain: merged,
                    message,
                    cause,
                }
            }
            other => {
                let message = format!("failed to resolve dependencies of '{module}'{location}: {other}");
                LoaderError::Dependency {
                    module: module.clone(),
                    url: url.map(str::to_owned),
                    chain: vec![module],
                    message,
                    cause: Box::new(other),
                }
            }
        }
    }

    /// The innermost concrete error behind any dependency wrapping
    pub fn root_cause(&self) -> &LoaderError {
        match self {
            LoaderError::Dependency { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_wrapping_collapses_repeated_templates() {
        let root = LoaderError::fetch("https://cdn/a.js", Some(404), "unexpected status 404");
        let first = LoaderError::dependency("lib/b.js", Some("https://cdn/b.js"), root);
        let second = LoaderError::dependency("lib/c.js", Some("https://cdn/c.js"), first);

        // the stored cause is the innermost concrete error, not a wrapper
        assert!(matches!(
            second.root_cause(),
            LoaderError::Fetch { status: Some(404), .. }
        ));
        match &second {
            LoaderError::Dependency { chain, cause, .. } => {
                assert_eq!(chain, &["lib/c.js".to_string(), "lib/b.js".to_string()]);
                assert!(matches!(**cause, LoaderError::Fetch { .. }));
            }
            other => panic!("expected dependency error, got {other:?}"),
        }

        // the rendered message still names every hop
        let rendered = second.to_string();
        assert!(rendered.contains("lib/c.js"));
        assert!(rendered.contains("lib/b.js"));
        assert!(rendered.contains("https://cdn/a.js"));
    }

    #[test]
    fn test_resolution_error_display() {
        let err = LoaderError::resolution("../x.js", "relative name requires a requesting module");
        assert_eq!(
            err.to_string(),
            "cannot resolve module name '../x.js': relative name requires a requesting module"
        );
    }

    #[test]
    fn test_root_cause_of_plain_error_is_itself() {
        let err = LoaderError::execution("app/main.js", "factory failed");
        assert!(matches!(err.root_cause(), LoaderError::Execution { .. }));
    }
}
