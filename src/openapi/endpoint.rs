// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator endpoints declared by the backing application.
//!
//! An operator endpoint is an OpenAPI path of exactly five segments:
//!
//! ```text
//! /<group>/<version>/<kind>/<namespace>/<name>
//! ```
//!
//! - `group`: `.` for the configured default group, `-` for the core API, else a group name
//! - `version`: `v` followed by at least one character
//! - `kind`: the version followed by the kind's name, e.g. `v1widget`
//! - `namespace`: `{namespace}` for namespaced kinds, `-` for cluster-scoped kinds
//! - `name`: placeholder for the object name

use crate::constants::{
    CLUSTER_SCOPED_SEGMENT, DEFAULT_GROUP_SEGMENT, ENDPOINT_SEGMENT_COUNT, NAMESPACE_SEGMENT,
    NO_GROUP_PLACEHOLDER,
};
use crate::errors::OperatorError;
use reqwest::Method;

/// Path item keys that name an operation.
pub const OPERATION_KEYS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// One parsed operator endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    /// Path as declared, used to build forwarding URLs
    pub path: String,
    pub method: Method,
    /// `None` for the core API
    pub group: Option<String>,
    pub version: String,
    /// Lowercase kind, including its version prefix
    pub kind: String,
    pub namespaced: bool,
}

impl ApiEndpoint {
    /// Parse `path` declared under the operation `method`.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidEndpoint`] naming the broken rule.
    pub fn parse(path: &str, method: Method, default_group: &str) -> Result<Self, OperatorError> {
        let invalid = |reason: &str| OperatorError::InvalidEndpoint {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let lowered = path.trim().to_lowercase();
        let segments: Vec<&str> = lowered.trim_matches('/').split('/').map(str::trim).collect();

        if segments.len() != ENDPOINT_SEGMENT_COUNT {
            return Err(invalid("the path must have 5 segments separated by /"));
        }
        if let Some(index) = segments.iter().position(|s| s.is_empty()) {
            return Err(invalid(&format!("path segment {index} is empty")));
        }

        let group = match segments[0] {
            DEFAULT_GROUP_SEGMENT => Some(default_group.trim().to_lowercase()),
            NO_GROUP_PLACEHOLDER => None,
            other => Some(other.to_string()),
        };

        let version = segments[1];
        if !version.starts_with('v') {
            return Err(invalid("the version segment must start with 'v'"));
        }
        if version.len() == 1 {
            return Err(invalid("the version segment must be longer than 'v'"));
        }

        let kind = segments[2];
        if !kind.starts_with(version) {
            return Err(invalid("the kind segment must start with the version"));
        }
        if kind.len() == version.len() {
            return Err(invalid("the kind segment must have a name after the version"));
        }

        let namespaced = match segments[3] {
            NAMESPACE_SEGMENT => true,
            CLUSTER_SCOPED_SEGMENT => false,
            _ => {
                return Err(invalid(
                    "the namespace segment must be '{namespace}' or '-'",
                ))
            }
        };

        Ok(Self {
            path: path.trim().to_string(),
            method,
            group,
            version: version.to_string(),
            kind: kind.to_string(),
            namespaced,
        })
    }

    /// `true` when this endpoint belongs to `group`.
    #[must_use]
    pub fn is_in_group(&self, group: &str) -> bool {
        self.group
            .as_deref()
            .is_some_and(|g| g.eq_ignore_ascii_case(group))
    }

    /// Request path for one object: the namespace and name placeholders replaced, and a
    /// `.` group segment spelled out (clients collapse `/./` while normalizing URLs).
    #[must_use]
    pub fn request_path(&self, namespace: &str, name: &str) -> String {
        let segments: Vec<&str> = self.path.trim_matches('/').split('/').collect();
        let rendered: Vec<&str> = segments
            .iter()
            .copied()
            .enumerate()
            .map(|(index, segment)| match index {
                0 if segment.trim() == DEFAULT_GROUP_SEGMENT => {
                    self.group.as_deref().unwrap_or(segment)
                }
                3 if self.namespaced => namespace,
                4 => name,
                _ => segment,
            })
            .collect();
        format!("/{}", rendered.join("/"))
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod endpoint_tests;
