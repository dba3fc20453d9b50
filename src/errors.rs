// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the apibridge operator.
//!
//! Validation failures (bad endpoint paths, bad annotations, bad settings) are never retried.
//! Transport failures on a watch are handled by the reconnect loop and never surface here.

use thiserror::Error;

/// Errors raised by the operator's core components.
#[derive(Error, Debug)]
pub enum OperatorError {
    /// A task with the same name is already registered
    #[error("task '{0}' already exists")]
    DuplicateTask(String),

    /// No task with this name is registered
    #[error("task '{0}' does not exist")]
    TaskNotFound(String),

    /// A required watch parameter was empty
    #[error("watch parameter '{0}' is required")]
    MissingWatchParameter(&'static str),

    /// An OpenAPI path does not follow the `group/version/kind/namespace/name` layout
    #[error("path '{path}' skipped because {reason}")]
    InvalidEndpoint {
        /// The offending path
        path: String,
        /// Which rule the path broke
        reason: String,
    },

    /// A Service annotation carries a malformed value
    #[error("invalid {key} '{value}' ({reason})")]
    InvalidAnnotation {
        /// Annotation key
        key: &'static str,
        /// Raw annotation value
        value: String,
        /// Expected shape
        reason: &'static str,
    },

    /// The OpenAPI document could not be used
    #[error("invalid OpenAPI document: {0}")]
    InvalidSpec(String),

    /// Startup settings are invalid
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// The backing application answered with a non-success status
    #[error("backend returned HTTP {status} for {url}: {body}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Request URL
        url: String,
        /// Response body
        body: String,
    },

    /// No route is known for the object's collection
    #[error("no backend route for '{0}'")]
    NoRoute(String),

    /// Kubernetes API error
    #[error(transparent)]
    Kube(#[from] kube::Error),

    /// HTTP transport error
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OperatorError {
    /// `true` when the Kubernetes API refused the call with HTTP 403.
    ///
    /// A forbidden call at startup almost always means the operator's RBAC is incomplete.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 403)
    }
}

/// Walk an `anyhow` chain looking for a Kubernetes 403.
#[must_use]
pub fn is_forbidden(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(op) = cause.downcast_ref::<OperatorError>() {
            return op.is_forbidden();
        }
        matches!(cause.downcast_ref::<kube::Error>(), Some(kube::Error::Api(ae)) if ae.code == 403)
    })
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
