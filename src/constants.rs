// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the apibridge operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Kubernetes API Constants
// ============================================================================

/// API version of `CustomResourceDefinition` objects
pub const API_EXTENSIONS_V1: &str = "apiextensions.k8s.io/v1";

/// Kind name of `CustomResourceDefinition` objects
pub const KIND_CUSTOM_RESOURCE_DEFINITION: &str = "CustomResourceDefinition";

/// CRD scope value for cluster-wide kinds
pub const SCOPE_CLUSTER: &str = "Cluster";

/// CRD scope value for namespaced kinds
pub const SCOPE_NAMESPACED: &str = "Namespaced";

/// Page size used for the single-item lookup list call
pub const LOOKUP_LIST_LIMIT: u32 = 1;

/// Page size for paginated list calls (managed CRDs, annotated Services)
pub const KUBE_LIST_PAGE_SIZE: u32 = 100;

/// First delay before retrying a transient API error
pub const API_RETRY_FIRST_DELAY_MILLIS: u64 = 100;

/// Ceiling for a single retry delay
pub const API_RETRY_MAX_DELAY_SECS: u64 = 30;

/// Total time a single API call may spend retrying
pub const API_RETRY_BUDGET_SECS: u64 = 300;

/// Relative jitter applied to every retry delay (±10%)
pub const API_RETRY_JITTER: f64 = 0.1;

// ============================================================================
// Watch Stream Constants
// ============================================================================

/// Fixed delay before every reconnect attempt (2 seconds, no growth, no jitter)
pub const WATCH_RECONNECT_DELAY_MILLIS: u64 = 2000;

/// Resource version used to open a watch from "any recent state"
pub const WATCH_START_RESOURCE_VERSION: &str = "0";

/// How long `stop` waits for a stream to wind down before aborting it
pub const WATCH_STOP_GRACE_MILLIS: u64 = 5000;

/// Default period between backend resyncs
pub const BACKEND_RESYNC_INTERVAL_SECS: u64 = 300;

/// Placeholder group segment meaning "no group" (core API)
pub const NO_GROUP_PLACEHOLDER: &str = "-";

// ============================================================================
// OpenAPI Endpoint Constants
// ============================================================================

/// Number of `/`-separated segments an operator endpoint path must have
pub const ENDPOINT_SEGMENT_COUNT: usize = 5;

/// Group segment meaning "use the configured default group"
pub const DEFAULT_GROUP_SEGMENT: &str = ".";

/// Namespace segment for namespaced kinds
pub const NAMESPACE_SEGMENT: &str = "{namespace}";

/// Namespace segment for cluster-scoped kinds
pub const CLUSTER_SCOPED_SEGMENT: &str = "-";

/// Path of the backing application's health endpoint
pub const HEALTH_PATH: &str = "health";

/// Path of the backing application's group discovery endpoint
pub const METADATA_PATH: &str = "metadata";

/// Component schema names that describe platform types rather than application kinds
pub const RESERVED_SCHEMA_NAMES: &[&str] = &[
    "objectmeta",
    "v1objectmeta",
    "listmeta",
    "v1listmeta",
    "ownerreference",
    "v1ownerreference",
    "managedfieldsentry",
    "v1managedfieldsentry",
    "status",
    "v1status",
    "problemdetails",
    "validationproblemdetails",
];

/// Property names stripped from synthesized schemas (owned by the API server)
pub const SERVER_OWNED_PROPERTIES: &[&str] = &["apiVersion", "kind", "metadata"];

/// Maximum `$ref` nesting followed while translating a schema
pub const MAX_SCHEMA_DEPTH: usize = 32;

// ============================================================================
// Backend Constants
// ============================================================================

/// Poll interval while waiting for the backing application to become healthy
pub const BACKEND_HEALTH_POLL_MILLIS: u64 = 1000;

/// Default backing application port
pub const DEFAULT_BACKEND_PORT: u16 = 80;

/// Default path of the backing application's OpenAPI document
pub const DEFAULT_SPEC_PATH: &str = "swagger/v1/swagger.json";

/// Timeout for a single request to the backing application
pub const BACKEND_REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Task Registry Constants
// ============================================================================

/// Registry name of the queue dispatcher task
pub const DISPATCHER_TASK_NAME: &str = "dispatcher";

/// Registry name prefix of watch stream tasks
pub const STREAM_TASK_PREFIX: &str = "stream";

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Path for the liveness endpoint
pub const HEALTH_SERVER_PATH: &str = "/healthz";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
