// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Label and annotation keys shared by the synthesizer, the reconciler and the watch streams.
//!
//! The backing application's Service carries an annotation set describing how to reach and
//! introspect it. Synthesized CRDs carry a group label (used as the list selector) and a
//! content-hash annotation (used for cheap change detection).

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for `app.kubernetes.io/managed-by` on synthesized CRDs
pub const MANAGED_BY_APIBRIDGE: &str = "apibridge";

// ============================================================================
// Operator Label / Annotation Keys
// ============================================================================

/// Service annotation: `true` marks the Service as the backing application
pub const ANNOTATION_ENABLED: &str = "apibridge.io/enabled";

/// Service annotation: backend port
pub const ANNOTATION_PORT: &str = "apibridge.io/port";

/// Service annotation: `true` when the backend speaks HTTPS
pub const ANNOTATION_HTTPS: &str = "apibridge.io/https";

/// Service annotation: path of the OpenAPI document
pub const ANNOTATION_SPEC_PATH: &str = "apibridge.io/spec-path";

/// Service annotation: format of the OpenAPI document (`json` or `yaml`)
pub const ANNOTATION_SPEC_FORMAT: &str = "apibridge.io/spec-format";

/// Service annotation / CRD label: API group owned by the backend
pub const LABEL_GROUP: &str = "apibridge.io/group";

/// CRD annotation: hash of the canonical structural schema
pub const ANNOTATION_CONTENT_HASH: &str = "apibridge.io/hash";

/// In-memory-only label carrying the watch event type alongside an object.
///
/// Never written back to the cluster.
pub const LABEL_EVENT_TYPE: &str = "apibridge.io/event-type";
