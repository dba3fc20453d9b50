// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # apibridge - OpenAPI-to-CRD operator for Kubernetes
//!
//! apibridge reads the OpenAPI document of a backing application, turns the kinds it declares
//! into Custom Resource Definitions, watches every instance of those kinds (plus any
//! pre-existing kinds the application also handles), and forwards each change to the
//! application exactly once per revision.
//!
//! ## Modules
//!
//! - [`openapi`] - Operator endpoint parsing, schema translation and CRD synthesis
//! - [`crd`] - Synthesized CRD descriptors and their cluster representation
//! - [`reconcilers`] - CRD diff/apply, idempotent dispatch, API retry
//! - [`watch`] - Reconnecting watch streams, handlers, dedup queue, snapshots
//! - [`tasks`] - Named task registry with hierarchical cancellation
//! - [`backend`] - HTTP client for the backing application and its Service view
//! - [`operator`] - Startup sequence tying everything together
//!
//! ## Operator endpoints
//!
//! The backing application declares, for each kind it owns, a `PUT` and a `DELETE`
//! operation on a five-segment path:
//!
//! ```text
//! /<group>/<version>/<kind>/<namespace>/<name>
//! ```
//!
//! The schema of the same name becomes the CRD's structural schema.
//!
//! ## Example
//!
//! ```rust,no_run
//! use apibridge::openapi::ApiEndpoint;
//! use reqwest::Method;
//!
//! let endpoint =
//!     ApiEndpoint::parse("/./v1/v1widget/{namespace}/{name}", Method::PUT, "example.com")
//!         .unwrap();
//!
//! assert!(endpoint.namespaced);
//! assert_eq!(endpoint.request_path("ns", "w"), "/example.com/v1/v1widget/ns/w");
//! ```

pub mod backend;
pub mod config;
pub mod constants;
pub mod crd;
pub mod errors;
pub mod labels;
pub mod metrics;
pub mod openapi;
pub mod operator;
pub mod ordering;
pub mod reconcilers;
pub mod resource;
pub mod tasks;
pub mod watch;
