// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic.
//!
//! - [`crds`] - diffs synthesized CRDs against the cluster and applies the difference
//! - [`dispatch`] - forwards observed objects to the backing application, at most once per revision
//! - [`retry`] - exponential backoff for one-shot Kubernetes API calls

pub mod crds;
pub mod dispatch;
pub mod retry;

pub use crds::{CrdClient, CrdDiff, KubeCrdClient};
pub use dispatch::{BackendApi, DispatchLoop, DispatchOutcome, Dispatcher};
