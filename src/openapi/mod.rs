// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reading the backing application's OpenAPI document: operator endpoint parsing,
//! structural-schema translation, known-kind resolution and CRD synthesis.

pub mod endpoint;
pub mod known_kind;
pub mod schema;
pub mod synthesizer;

pub use endpoint::ApiEndpoint;
pub use known_kind::{CollectionLookup, KubeCollectionLookup, LookupError};
pub use synthesizer::{parse_document, synthesize, Route, RouteTable, Synthesis};
