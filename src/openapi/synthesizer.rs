// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CRD synthesis from the backing application's OpenAPI document.
//!
//! A component schema becomes a kind when the document declares both a `PUT` and a `DELETE`
//! operator endpoint whose kind segment equals the schema name (case-insensitively). Kinds
//! in the backend's own group become CRDs; kinds in any other group are references to
//! collections the cluster already serves and are resolved with a [`CollectionLookup`].
//!
//! Invalid endpoints, unpaired schemas and unresolvable kinds are skipped with a warning.

use crate::config::SpecFormat;
use crate::constants::{HEALTH_PATH, RESERVED_SCHEMA_NAMES};
use crate::crd::CrdDescriptor;
use crate::errors::OperatorError;
use crate::openapi::endpoint::{ApiEndpoint, OPERATION_KEYS};
use crate::openapi::known_kind::{resolve_known_kind, CollectionLookup};
use crate::openapi::schema::SchemaTranslator;
use crate::resource::WatchSubscription;
use anyhow::Result;
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// `PUT` / `DELETE` endpoints used to forward one collection's objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub put: ApiEndpoint,
    pub delete: ApiEndpoint,
}

/// Routes keyed by [`WatchSubscription::key`].
pub type RouteTable = BTreeMap<String, Route>;

/// Everything derived from one OpenAPI document.
#[derive(Debug, Clone, Default)]
pub struct Synthesis {
    /// CRDs in the backend's own group
    pub crds: Vec<CrdDescriptor>,
    /// Pre-existing collections the backend also handles
    pub known_kinds: Vec<WatchSubscription>,
    pub routes: RouteTable,
}

impl Synthesis {
    /// Every collection that needs a watch: synthesized kinds first, then known kinds.
    ///
    /// # Errors
    ///
    /// Returns an error if a CRD descriptor has no version.
    pub fn subscriptions(&self) -> Result<Vec<WatchSubscription>, OperatorError> {
        let mut subs = self
            .crds
            .iter()
            .map(CrdDescriptor::subscription)
            .collect::<Result<Vec<_>, _>>()?;
        subs.extend(self.known_kinds.iter().cloned());
        Ok(subs)
    }
}

/// Parse an OpenAPI document in `format`.
///
/// # Errors
///
/// Returns an error if `body` is not valid JSON / YAML.
pub fn parse_document(body: &str, format: SpecFormat) -> Result<Value, OperatorError> {
    Ok(match format {
        SpecFormat::Json => serde_json::from_str(body)?,
        SpecFormat::Yaml => serde_yaml::from_str(body)?,
    })
}

/// Derive CRDs, known kinds and forwarding routes from `document`.
///
/// # Errors
///
/// Returns [`OperatorError::InvalidSpec`] for a document that is not OpenAPI 3.x, or any
/// non-"not found" failure raised while probing a known kind.
pub async fn synthesize(
    document: &Value,
    default_group: &str,
    lookup: &dyn CollectionLookup,
) -> Result<Synthesis> {
    let openapi = document["openapi"].as_str().unwrap_or_default();
    if !openapi.starts_with("3.") {
        return Err(OperatorError::InvalidSpec(format!(
            "specification is not version 3 (openapi: '{openapi}')"
        ))
        .into());
    }

    let default_group = default_group.trim().to_lowercase();
    let endpoints = collect_endpoints(document, &default_group);
    let translator = SchemaTranslator::new(document);

    let mut schema_names: Vec<&String> = document["components"]["schemas"]
        .as_object()
        .map(|schemas| schemas.keys().collect())
        .unwrap_or_default();
    schema_names.sort();

    let mut synthesis = Synthesis::default();

    for name in schema_names {
        if RESERVED_SCHEMA_NAMES.contains(&name.to_lowercase().as_str()) {
            debug!(schema = %name, "Skipping platform schema");
            continue;
        }

        let Some(put) = single_endpoint(&endpoints, &Method::PUT, name) else {
            continue;
        };
        let Some(delete) = single_endpoint(&endpoints, &Method::DELETE, name) else {
            continue;
        };

        if put.namespaced != delete.namespaced {
            warn!(
                schema = %name,
                "PUT and DELETE endpoints must agree on the namespace segment, skipping"
            );
            continue;
        }

        if !put.is_in_group(&default_group) {
            match resolve_known_kind(lookup, put).await? {
                Some(subscription) => {
                    info!(schema = %name, collection = %subscription, "Known kind resolved");
                    synthesis.routes.insert(
                        subscription.key(),
                        Route {
                            put: put.clone(),
                            delete: delete.clone(),
                        },
                    );
                    synthesis.known_kinds.push(subscription);
                }
                None => warn!(
                    kind = %format!(
                        "{}/{}/{}",
                        put.group.as_deref().unwrap_or("-"),
                        put.version,
                        put.kind
                    ),
                    "Unknown resource kind, skipping"
                ),
            }
            continue;
        }

        let schema = translator.translate(&document["components"]["schemas"][name.as_str()]);
        let crd = CrdDescriptor::new(name, &default_group, put.namespaced, &put.version, schema);
        let key = crd.subscription()?.key();

        debug!(crd = %crd.name(), hash = %crd.content_hash, "Synthesized CRD");
        synthesis.routes.insert(
            key,
            Route {
                put: put.clone(),
                delete: delete.clone(),
            },
        );
        synthesis.crds.push(crd);
    }

    info!(
        crds = synthesis.crds.len(),
        known_kinds = synthesis.known_kinds.len(),
        "Synthesized definitions from OpenAPI document"
    );
    Ok(synthesis)
}

fn collect_endpoints(document: &Value, default_group: &str) -> Vec<ApiEndpoint> {
    let Some(paths) = document["paths"].as_object() else {
        return Vec::new();
    };

    let mut endpoints = Vec::new();
    for (path, item) in paths {
        if path.trim().trim_matches('/').eq_ignore_ascii_case(HEALTH_PATH) {
            continue;
        }
        let Some(item) = item.as_object() else {
            continue;
        };

        for key in OPERATION_KEYS.iter().filter(|k| item.contains_key(**k)) {
            let Ok(method) = Method::from_bytes(key.to_uppercase().as_bytes()) else {
                continue;
            };
            if method != Method::PUT && method != Method::DELETE {
                continue;
            }

            match ApiEndpoint::parse(path, method, default_group) {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(e) => warn!(error = %e, "Skipping endpoint"),
            }
        }
    }
    endpoints
}

fn single_endpoint<'a>(
    endpoints: &'a [ApiEndpoint],
    method: &Method,
    schema: &str,
) -> Option<&'a ApiEndpoint> {
    let mut matching = endpoints
        .iter()
        .filter(|e| e.method == *method && e.kind.eq_ignore_ascii_case(schema));
    let first = matching.next()?;
    if matching.next().is_some() {
        warn!(schema = %schema, method = %method, "More than one endpoint for schema, skipping");
        return None;
    }
    Some(first)
}

#[cfg(test)]
#[path = "synthesizer_tests.rs"]
mod synthesizer_tests;
