// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Resolution of endpoints that refer to kinds the cluster already serves.
//!
//! An endpoint outside the backend's own group names a pre-existing collection, such as
//! `/-/v1/v1configmap/{namespace}/{name}` for `ConfigMap`. The cluster's plural name is not
//! in the path, so it is found by probing a handful of spellings with a one-item list call.

use crate::constants::LOOKUP_LIST_LIMIT;
use crate::openapi::endpoint::ApiEndpoint;
use crate::resource::WatchSubscription;
use anyhow::Result;
use async_trait::async_trait;
use kube::api::{Api, ListParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use thiserror::Error;
use tracing::debug;

/// Outcome of a failed lookup.
#[derive(Error, Debug)]
pub enum LookupError {
    /// The collection does not exist; try the next spelling
    #[error("collection not found")]
    NotFound,

    /// Anything else aborts resolution
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Checks whether a collection exists.
#[async_trait]
pub trait CollectionLookup: Send + Sync {
    async fn lookup(&self, group: &str, version: &str, plural: &str) -> Result<(), LookupError>;
}

/// [`CollectionLookup`] that issues a cluster-wide list with `limit=1`.
#[derive(Clone)]
pub struct KubeCollectionLookup {
    client: Client,
}

impl KubeCollectionLookup {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CollectionLookup for KubeCollectionLookup {
    async fn lookup(&self, group: &str, version: &str, plural: &str) -> Result<(), LookupError> {
        let gvk = GroupVersionKind::gvk(group, version, plural);
        let resource = ApiResource::from_gvk_with_plural(&gvk, plural);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

        match api
            .list(&ListParams::default().limit(LOOKUP_LIST_LIMIT))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(LookupError::NotFound),
            Err(e) => Err(LookupError::Other(e.into())),
        }
    }
}

/// Spellings to try for `kind`, in priority order, without duplicates.
#[must_use]
pub fn candidate_plurals(version: &str, kind: &str) -> Vec<String> {
    let stripped = kind.strip_prefix(version).unwrap_or(kind);
    let ordered = [
        kind.to_string(),
        pluralize(stripped),
        singularize(stripped),
        pluralize(kind),
        singularize(kind),
    ];

    let mut out: Vec<String> = Vec::with_capacity(ordered.len());
    for candidate in ordered {
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

/// Resolve the cluster plural for a known-kind endpoint.
///
/// Returns `Ok(None)` when no spelling exists.
///
/// # Errors
///
/// Propagates any lookup failure other than "not found".
pub async fn resolve_known_kind(
    lookup: &dyn CollectionLookup,
    endpoint: &ApiEndpoint,
) -> Result<Option<WatchSubscription>> {
    let group = endpoint.group.as_deref().unwrap_or_default();

    for plural in candidate_plurals(&endpoint.version, &endpoint.kind) {
        match lookup.lookup(group, &endpoint.version, &plural).await {
            Ok(()) => {
                debug!(kind = %endpoint.kind, plural = %plural, "Resolved known kind");
                return Ok(Some(WatchSubscription::new(
                    endpoint.group.as_deref(),
                    &endpoint.version,
                    &plural,
                )?));
            }
            Err(LookupError::NotFound) => {
                debug!(kind = %endpoint.kind, plural = %plural, "Candidate plural not served");
            }
            Err(LookupError::Other(e)) => return Err(e),
        }
    }

    Ok(None)
}

fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|end| word.ends_with(end)) {
        return format!("{word}es");
    }
    if let Some(stem) = word.strip_suffix('y') {
        if stem.chars().last().is_some_and(|c| !is_vowel(c)) {
            return format!("{stem}ies");
        }
    }
    format!("{word}s")
}

fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for end in ["ses", "xes", "zes", "ches", "shes"] {
        if word.ends_with(end) {
            return word[..word.len() - 2].to_string();
        }
    }
    match word.strip_suffix('s') {
        Some(stem) if !word.ends_with("ss") => stem.to_string(),
        _ => word.to_string(),
    }
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

#[cfg(test)]
#[path = "known_kind_tests.rs"]
mod known_kind_tests;
