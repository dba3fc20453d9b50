// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CRD reconciliation: diff the synthesized definitions against the cluster and apply.
//!
//! Identity is the CRD's long name; equality is the content hash. A CRD present on both
//! sides with the same hash is left alone, so re-synthesizing an unchanged OpenAPI document
//! produces no cluster writes.

use crate::constants::KUBE_LIST_PAGE_SIZE;
use crate::crd::CrdDescriptor;
use crate::labels::LABEL_GROUP;
use crate::metrics;
use crate::reconcilers::retry::retry_api_call;
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Partition of incoming and existing CRDs.
#[derive(Debug, Clone, Default)]
pub struct CrdDiff {
    /// Incoming, absent from the cluster
    pub new: Vec<CrdDescriptor>,
    /// Incoming, present with a different hash
    pub updated: Vec<CrdDescriptor>,
    /// Existing, absent from the incoming set
    pub removed: Vec<CrdDescriptor>,
    /// Incoming, present with the same hash
    pub unchanged: Vec<CrdDescriptor>,
}

impl CrdDiff {
    /// `true` when applying the diff writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Compute the diff between what the cluster has and what was synthesized.
///
/// Every incoming CRD lands in exactly one of `new`, `updated` or `unchanged`; every
/// existing CRD without an incoming counterpart lands in `removed`.
#[must_use]
pub fn diff(existing: &[CrdDescriptor], incoming: &[CrdDescriptor]) -> CrdDiff {
    let existing_by_name: HashMap<String, &CrdDescriptor> =
        existing.iter().map(|c| (c.long_name(), c)).collect();
    let incoming_names: Vec<String> = incoming.iter().map(CrdDescriptor::long_name).collect();

    let mut out = CrdDiff::default();

    for (crd, long_name) in incoming.iter().zip(&incoming_names) {
        match existing_by_name.get(long_name) {
            None => out.new.push(crd.clone()),
            Some(current) if current.content_hash == crd.content_hash => {
                out.unchanged.push(crd.clone());
            }
            Some(_) => out.updated.push(crd.clone()),
        }
    }

    out.removed = existing
        .iter()
        .filter(|c| !incoming_names.contains(&c.long_name()))
        .cloned()
        .collect();

    out
}

/// Cluster operations the reconciler needs on `CustomResourceDefinition` objects.
#[async_trait]
pub trait CrdClient: Send + Sync {
    /// CRDs carrying the operator's group label for `group`.
    async fn list_managed(&self, group: &str) -> Result<Vec<CrdDescriptor>>;

    async fn create(&self, crd: &CrdDescriptor) -> Result<()>;

    /// Replace an existing CRD, carrying over its current `resourceVersion`.
    async fn replace(&self, crd: &CrdDescriptor) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;
}

/// [`CrdClient`] backed by the Kubernetes API.
pub struct KubeCrdClient {
    api: Api<CustomResourceDefinition>,
}

impl KubeCrdClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl CrdClient for KubeCrdClient {
    async fn list_managed(&self, group: &str) -> Result<Vec<CrdDescriptor>> {
        let mut params = ListParams::default()
            .labels(&format!("{LABEL_GROUP}={group}"))
            .limit(KUBE_LIST_PAGE_SIZE);

        let mut all = Vec::new();
        loop {
            let page =
                retry_api_call(|| async { self.api.list(&params).await }, "list managed CRDs")
                    .await?;
            all.extend(page.items.iter().map(CrdDescriptor::from_cluster));

            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => params.continue_token = Some(token),
                _ => break,
            }
        }

        debug!(group = %group, count = all.len(), "Listed managed CRDs");
        Ok(all)
    }

    async fn create(&self, crd: &CrdDescriptor) -> Result<()> {
        let object = crd.to_custom_resource_definition()?;
        let params = PostParams::default();
        retry_api_call(
            || async { self.api.create(&params, &object).await },
            &format!("create CRD {}", crd.name()),
        )
        .await?;
        Ok(())
    }

    async fn replace(&self, crd: &CrdDescriptor) -> Result<()> {
        let name = crd.name();
        let current = retry_api_call(
            || async { self.api.get(&name).await },
            &format!("get CRD {name}"),
        )
        .await?;

        let mut object = crd.to_custom_resource_definition()?;
        object.metadata.resource_version = current.metadata.resource_version;

        let params = PostParams::default();
        retry_api_call(
            || async { self.api.replace(&name, &params, &object).await },
            &format!("replace CRD {name}"),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let params = DeleteParams::default();
        retry_api_call(
            || async { self.api.delete(name, &params).await },
            &format!("delete CRD {name}"),
        )
        .await?;
        Ok(())
    }
}

/// Apply `diff` through `client`.
///
/// Removed CRDs are only deleted when `delete_removed` is set; deleting a CRD deletes every
/// object of its kind.
///
/// # Errors
///
/// Returns the first failing cluster call.
pub async fn apply(client: &dyn CrdClient, diff: &CrdDiff, delete_removed: bool) -> Result<()> {
    for crd in &diff.unchanged {
        debug!(crd = %crd.name(), "CRD unchanged");
        metrics::record_crd_change("unchanged");
    }

    for crd in &diff.new {
        info!(crd = %crd.name(), hash = %crd.content_hash, "Creating CRD");
        client.create(crd).await?;
        metrics::record_crd_change("new");
    }

    for crd in &diff.updated {
        info!(crd = %crd.name(), hash = %crd.content_hash, "Replacing CRD");
        client.replace(crd).await?;
        metrics::record_crd_change("updated");
    }

    for crd in &diff.removed {
        if delete_removed {
            info!(crd = %crd.name(), "Deleting CRD no longer declared by the backend");
            client.delete(&crd.name()).await?;
            metrics::record_crd_change("removed");
        } else {
            warn!(
                crd = %crd.name(),
                "CRD no longer declared by the backend, leaving it in place"
            );
        }
    }

    Ok(())
}

/// List the group's CRDs, diff them against `incoming` and apply the result.
///
/// # Errors
///
/// Returns an error if listing or any write fails.
pub async fn reconcile(
    client: &dyn CrdClient,
    group: &str,
    incoming: &[CrdDescriptor],
    delete_removed: bool,
) -> Result<CrdDiff> {
    let existing = client.list_managed(group).await?;
    let diff = diff(&existing, incoming);

    info!(
        group = %group,
        new = diff.new.len(),
        updated = diff.updated.len(),
        removed = diff.removed.len(),
        unchanged = diff.unchanged.len(),
        "Reconciling CRDs"
    );

    apply(client, &diff, delete_removed).await?;
    Ok(diff)
}

#[cfg(test)]
#[path = "crds_tests.rs"]
mod crds_tests;
