// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Synthesized Custom Resource Definitions.
//!
//! A [`CrdDescriptor`] is the operator's own record of one CRD it derived from the backend's
//! OpenAPI document. It converts to and from the cluster's
//! [`CustomResourceDefinition`] object; the cluster object is never subclassed or extended.
//!
//! # Example
//!
//! ```rust,no_run
//! use apibridge::crd::CrdDescriptor;
//! use serde_json::json;
//!
//! let crd = CrdDescriptor::new(
//!     "V1Widget",
//!     "example.com",
//!     true,
//!     "v1",
//!     json!({"type": "object", "properties": {"size": {"type": "integer"}}}),
//! );
//!
//! assert_eq!(crd.name(), "v1widget.example.com");
//! assert_eq!(crd.content_hash.len(), 64);
//! ```

use crate::constants::{
    API_EXTENSIONS_V1, KIND_CUSTOM_RESOURCE_DEFINITION, SCOPE_CLUSTER, SCOPE_NAMESPACED,
};
use crate::errors::OperatorError;
use crate::labels::{ANNOTATION_CONTENT_HASH, K8S_MANAGED_BY, LABEL_GROUP, MANAGED_BY_APIBRIDGE};
use crate::openapi::schema::content_hash;
use crate::resource::{resource_long_name, WatchSubscription};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
    CustomResourceDefinitionVersion, CustomResourceValidation, JSONSchemaProps,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Whether objects of a kind live in a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrdScope {
    Namespaced,
    Cluster,
}

impl CrdScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Namespaced => SCOPE_NAMESPACED,
            Self::Cluster => SCOPE_CLUSTER,
        }
    }

    fn parse(scope: &str) -> Self {
        if scope.eq_ignore_ascii_case(SCOPE_CLUSTER) {
            Self::Cluster
        } else {
            Self::Namespaced
        }
    }
}

/// One served version and its structural schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CrdVersion {
    pub name: String,
    pub schema: Value,
}

/// A CRD derived from the backend's OpenAPI document (or read back from the cluster).
#[derive(Debug, Clone, PartialEq)]
pub struct CrdDescriptor {
    pub kind: String,
    pub group: String,
    pub scope: CrdScope,
    pub plural: String,
    pub singular: String,
    pub versions: Vec<CrdVersion>,
    /// Hash of the canonical serialization of `versions`
    pub content_hash: String,
}

impl CrdDescriptor {
    /// Build a single-version descriptor. Plural and singular are the lowercased kind.
    #[must_use]
    pub fn new(kind: &str, group: &str, namespaced: bool, version: &str, schema: Value) -> Self {
        let versions = vec![CrdVersion {
            name: version.to_string(),
            schema,
        }];
        let content_hash = hash_versions(&versions);

        Self {
            kind: kind.to_string(),
            group: group.to_string(),
            scope: if namespaced {
                CrdScope::Namespaced
            } else {
                CrdScope::Cluster
            },
            plural: kind.to_lowercase(),
            singular: kind.to_lowercase(),
            versions,
            content_hash,
        }
    }

    /// Cluster name: `<plural>.<group>`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}.{}", self.plural, self.group)
    }

    /// Identity key, independent of schema content.
    #[must_use]
    pub fn long_name(&self) -> String {
        resource_long_name(
            API_EXTENSIONS_V1,
            KIND_CUSTOM_RESOURCE_DEFINITION,
            "",
            &self.name(),
        )
    }

    /// Collection to watch for instances of this kind (the first, storage, version).
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor has no version.
    pub fn subscription(&self) -> Result<WatchSubscription, OperatorError> {
        let version = self.versions.first().map(|v| v.name.as_str()).unwrap_or_default();
        WatchSubscription::new(Some(&self.group), version, &self.plural)
    }

    /// Render as a cluster object.
    ///
    /// # Errors
    ///
    /// Returns an error if a version schema does not deserialize as `JSONSchemaProps`.
    pub fn to_custom_resource_definition(&self) -> Result<CustomResourceDefinition, OperatorError> {
        let versions = self
            .versions
            .iter()
            .enumerate()
            .map(|(index, version)| -> Result<CustomResourceDefinitionVersion, OperatorError> {
                let schema: JSONSchemaProps = serde_json::from_value(version.schema.clone())?;
                Ok(CustomResourceDefinitionVersion {
                    name: version.name.clone(),
                    served: true,
                    storage: index == 0,
                    schema: Some(CustomResourceValidation {
                        open_api_v3_schema: Some(schema),
                    }),
                    ..Default::default()
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let labels = BTreeMap::from([
            (LABEL_GROUP.to_string(), self.group.clone()),
            (K8S_MANAGED_BY.to_string(), MANAGED_BY_APIBRIDGE.to_string()),
        ]);
        let annotations = BTreeMap::from([(
            ANNOTATION_CONTENT_HASH.to_string(),
            self.content_hash.clone(),
        )]);

        Ok(CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some(self.name()),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: CustomResourceDefinitionSpec {
                group: self.group.clone(),
                scope: self.scope.as_str().to_string(),
                names: CustomResourceDefinitionNames {
                    kind: self.kind.clone(),
                    plural: self.plural.clone(),
                    singular: Some(self.singular.clone()),
                    ..Default::default()
                },
                versions,
                ..Default::default()
            },
            status: None,
        })
    }

    /// Read a cluster CRD back. The content hash is taken from the hash annotation, so a
    /// CRD edited by hand (or created without one) compares as changed.
    #[must_use]
    pub fn from_cluster(crd: &CustomResourceDefinition) -> Self {
        let spec = &crd.spec;
        let versions = spec
            .versions
            .iter()
            .map(|v| CrdVersion {
                name: v.name.clone(),
                schema: v
                    .schema
                    .as_ref()
                    .and_then(|s| s.open_api_v3_schema.as_ref())
                    .and_then(|s| serde_json::to_value(s).ok())
                    .unwrap_or(Value::Null),
            })
            .collect();

        let content_hash = crd
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_CONTENT_HASH))
            .cloned()
            .unwrap_or_default();

        Self {
            kind: spec.names.kind.clone(),
            group: spec.group.clone(),
            scope: CrdScope::parse(&spec.scope),
            plural: spec.names.plural.clone(),
            singular: spec
                .names
                .singular
                .clone()
                .unwrap_or_else(|| spec.names.plural.clone()),
            versions,
            content_hash,
        }
    }
}

fn hash_versions(versions: &[CrdVersion]) -> String {
    let canonical: Vec<Value> = versions
        .iter()
        .map(|v| json!({ "name": v.name, "schema": v.schema }))
        .collect();
    content_hash(&Value::Array(canonical))
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
