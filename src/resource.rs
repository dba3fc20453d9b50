// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Identity and object model for watched cluster objects.
//!
//! A [`ResourceObject`] is a snapshot of one object as delivered by a watch (or replayed from
//! the snapshot store). Its identity is [`ResourceObject::long_name`], which is stable across
//! revisions of the same logical object and is the key used by the queue, the dispatcher
//! ledger and the snapshot store.

use crate::constants::NO_GROUP_PLACEHOLDER;
use crate::errors::OperatorError;
use crate::labels::LABEL_EVENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Kind of change a watch event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Error,
    Bookmark,
}

impl EventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "Added",
            Self::Modified => "Modified",
            Self::Deleted => "Deleted",
            Self::Error => "Error",
            Self::Bookmark => "Bookmark",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `group/version`, or just `version` for the core group.
#[must_use]
pub fn api_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    }
}

/// Identity of a collection: `apiVersion/kind`.
#[must_use]
pub fn kind_long_name(group: &str, version: &str, kind: &str) -> String {
    format!("{}/{kind}", api_version(group, version))
}

/// Identity of one object: `apiVersion/kind/namespace/name`.
///
/// Cluster-scoped objects have an empty namespace segment.
#[must_use]
pub fn resource_long_name(api_version: &str, kind: &str, namespace: &str, name: &str) -> String {
    format!("{api_version}/{kind}/{namespace}/{name}")
}

/// One watched collection: `(group, version, plural)`.
///
/// The group is empty for the core API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchSubscription {
    pub group: String,
    pub version: String,
    pub plural: String,
}

impl WatchSubscription {
    /// Validate and normalize a subscription.
    ///
    /// A missing group, a blank group and the `-` placeholder all mean "no group".
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::MissingWatchParameter`] when `version` or `plural` is blank.
    pub fn new(group: Option<&str>, version: &str, plural: &str) -> Result<Self, OperatorError> {
        let version = version.trim();
        let plural = plural.trim();

        if version.is_empty() {
            return Err(OperatorError::MissingWatchParameter("version"));
        }
        if plural.is_empty() {
            return Err(OperatorError::MissingWatchParameter("plural"));
        }

        let group = match group.map(str::trim) {
            None | Some("") | Some(NO_GROUP_PLACEHOLDER) => String::new(),
            Some(g) => g.to_string(),
        };

        Ok(Self {
            group,
            version: version.to_string(),
            plural: plural.to_string(),
        })
    }

    /// Registry / routing key: `group/version/plural`.
    #[must_use]
    pub fn key(&self) -> String {
        kind_long_name(&self.group, &self.version, &self.plural)
    }

    #[must_use]
    pub fn api_version(&self) -> String {
        api_version(&self.group, &self.version)
    }

    /// Name under which the stream for this subscription is registered.
    #[must_use]
    pub fn task_name(&self) -> String {
        format!("{}:{}", crate::constants::STREAM_TASK_PREFIX, self.key())
    }
}

impl fmt::Display for WatchSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Snapshot of a watched cluster object.
///
/// The raw document is kept as-is, except for the in-memory event-type label stamped into
/// `metadata.labels`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceObject {
    event_type: EventType,
    data: Value,
    source: String,
}

impl ResourceObject {
    /// Wrap a raw document observed with `event_type`.
    #[must_use]
    pub fn new(event_type: EventType, data: Value) -> Self {
        let mut data = match data {
            Value::Object(_) => data,
            _ => Value::Object(Map::new()),
        };
        stamp_event_type(&mut data, event_type);

        Self {
            event_type,
            data,
            source: String::new(),
        }
    }

    /// Attach the key of the collection this object was observed on.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Key of the [`WatchSubscription`] that produced this object (empty if unknown).
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn api_version(&self) -> &str {
        self.data["apiVersion"].as_str().unwrap_or_default()
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        self.data["kind"].as_str().unwrap_or_default()
    }

    /// Namespace, or `""` for cluster-scoped objects.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.data["metadata"]["namespace"]
            .as_str()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.data["metadata"]["name"].as_str().unwrap_or_default()
    }

    /// Opaque revision token.
    #[must_use]
    pub fn resource_version(&self) -> &str {
        self.data["metadata"]["resourceVersion"]
            .as_str()
            .unwrap_or_default()
    }

    /// Identity key, stable across revisions of the same object.
    #[must_use]
    pub fn long_name(&self) -> String {
        resource_long_name(
            self.api_version(),
            self.kind(),
            self.namespace(),
            self.name(),
        )
    }

    /// Replace the payload with a newer revision of the same object.
    pub fn upgrade(&mut self, newer: ResourceObject) {
        debug_assert_eq!(self.long_name(), newer.long_name());
        self.event_type = newer.event_type;
        self.data = newer.data;
        if !newer.source.is_empty() {
            self.source = newer.source;
        }
    }
}

fn stamp_event_type(data: &mut Value, event_type: EventType) {
    let Some(root) = data.as_object_mut() else {
        return;
    };

    let metadata = root.entry("metadata").or_insert_with(|| json!({}));
    if !metadata.is_object() {
        *metadata = json!({});
    }

    if let Some(meta) = metadata.as_object_mut() {
        let labels = meta.entry("labels").or_insert_with(|| json!({}));
        if !labels.is_object() {
            *labels = json!({});
        }
        if let Some(labels) = labels.as_object_mut() {
            labels.insert(
                LABEL_EVENT_TYPE.to_string(),
                Value::String(event_type.to_string()),
            );
        }
    }
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod resource_tests;
