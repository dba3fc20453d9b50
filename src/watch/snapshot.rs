// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Last-seen copies of watched objects, one file per object.
//!
//! Files live under `<data-path>/<group>/<version>/<plural>/<namespace>/<name>`. On every
//! (re)connect the stream compares the files against a fresh list of the collection and
//! replays the missing objects as deletions, so deletes that happened while the watch was
//! down still reach the backend.

use crate::resource::WatchSubscription;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `:` is not portable in file names.
const COLON_ESCAPE: &str = "-c-o-l-o-n-";

/// File-per-object store for one watched collection.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `<data_path>/<subscription key>`.
    #[must_use]
    pub fn for_subscription(data_path: &Path, subscription: &WatchSubscription) -> Self {
        Self::new(data_path.join(escape(&subscription.key())))
    }

    /// Absolute path of the snapshot for `namespace/name`.
    #[must_use]
    pub fn path_for(&self, namespace: &str, name: &str) -> PathBuf {
        let relative = format!("{namespace}/{name}");
        self.root.join(escape(relative.trim_matches('/')))
    }

    /// Write (or overwrite) the snapshot of one object.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn write(&self, namespace: &str, name: &str, data: &Value) -> Result<()> {
        let path = self.path_for(namespace, name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let body = serde_json::to_vec(data)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("failed to write snapshot {}", path.display()))
    }

    /// Remove the snapshot of one object. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than "not found".
    pub async fn remove(&self, namespace: &str, name: &str) -> Result<()> {
        remove_file(&self.path_for(namespace, name)).await
    }

    /// Snapshot files whose object is not among `keep` (`(namespace, name)` pairs).
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be walked.
    pub async fn stale_except(&self, keep: &[(String, String)]) -> Result<Vec<PathBuf>> {
        let keep: HashSet<PathBuf> = keep
            .iter()
            .filter(|(_, name)| !name.trim().is_empty())
            .map(|(ns, name)| self.path_for(ns, name))
            .collect();

        let mut stale: Vec<PathBuf> = list_files(&self.root)
            .await?
            .into_iter()
            .filter(|path| !keep.contains(path))
            .collect();
        stale.sort();

        debug!(root = %self.root.display(), count = stale.len(), "Found stale snapshots");
        Ok(stale)
    }

    /// Parse a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not JSON.
    pub async fn read(path: &Path) -> Result<Value> {
        let body = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Remove a snapshot file by path. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns any I/O error other than "not found".
    pub async fn remove_path(path: &Path) -> Result<()> {
        remove_file(path).await
    }
}

fn escape(relative: &str) -> String {
    relative
        .trim()
        .replace('\\', "/")
        .replace(':', COLON_ESCAPE)
        .to_lowercase()
}

async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}

async fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", dir.display())),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    Ok(files)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod snapshot_tests;
