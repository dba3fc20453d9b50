// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Registry of long-running background tasks.
//!
//! Every task is started with a token derived from the caller's token, so cancelling the
//! operator's root token stops everything while [`TaskRegistry::remove`] stops one task
//! without touching its siblings.
//!
//! Names are unique. Adding a duplicate name or removing an unknown one is an error.

use crate::errors::OperatorError;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A background service with an explicit start / stop lifecycle.
#[async_trait]
pub trait ManagedTask: Send + Sync {
    /// Start the task. The task must stop on its own when `token` is cancelled.
    async fn start(&self, token: CancellationToken) -> Result<()>;

    /// Stop the task and release what it holds.
    async fn stop(&self, token: CancellationToken) -> Result<()>;
}

struct TaskEntry {
    task: Arc<dyn ManagedTask>,
    token: CancellationToken,
}

/// Name-keyed set of running [`ManagedTask`]s.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, TaskEntry>>,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` under `name` and start it.
    ///
    /// The registry lock is held across `start`, so two concurrent adds of the same name
    /// cannot both succeed. If `start` fails the entry is dropped again.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::DuplicateTask`] when `name` is taken, or the error
    /// returned by the task's `start`.
    pub async fn add(
        &self,
        name: &str,
        task: Arc<dyn ManagedTask>,
        parent: &CancellationToken,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(name) {
            return Err(OperatorError::DuplicateTask(name.to_string()).into());
        }

        let token = parent.child_token();
        if let Err(e) = task.start(token.clone()).await {
            token.cancel();
            warn!(task = name, error = %e, "Task failed to start");
            return Err(e);
        }

        tasks.insert(name.to_string(), TaskEntry { task, token });
        info!(task = name, "Task started");
        Ok(())
    }

    /// Cancel and stop the task registered under `name`, then forget it.
    ///
    /// `stop` receives the task's own token, already cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::TaskNotFound`] when nothing is registered under `name`.
    /// A failing `stop` is logged and the entry is removed regardless.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let entry = self
            .tasks
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| OperatorError::TaskNotFound(name.to_string()))?;

        entry.token.cancel();
        if let Err(e) = entry.task.stop(entry.token.clone()).await {
            warn!(task = name, error = %e, "Task did not stop cleanly");
        }

        info!(task = name, "Task removed");
        Ok(())
    }

    /// Stop every registered task.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, TaskEntry)> = self.tasks.lock().await.drain().collect();
        debug!(count = drained.len(), "Stopping all tasks");

        for (name, entry) in drained {
            entry.token.cancel();
            if let Err(e) = entry.task.stop(entry.token.clone()).await {
                warn!(task = %name, error = %e, "Task did not stop cleanly");
            }
            debug!(task = %name, "Task stopped during shutdown");
        }
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.tasks.lock().await.contains_key(name)
    }

    /// Registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// The cancellation token handed to `name` at start.
    #[cfg(test)]
    pub(crate) async fn token(&self, name: &str) -> Option<CancellationToken> {
        self.tasks.lock().await.get(name).map(|e| e.token.clone())
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tasks_tests;
