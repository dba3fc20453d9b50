// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! FIFO of pending object revisions, deduplicated by object identity.
//!
//! At most one entry exists per long name. A newer revision of a queued object replaces it
//! in place and keeps its position; an older or equal one is dropped. Consumers block in
//! [`ResourceObjectQueue::next`] until an entry is available.

use crate::metrics;
use crate::ordering::VersionOrdering;
use crate::resource::ResourceObject;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::trace;

/// Version-ordered dedup queue.
#[derive(Debug)]
pub struct ResourceObjectQueue {
    entries: Mutex<VecDeque<ResourceObject>>,
    available: Semaphore,
    ordering: Arc<dyn VersionOrdering>,
}

impl ResourceObjectQueue {
    #[must_use]
    pub fn new(ordering: Arc<dyn VersionOrdering>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            available: Semaphore::new(0),
            ordering,
        }
    }

    /// Enqueue `obj`, or upgrade the queued revision of the same object.
    ///
    /// Returns `true` when the queue changed.
    pub async fn add(&self, obj: ResourceObject) -> bool {
        let long_name = obj.long_name();
        let mut entries = self.entries.lock().await;

        if let Some(queued) = entries.iter_mut().find(|q| q.long_name() == long_name) {
            if self
                .ordering
                .is_newer(obj.resource_version(), queued.resource_version())
            {
                trace!(
                    long_name = %long_name,
                    from = queued.resource_version(),
                    to = obj.resource_version(),
                    "Upgrading queued revision"
                );
                queued.upgrade(obj);
                return true;
            }
            trace!(long_name = %long_name, "Dropping stale or duplicate revision");
            return false;
        }

        entries.push_back(obj);
        metrics::set_queue_depth(entries.len());
        self.available.add_permits(1);
        true
    }

    /// Wait for and remove the head of the queue.
    pub async fn next(&self) -> ResourceObject {
        loop {
            // The semaphore is never closed, so acquire only fails on a bug.
            if let Ok(permit) = self.available.acquire().await {
                permit.forget();
            }

            let mut entries = self.entries.lock().await;
            if let Some(obj) = entries.pop_front() {
                metrics::set_queue_depth(entries.len());
                return obj;
            }
        }
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod queue_tests;
