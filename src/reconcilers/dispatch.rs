// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Idempotent forwarding of observed objects to the backing application.
//!
//! The dispatcher keeps a ledger of the last `resourceVersion` successfully forwarded per
//! object identity. Watches redeliver (every reconnect replays current state), so an event
//! whose version is not newer than the ledger's is dropped. Delivery is at-most-once: a
//! failed forward is logged and dropped, and the ledger is left untouched so a later revision
//! can still go through.
//!
//! The route table and the backend can be swapped while the dispatch loop runs; a resync
//! installs the routes of a freshly synthesized document this way.

use crate::errors::OperatorError;
use crate::metrics;
use crate::openapi::{Route, RouteTable};
use crate::ordering::VersionOrdering;
use crate::resource::{EventType, ResourceObject};
use crate::tasks::ManagedTask;
use crate::watch::ResourceObjectQueue;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Forwarding calls offered by the backing application.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Forward an added or modified object through `route.put`.
    async fn add_or_update(&self, route: &Route, obj: &ResourceObject) -> Result<()>;

    /// Forward a deleted object through `route.delete`.
    async fn delete(&self, route: &Route, obj: &ResourceObject) -> Result<()>;
}

/// What [`Dispatcher::dispatch`] did with one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Forwarded,
    /// The ledger already holds this revision or a newer one
    Skipped,
    /// No route, or the backend call failed
    Failed,
}

/// Ledger-guarded forwarder.
pub struct Dispatcher {
    backend: RwLock<Arc<dyn BackendApi>>,
    routes: RwLock<RouteTable>,
    ordering: Arc<dyn VersionOrdering>,
    ledger: Mutex<HashMap<String, String>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        backend: Arc<dyn BackendApi>,
        routes: RouteTable,
        ordering: Arc<dyn VersionOrdering>,
    ) -> Self {
        Self {
            backend: RwLock::new(backend),
            routes: RwLock::new(routes),
            ordering,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the route table. Returns the number of routes installed.
    pub async fn set_routes(&self, routes: RouteTable) -> usize {
        let count = routes.len();
        *self.routes.write().await = routes;
        count
    }

    /// Forward through `backend` from now on. The ledger is kept.
    pub async fn set_backend(&self, backend: Arc<dyn BackendApi>) {
        *self.backend.write().await = backend;
    }

    /// Last forwarded version of `long_name`, if any.
    pub async fn ledger_version(&self, long_name: &str) -> Option<String> {
        self.ledger.lock().await.get(long_name).cloned()
    }

    /// Forward `obj` unless the ledger shows it was already handled.
    ///
    /// A `Deleted` event is only skipped when strictly older than the ledger: the delete of
    /// an object carries the version it was last seen at, which may equal the ledger entry.
    pub async fn dispatch(&self, obj: &ResourceObject) -> DispatchOutcome {
        let long_name = obj.long_name();
        let event_type = obj.event_type();
        let incoming = obj.resource_version();

        if matches!(event_type, EventType::Error | EventType::Bookmark) {
            debug!(long_name = %long_name, event_type = %event_type, "Nothing to forward");
            return DispatchOutcome::Skipped;
        }

        if let Some(current) = self.ledger.lock().await.get(&long_name) {
            let stale = match event_type {
                EventType::Deleted => {
                    self.ordering.compare(incoming, current) == std::cmp::Ordering::Less
                }
                _ => !self.ordering.is_newer(incoming, current),
            };
            if stale {
                debug!(
                    long_name = %long_name,
                    event_type = %event_type,
                    resource_version = %incoming,
                    ledger_version = %current,
                    "Revision already forwarded, skipping"
                );
                metrics::record_dispatch_skipped(obj.kind());
                return DispatchOutcome::Skipped;
            }
        }

        let route = self.routes.read().await.get(obj.source()).cloned();
        let Some(route) = route else {
            error!(
                long_name = %long_name,
                event_type = %event_type,
                error = %OperatorError::NoRoute(obj.source().to_string()),
                "Cannot forward object"
            );
            return DispatchOutcome::Failed;
        };

        let backend = Arc::clone(&*self.backend.read().await);
        let started = Instant::now();
        let result = match event_type {
            EventType::Deleted => backend.delete(&route, obj).await,
            _ => backend.add_or_update(&route, obj).await,
        };
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                let mut ledger = self.ledger.lock().await;
                if event_type == EventType::Deleted {
                    ledger.remove(&long_name);
                } else {
                    ledger.insert(long_name.clone(), incoming.to_string());
                }
                drop(ledger);

                info!(
                    long_name = %long_name,
                    event_type = %event_type,
                    resource_version = %incoming,
                    "Forwarded to backend"
                );
                metrics::record_dispatch(obj.kind(), "forwarded", elapsed);
                DispatchOutcome::Forwarded
            }
            Err(e) => {
                error!(
                    long_name = %long_name,
                    event_type = %event_type,
                    resource_version = %incoming,
                    error = %e,
                    "Forwarding to backend failed, dropping event"
                );
                metrics::record_dispatch(obj.kind(), "failed", elapsed);
                DispatchOutcome::Failed
            }
        }
    }
}

/// Task draining a [`ResourceObjectQueue`] into a [`Dispatcher`].
pub struct DispatchLoop {
    queue: Arc<ResourceObjectQueue>,
    dispatcher: Arc<Dispatcher>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchLoop {
    #[must_use]
    pub fn new(queue: Arc<ResourceObjectQueue>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            queue,
            dispatcher,
            handle: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ManagedTask for DispatchLoop {
    async fn start(&self, token: CancellationToken) -> Result<()> {
        let queue = Arc::clone(&self.queue);
        let dispatcher = Arc::clone(&self.dispatcher);

        let mut handle = self.handle.lock().await;
        if let Some(previous) = handle.take() {
            previous.abort();
        }
        *handle = Some(tokio::spawn(async move {
            info!("Dispatcher started");
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        let pending = queue.len().await;
                        info!(pending, "Dispatcher cancelled, exiting");
                        return;
                    }
                    obj = queue.next() => {
                        dispatcher.dispatch(&obj).await;
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&self, _token: CancellationToken) -> Result<()> {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Dispatcher task failed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod dispatch_tests;
