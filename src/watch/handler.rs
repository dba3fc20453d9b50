// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Consumers of watch events.

use crate::config::FanOutMode;
use crate::metrics;
use crate::resource::ResourceObject;
use crate::watch::queue::ResourceObjectQueue;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Receives every object a stream observes.
#[async_trait]
pub trait ResourceObjectEventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, obj: &ResourceObject, token: &CancellationToken) -> Result<()>;
}

/// Handler that forwards every event into the dispatch queue.
pub struct QueueHandler {
    queue: Arc<ResourceObjectQueue>,
}

impl QueueHandler {
    #[must_use]
    pub fn new(queue: Arc<ResourceObjectQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl ResourceObjectEventHandler for QueueHandler {
    fn name(&self) -> &str {
        "queue"
    }

    async fn handle(&self, obj: &ResourceObject, _token: &CancellationToken) -> Result<()> {
        self.queue.add(obj.clone()).await;
        Ok(())
    }
}

/// Deliver `obj` to every handler.
///
/// A failing or panicking handler is logged with the object's identity and does not keep
/// the others from running.
pub async fn fan_out(
    handlers: &[Arc<dyn ResourceObjectEventHandler>],
    obj: &ResourceObject,
    mode: FanOutMode,
    token: &CancellationToken,
) {
    match mode {
        FanOutMode::Sequential => {
            for handler in handlers {
                if let Err(e) = run_guarded(handler.as_ref(), obj, token).await {
                    log_failure(handler.as_ref(), obj, &e);
                }
            }
        }
        FanOutMode::Concurrent => {
            let results = futures::future::join_all(
                handlers
                    .iter()
                    .map(|handler| run_guarded(handler.as_ref(), obj, token)),
            )
            .await;

            for (handler, result) in handlers.iter().zip(results) {
                if let Err(e) = result {
                    log_failure(handler.as_ref(), obj, &e);
                }
            }
        }
    }
}

/// Run one handler, turning a panic into an error.
async fn run_guarded(
    handler: &dyn ResourceObjectEventHandler,
    obj: &ResourceObject,
    token: &CancellationToken,
) -> Result<()> {
    match AssertUnwindSafe(handler.handle(obj, token)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("handler panicked: {}", panic_message(payload.as_ref()))),
    }
}

/// Text of a panic payload, when it has one.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn log_failure(handler: &dyn ResourceObjectEventHandler, obj: &ResourceObject, err: &anyhow::Error) {
    metrics::record_handler_failure(handler.name());
    error!(
        handler = handler.name(),
        long_name = %obj.long_name(),
        event_type = %obj.event_type(),
        error = %err,
        "Event handler failed"
    );
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod handler_tests;
