// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Long-lived, self-reconnecting watch over one collection.
//!
//! A stream connects immediately when started. Whenever the connection ends (server close,
//! transport error, or an `ERROR` event such as `410 Gone`) it waits a fixed delay and
//! connects again, until its cancellation token fires. Each connection first replays, as
//! deletions, any snapshot whose object is no longer listed, then opens a watch from
//! resource version `"0"`.
//!
//! Bookmark events are never requested and are ignored if they arrive. A panic anywhere in
//! a connection attempt is treated like any other failure: the stream reconnects.

use crate::config::FanOutMode;
use crate::constants::{
    WATCH_RECONNECT_DELAY_MILLIS, WATCH_START_RESOURCE_VERSION, WATCH_STOP_GRACE_MILLIS,
};
use crate::errors::is_forbidden;
use crate::metrics;
use crate::resource::{EventType, ResourceObject, WatchSubscription};
use crate::tasks::ManagedTask;
use crate::watch::handler::{fan_out, panic_message, ResourceObjectEventHandler};
use crate::watch::snapshot::SnapshotStore;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt, TryStreamExt};
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where a stream gets its list and watch data from.
#[async_trait]
pub trait WatchSource: Send + Sync {
    /// Current objects of the collection, cluster-wide.
    async fn list(&self, subscription: &WatchSubscription) -> Result<Vec<Value>>;

    /// Open a watch. An `Error` item carries the server's status document.
    async fn watch(
        &self,
        subscription: &WatchSubscription,
    ) -> Result<BoxStream<'static, Result<(EventType, Value)>>>;
}

/// [`WatchSource`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeWatchSource {
    client: Client,
}

impl KubeWatchSource {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, subscription: &WatchSubscription) -> Api<DynamicObject> {
        // Only the plural reaches the request path; the kind is not known here.
        let gvk = GroupVersionKind::gvk(
            &subscription.group,
            &subscription.version,
            &subscription.plural,
        );
        let resource = ApiResource::from_gvk_with_plural(&gvk, &subscription.plural);
        Api::all_with(self.client.clone(), &resource)
    }
}

#[async_trait]
impl WatchSource for KubeWatchSource {
    async fn list(&self, subscription: &WatchSubscription) -> Result<Vec<Value>> {
        let list = self.api(subscription).list(&ListParams::default()).await?;
        list.items
            .into_iter()
            .map(|item| serde_json::to_value(item).map_err(Into::into))
            .collect()
    }

    async fn watch(
        &self,
        subscription: &WatchSubscription,
    ) -> Result<BoxStream<'static, Result<(EventType, Value)>>> {
        let params = WatchParams::default().disable_bookmarks();
        let events = self
            .api(subscription)
            .watch(&params, WATCH_START_RESOURCE_VERSION)
            .await?;

        Ok(events
            .map_err(anyhow::Error::from)
            .and_then(|event| async move { convert(event) })
            .boxed())
    }
}

fn convert(event: WatchEvent<DynamicObject>) -> Result<(EventType, Value)> {
    Ok(match event {
        WatchEvent::Added(obj) => (EventType::Added, serde_json::to_value(obj)?),
        WatchEvent::Modified(obj) => (EventType::Modified, serde_json::to_value(obj)?),
        WatchEvent::Deleted(obj) => (EventType::Deleted, serde_json::to_value(obj)?),
        WatchEvent::Bookmark(_) => (EventType::Bookmark, Value::Null),
        WatchEvent::Error(err) => (EventType::Error, json!({ "message": format!("{err:?}") })),
    })
}

#[derive(Clone)]
struct StreamWorker {
    subscription: WatchSubscription,
    source: Arc<dyn WatchSource>,
    handlers: Vec<Arc<dyn ResourceObjectEventHandler>>,
    snapshots: Option<SnapshotStore>,
    fan_out: FanOutMode,
    reconnect_delay: Duration,
}

/// The spawned worker and the token that winds it down.
struct Running {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

/// Reconnecting watch over one [`WatchSubscription`], run as a [`ManagedTask`].
pub struct ResourceObjectEventStream {
    worker: StreamWorker,
    running: Mutex<Option<Running>>,
    stop_grace: Duration,
}

impl ResourceObjectEventStream {
    #[must_use]
    pub fn new(subscription: WatchSubscription, source: Arc<dyn WatchSource>) -> Self {
        Self {
            worker: StreamWorker {
                subscription,
                source,
                handlers: Vec::new(),
                snapshots: None,
                fan_out: FanOutMode::default(),
                reconnect_delay: Duration::from_millis(WATCH_RECONNECT_DELAY_MILLIS),
            },
            running: Mutex::new(None),
            stop_grace: Duration::from_millis(WATCH_STOP_GRACE_MILLIS),
        }
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ResourceObjectEventHandler>) -> Self {
        self.worker.handlers.push(handler);
        self
    }

    #[must_use]
    pub fn with_snapshots(mut self, store: SnapshotStore) -> Self {
        self.worker.snapshots = Some(store);
        self
    }

    #[must_use]
    pub fn with_fan_out(mut self, mode: FanOutMode) -> Self {
        self.worker.fan_out = mode;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.worker.reconnect_delay = delay;
        self
    }

    /// How long `stop` waits for the worker to finish before aborting it.
    #[must_use]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    #[must_use]
    pub fn subscription(&self) -> &WatchSubscription {
        &self.worker.subscription
    }
}

#[async_trait]
impl ManagedTask for ResourceObjectEventStream {
    async fn start(&self, token: CancellationToken) -> Result<()> {
        let mut running = self.running.lock().await;
        match running.take() {
            Some(previous) => {
                previous.token.cancel();
                previous.handle.abort();
            }
            None => metrics::record_watch_active(true),
        }

        let token = token.child_token();
        let worker = Arc::new(self.worker.clone());
        let handle = tokio::spawn({
            let token = token.clone();
            async move { worker.run(token).await }
        });
        *running = Some(Running { handle, token });
        Ok(())
    }

    /// Cancel the worker and wait for it to finish the event in hand. Only a worker that is
    /// still running after the grace period is aborted.
    async fn stop(&self, _token: CancellationToken) -> Result<()> {
        let key = self.worker.subscription.key();
        let Some(Running { mut handle, token }) = self.running.lock().await.take() else {
            debug!(stream = %key, "Stream was not running");
            return Ok(());
        };

        metrics::record_watch_active(false);
        token.cancel();

        match tokio::time::timeout(self.stop_grace, &mut handle).await {
            Ok(Ok(())) => debug!(stream = %key, "Stream finished"),
            Ok(Err(e)) => warn!(stream = %key, error = %e, "Stream task failed"),
            Err(_) => {
                warn!(
                    stream = %key,
                    grace_ms = u64::try_from(self.stop_grace.as_millis()).unwrap_or(u64::MAX),
                    "Stream did not stop in time, aborting"
                );
                handle.abort();
            }
        }
        Ok(())
    }
}

impl StreamWorker {
    fn log_tag(&self) -> String {
        format!("{} Events", self.subscription.key())
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        let key = self.subscription.key();
        let tag = self.log_tag();
        let mut reconnecting = false;

        loop {
            if token.is_cancelled() {
                info!(stream = %tag, "Exiting");
                return;
            }

            if reconnecting {
                metrics::record_watch_reconnect(&key);
                tokio::select! {
                    () = token.cancelled() => {
                        info!(stream = %tag, "Exiting");
                        return;
                    }
                    () = tokio::time::sleep(self.reconnect_delay) => {}
                }
            }
            reconnecting = true;

            match AssertUnwindSafe(self.connect(&token)).catch_unwind().await {
                Ok(Ok(())) => {
                    if !token.is_cancelled() {
                        warn!(stream = %tag, "Watch closed, reconnecting");
                    }
                }
                Ok(Err(e)) if is_forbidden(&e) => {
                    error!(
                        stream = %tag,
                        error = %e,
                        "Watch forbidden, check the operator's RBAC permissions"
                    );
                }
                Ok(Err(e)) => error!(stream = %tag, error = %e, "Watch failed, reconnecting"),
                Err(payload) => error!(
                    stream = %tag,
                    panic = panic_message(payload.as_ref()),
                    "Watch attempt panicked, reconnecting"
                ),
            }
        }
    }

    /// One connection: replay missed deletions, then consume the watch until it ends.
    async fn connect(&self, token: &CancellationToken) -> Result<()> {
        let key = self.subscription.key();
        let tag = self.log_tag();
        info!(stream = %tag, "Streaming");

        self.replay_deletions(token).await?;

        let mut events = self.source.watch(&self.subscription).await?;
        loop {
            let next = tokio::select! {
                () = token.cancelled() => return Ok(()),
                next = events.next() => next,
            };

            match next {
                None => return Ok(()),
                Some(Err(e)) => return Err(e),
                Some(Ok((EventType::Error, status))) => {
                    error!(stream = %tag, status = %status, "Watch error event (GONE suspected)");
                    return Ok(());
                }
                Some(Ok((EventType::Bookmark, _))) => continue,
                Some(Ok((event_type, data))) => {
                    let obj = ResourceObject::new(event_type, data).with_source(key.clone());
                    self.on_event(obj, token).await;
                }
            }
        }
    }

    async fn replay_deletions(&self, token: &CancellationToken) -> Result<()> {
        let Some(store) = &self.snapshots else {
            return Ok(());
        };

        let listed: Vec<(String, String)> = self
            .source
            .list(&self.subscription)
            .await?
            .into_iter()
            .map(|item| {
                let obj = ResourceObject::new(EventType::Added, item);
                (obj.namespace().to_string(), obj.name().to_string())
            })
            .collect();

        for path in store.stale_except(&listed).await? {
            match SnapshotStore::read(&path).await {
                Ok(data) => {
                    let obj = ResourceObject::new(EventType::Deleted, data)
                        .with_source(self.subscription.key());
                    info!(long_name = %obj.long_name(), "Replaying deletion missed while disconnected");
                    self.on_event(obj, token).await;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Discarding unreadable snapshot"),
            }

            if let Err(e) = SnapshotStore::remove_path(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to prune snapshot");
            }
        }

        Ok(())
    }

    /// Snapshot, fan out, and forget deleted objects.
    ///
    /// A deleted object's snapshot is never rewritten, so an interrupted delete can at worst
    /// leave the last live copy behind, which the next connect replays as a deletion.
    async fn on_event(&self, obj: ResourceObject, token: &CancellationToken) {
        metrics::record_watch_event(&self.subscription.key(), obj.event_type());
        let deleted = obj.event_type() == EventType::Deleted;

        if let (Some(store), false) = (&self.snapshots, deleted) {
            if let Err(e) = store.write(obj.namespace(), obj.name(), obj.data()).await {
                warn!(long_name = %obj.long_name(), error = %e, "Failed to store snapshot");
            }
        }

        fan_out(&self.handlers, &obj, self.fan_out, token).await;

        if deleted {
            if let Some(store) = &self.snapshots {
                if let Err(e) = store.remove(obj.namespace(), obj.name()).await {
                    warn!(long_name = %obj.long_name(), error = %e, "Failed to remove snapshot");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod stream_tests;
