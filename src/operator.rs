// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Startup sequence, resync and supervision.
//!
//! 1. Resolve the backend (explicit settings or an annotated Service)
//! 2. Wait for it to become healthy
//! 3. Register the dispatcher
//! 4. Resync: fetch and synthesize the OpenAPI document, then bring CRDs, routes and
//!    streams in line with it ([`Bridge::apply`])
//! 5. Repeat step 4 every resync interval (re-reading the annotated Service first) until the
//!    root token is cancelled, then stop every task
//!
//! The first resync is fatal when it fails; later ones are logged and tried again on the
//! next tick.

use crate::backend::{discover_backend, BackendClient};
use crate::config::{BackendSettings, FanOutMode, Settings};
use crate::constants::{DISPATCHER_TASK_NAME, STREAM_TASK_PREFIX};
use crate::errors::OperatorError;
use crate::metrics;
use crate::openapi::{synthesize, CollectionLookup, KubeCollectionLookup, RouteTable};
use crate::ordering::VersionOrdering;
use crate::reconcilers::crds::{self, CrdClient, KubeCrdClient};
use crate::reconcilers::dispatch::{BackendApi, DispatchLoop, Dispatcher};
use crate::resource::WatchSubscription;
use crate::tasks::TaskRegistry;
use crate::watch::{
    KubeWatchSource, QueueHandler, ResourceObjectEventStream, ResourceObjectQueue, SnapshotStore,
    WatchSource,
};
use anyhow::{Context, Result};
use kube::Client;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-stream settings shared by every watch.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub fan_out: FanOutMode,
    pub reconnect_delay: Duration,
    pub data_path: Option<PathBuf>,
}

impl From<&Settings> for StreamOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            fan_out: settings.fan_out,
            reconnect_delay: settings.reconnect_delay(),
            data_path: settings.data_path.clone(),
        }
    }
}

/// Build the watch stream for one collection, feeding `queue`.
#[must_use]
pub fn build_stream(
    subscription: WatchSubscription,
    source: Arc<dyn WatchSource>,
    queue: &Arc<ResourceObjectQueue>,
    options: &StreamOptions,
) -> ResourceObjectEventStream {
    let snapshots = options
        .data_path
        .as_deref()
        .map(|path| SnapshotStore::for_subscription(path, &subscription));

    let mut stream = ResourceObjectEventStream::new(subscription, source)
        .with_handler(Arc::new(QueueHandler::new(Arc::clone(queue))))
        .with_fan_out(options.fan_out)
        .with_reconnect_delay(options.reconnect_delay);
    if let Some(store) = snapshots {
        stream = stream.with_snapshots(store);
    }
    stream
}

/// Register a stream for every subscription not already running.
///
/// # Errors
///
/// Returns the first registration failure.
pub async fn start_streams(
    registry: &TaskRegistry,
    subscriptions: &[WatchSubscription],
    source: &Arc<dyn WatchSource>,
    queue: &Arc<ResourceObjectQueue>,
    options: &StreamOptions,
    token: &CancellationToken,
) -> Result<usize> {
    let mut started = 0;
    for subscription in subscriptions {
        let name = subscription.task_name();
        if registry.exists(&name).await {
            debug!(task = %name, "Stream already running");
            continue;
        }

        let stream = build_stream(subscription.clone(), Arc::clone(source), queue, options);
        registry.add(&name, Arc::new(stream), token).await?;
        started += 1;
    }
    Ok(started)
}

/// Stop every registered stream whose collection is not in `wanted`.
///
/// Covers CRDs the backend dropped as well as known kinds it stopped handling. Tasks that
/// are not streams are left alone.
pub async fn stop_stale_streams(registry: &TaskRegistry, wanted: &[WatchSubscription]) -> usize {
    let wanted: HashSet<String> = wanted.iter().map(WatchSubscription::task_name).collect();
    let prefix = format!("{STREAM_TASK_PREFIX}:");

    let mut stopped = 0;
    for name in registry.names().await {
        if !name.starts_with(&prefix) || wanted.contains(&name) {
            continue;
        }
        info!(task = %name, "Stopping stream the backend no longer handles");
        match registry.remove(&name).await {
            Ok(()) => stopped += 1,
            Err(e) => warn!(task = %name, error = %e, "Failed to stop stream"),
        }
    }
    stopped
}

/// What one [`Bridge::apply`] pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    /// CRDs created or replaced
    pub crds_applied: usize,
    pub routes: usize,
    pub streams_started: usize,
    pub streams_stopped: usize,
}

/// Long-lived state every resync pass updates in place.
pub struct Bridge {
    registry: TaskRegistry,
    queue: Arc<ResourceObjectQueue>,
    dispatcher: Arc<Dispatcher>,
    source: Arc<dyn WatchSource>,
    options: StreamOptions,
    delete_removed_crds: bool,
}

impl Bridge {
    /// Bridge with no routes and no tasks yet.
    #[must_use]
    pub fn new(
        backend: Arc<dyn BackendApi>,
        source: Arc<dyn WatchSource>,
        ordering: Arc<dyn VersionOrdering>,
        options: StreamOptions,
        delete_removed_crds: bool,
    ) -> Self {
        let queue = Arc::new(ResourceObjectQueue::new(Arc::clone(&ordering)));
        let dispatcher = Arc::new(Dispatcher::new(backend, RouteTable::new(), ordering));
        Self {
            registry: TaskRegistry::new(),
            queue,
            dispatcher,
            source,
            options,
            delete_removed_crds,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Register the loop draining the shared queue into the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error when the dispatcher is already registered.
    pub async fn start_dispatcher(&self, token: &CancellationToken) -> Result<()> {
        let task = DispatchLoop::new(Arc::clone(&self.queue), Arc::clone(&self.dispatcher));
        self.registry
            .add(DISPATCHER_TASK_NAME, Arc::new(task), token)
            .await
    }

    /// Bring CRDs, routes and streams in line with `document`.
    ///
    /// Routes are installed before new streams start, so the first events of a new
    /// collection already have somewhere to go.
    ///
    /// # Errors
    ///
    /// Returns synthesis, CRD reconciliation or stream registration failures. Streams
    /// stopped before the failure stay stopped.
    pub async fn apply(
        &self,
        document: &Value,
        group: &str,
        lookup: &dyn CollectionLookup,
        crd_client: &dyn CrdClient,
        token: &CancellationToken,
    ) -> Result<ResyncSummary> {
        let synthesis = synthesize(document, group, lookup).await?;
        let diff = crds::reconcile(crd_client, group, &synthesis.crds, self.delete_removed_crds)
            .await?;
        let subscriptions = synthesis.subscriptions()?;

        let streams_stopped = stop_stale_streams(&self.registry, &subscriptions).await;
        let routes = self.dispatcher.set_routes(synthesis.routes).await;
        let streams_started = start_streams(
            &self.registry,
            &subscriptions,
            &self.source,
            &self.queue,
            &self.options,
            token,
        )
        .await?;

        Ok(ResyncSummary {
            crds_applied: diff.new.len() + diff.updated.len(),
            routes,
            streams_started,
            streams_stopped,
        })
    }

    /// Stop every task, the dispatcher included.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

async fn resolve_backend(settings: &Settings, client: &Client) -> Result<BackendSettings> {
    if let Some(backend) = settings.backend() {
        return Ok(backend);
    }

    let namespace = settings.service_namespace.as_deref().ok_or_else(|| {
        OperatorError::InvalidSettings("either api-host or service-namespace is required".into())
    })?;

    discover_backend(client.clone(), namespace)
        .await?
        .ok_or_else(|| {
            OperatorError::InvalidSettings(format!(
                "no Service in namespace '{namespace}' is annotated as the backend"
            ))
            .into()
        })
}

/// Re-read the annotated Service and switch the dispatcher over when its settings changed.
///
/// Returns the new client, or `None` when the backend is configured explicitly or unchanged.
async fn refresh_backend(
    settings: &Settings,
    client: &Client,
    bridge: &Bridge,
    current: &BackendClient,
) -> Result<Option<Arc<BackendClient>>> {
    if settings.backend().is_some() {
        return Ok(None);
    }

    let latest = resolve_backend(settings, client).await?;
    if &latest == current.settings() {
        return Ok(None);
    }

    info!(
        from = %current.settings().base_url(),
        to = %latest.base_url(),
        "Backend Service changed"
    );
    let next = Arc::new(BackendClient::new(latest)?);
    bridge.dispatcher().set_backend(next.clone()).await;
    Ok(Some(next))
}

/// Fetch the backend's document and apply it.
async fn resync(
    bridge: &Bridge,
    backend: &BackendClient,
    lookup: &dyn CollectionLookup,
    crd_client: &dyn CrdClient,
    token: &CancellationToken,
) -> Result<ResyncSummary> {
    let group = match backend.settings().group.clone() {
        Some(group) => group,
        None => backend
            .discover_group()
            .await
            .context("discovering the backend's API group")?,
    };

    let document = backend
        .fetch_spec()
        .await
        .context("fetching the OpenAPI document")?;
    let summary = bridge
        .apply(&document, &group, lookup, crd_client, token)
        .await?;

    info!(
        group = %group,
        crds_applied = summary.crds_applied,
        routes = summary.routes,
        streams_started = summary.streams_started,
        streams_stopped = summary.streams_stopped,
        "Resync complete"
    );
    Ok(summary)
}

/// First resync, then the periodic loop.
async fn supervise(
    settings: &Settings,
    client: &Client,
    bridge: &Bridge,
    mut backend: Arc<BackendClient>,
    token: &CancellationToken,
) -> Result<()> {
    let lookup = KubeCollectionLookup::new(client.clone());
    let crd_client = KubeCrdClient::new(client.clone());

    let first = resync(bridge, &backend, &lookup, &crd_client, token).await;
    metrics::record_resync(first.is_ok());
    first?;
    info!(tasks = ?bridge.registry().names().await, "Operator running");

    let Some(period) = settings.resync_interval() else {
        token.cancelled().await;
        return Ok(());
    };

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = token.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        match refresh_backend(settings, client, bridge, &backend).await {
            Ok(Some(next)) => backend = next,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Backend lookup failed, keeping the current backend"),
        }

        let outcome = tokio::select! {
            () = token.cancelled() => return Ok(()),
            outcome = resync(bridge, &backend, &lookup, &crd_client, token) => outcome,
        };
        if let Err(e) = &outcome {
            warn!(error = %e, "Resync failed, retrying next interval");
        }
        metrics::record_resync(outcome.is_ok());
    }
}

/// Run the operator until `token` is cancelled.
///
/// # Errors
///
/// Returns any startup failure: backend discovery, spec retrieval or synthesis, CRD
/// reconciliation, or task registration.
pub async fn run(settings: Settings, client: Client, token: CancellationToken) -> Result<()> {
    let backend = Arc::new(BackendClient::new(resolve_backend(&settings, &client).await?)?);

    if !backend.wait_until_healthy(&token).await {
        info!("Shutdown requested before the backend became healthy");
        return Ok(());
    }

    let bridge = Bridge::new(
        backend.clone(),
        Arc::new(KubeWatchSource::new(client.clone())),
        settings.version_ordering.build(),
        StreamOptions::from(&settings),
        settings.delete_removed_crds,
    );
    bridge.start_dispatcher(&token).await?;

    let result = supervise(&settings, &client, &bridge, backend, &token).await;
    if result.is_ok() {
        info!("Shutdown requested, stopping tasks");
    }
    bridge.shutdown().await;
    result
}

#[cfg(test)]
#[path = "operator_tests.rs"]
mod operator_tests;
