// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the apibridge operator.
//!
//! All metrics use the namespace prefix `apibridge_io_` and are registered in
//! [`METRICS_REGISTRY`], which the `/metrics` endpoint encodes.
//!
//! # Metrics Categories
//!
//! - **Watch Metrics** - Events received and reconnects per watched collection
//! - **Queue Metrics** - Pending revisions waiting for dispatch
//! - **Dispatch Metrics** - Outcome and latency of backend calls
//! - **CRD Metrics** - Definition changes applied to the cluster and backend resync passes
//!
//! # Example
//!
//! ```rust,no_run
//! use apibridge::metrics::record_dispatch;
//!
//! record_dispatch("V1Widget", "forwarded", std::time::Duration::from_millis(12));
//! ```

use crate::resource::EventType;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all apibridge metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "apibridge_io";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Watch Metrics
// ============================================================================

/// Total number of watch events delivered to handlers
///
/// Labels:
/// - `stream`: Collection key (`group/version/plural`)
/// - `event_type`: `Added`, `Modified` or `Deleted`
pub static WATCH_EVENTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_watch_events_total"),
        "Total number of watch events by stream and event type",
    );
    let counter = CounterVec::new(opts, &["stream", "event_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of watch reconnect attempts
///
/// Labels:
/// - `stream`: Collection key (`group/version/plural`)
pub static WATCH_RECONNECTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_watch_reconnects_total"),
        "Total number of watch reconnect attempts by stream",
    );
    let counter = CounterVec::new(opts, &["stream"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Number of watch streams currently running
pub static ACTIVE_WATCHES: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        format!("{METRICS_NAMESPACE}_active_watches"),
        "Number of watch streams currently running",
    )
    .unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Total number of handler failures during event fan-out
///
/// Labels:
/// - `handler`: Handler name
pub static HANDLER_FAILURES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_handler_failures_total"),
        "Total number of handler failures by handler",
    );
    let counter = CounterVec::new(opts, &["handler"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Queue Metrics
// ============================================================================

/// Number of object revisions waiting for dispatch
pub static QUEUE_DEPTH: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        format!("{METRICS_NAMESPACE}_queue_depth"),
        "Number of object revisions waiting for dispatch",
    )
    .unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Dispatch Metrics
// ============================================================================

/// Total number of dispatch decisions
///
/// Labels:
/// - `kind`: Object kind
/// - `outcome`: `forwarded`, `skipped` or `failed`
pub static DISPATCH_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_dispatch_total"),
        "Total number of dispatch decisions by kind and outcome",
    );
    let counter = CounterVec::new(opts, &["kind", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of backend calls in seconds
///
/// Labels:
/// - `kind`: Object kind
pub static DISPATCH_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_dispatch_duration_seconds"),
        "Duration of backend calls in seconds by kind",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]);
    let histogram = HistogramVec::new(opts, &["kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// CRD Metrics
// ============================================================================

/// Total number of CRD changes applied
///
/// Labels:
/// - `action`: `new`, `updated`, `removed` or `unchanged`
pub static CRD_CHANGES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_crd_changes_total"),
        "Total number of CRD changes by action",
    );
    let counter = CounterVec::new(opts, &["action"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of backend resync passes
///
/// Labels:
/// - `outcome`: `success` or `failure`
pub static RESYNCS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_resyncs_total"),
        "Total number of backend resync passes by outcome",
    );
    let counter = CounterVec::new(opts, &["outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record one event observed on `stream`
pub fn record_watch_event(stream: &str, event_type: EventType) {
    WATCH_EVENTS_TOTAL
        .with_label_values(&[stream, event_type.as_str()])
        .inc();
}

/// Record one reconnect attempt on `stream`
pub fn record_watch_reconnect(stream: &str) {
    WATCH_RECONNECTS_TOTAL.with_label_values(&[stream]).inc();
}

/// Track a watch stream starting (`true`) or stopping (`false`)
pub fn record_watch_active(active: bool) {
    if active {
        ACTIVE_WATCHES.inc();
    } else {
        ACTIVE_WATCHES.dec();
    }
}

/// Record one failed handler invocation
pub fn record_handler_failure(handler: &str) {
    HANDLER_FAILURES_TOTAL.with_label_values(&[handler]).inc();
}

/// Publish the current queue length
#[allow(clippy::cast_precision_loss)]
pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as f64);
}

/// Record a backend call and its outcome
///
/// # Arguments
/// * `kind` - Kind of the dispatched object
/// * `outcome` - `forwarded` or `failed`
/// * `duration` - Time spent in the backend call
pub fn record_dispatch(kind: &str, outcome: &str, duration: Duration) {
    DISPATCH_TOTAL.with_label_values(&[kind, outcome]).inc();
    DISPATCH_DURATION_SECONDS
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
}

/// Record an event the ledger judged stale
pub fn record_dispatch_skipped(kind: &str) {
    DISPATCH_TOTAL.with_label_values(&[kind, "skipped"]).inc();
}

/// Record a CRD change (`new`, `updated`, `removed`, `unchanged`)
pub fn record_crd_change(action: &str) {
    CRD_CHANGES_TOTAL.with_label_values(&[action]).inc();
}

/// Record the outcome of one resync pass
pub fn record_resync(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    RESYNCS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
