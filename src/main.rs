// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use apibridge::{
    config::Settings,
    constants::{
        HEALTH_SERVER_PATH, METRICS_SERVER_BIND_ADDRESS, METRICS_SERVER_PATH, TOKIO_WORKER_THREADS,
    },
    errors::is_forbidden,
    metrics::gather_metrics,
    operator,
};
use axum::{http::StatusCode, routing::get, Router};
use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

fn main() -> Result<()> {
    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(TOKIO_WORKER_THREADS);

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .thread_name("apibridge-operator")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

fn init_logging() {
    // Respects RUST_LOG environment variable if set, otherwise defaults to INFO level
    // Respects RUST_LOG_FORMAT environment variable for output format (json|text)
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main() -> Result<()> {
    init_logging();

    let settings = Settings::parse();
    settings.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        api_host = ?settings.api_host,
        service_namespace = ?settings.service_namespace,
        "Starting apibridge operator"
    );
    debug!(settings = ?settings, "Settings loaded");

    let token = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(token.clone()));
    tokio::spawn(run_metrics_server(settings.metrics_port, token.clone()));

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    match operator::run(settings, client, token.clone()).await {
        Ok(()) => {
            info!("apibridge operator stopped");
            Ok(())
        }
        Err(e) if is_forbidden(&e) => {
            error!(
                error = %e,
                "Access denied by the Kubernetes API: check the operator's RBAC permissions"
            );
            token.cancel();
            Ok(())
        }
        Err(e) => {
            error!(error = ?e, "CRITICAL: operator failed");
            token.cancel();
            Err(e)
        }
    }
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn shutdown_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!(error = %e, "Cannot install SIGTERM handler, waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }

    token.cancel();
}

async fn metrics_handler() -> (StatusCode, String) {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        ),
    }
}

/// Serve `/metrics` and `/healthz` until `token` is cancelled.
async fn run_metrics_server(port: u16, token: CancellationToken) {
    let app = Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route(HEALTH_SERVER_PATH, get(|| async { "ok" }));

    let listener = match tokio::net::TcpListener::bind((METRICS_SERVER_BIND_ADDRESS, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(port = port, error = %e, "Cannot bind metrics server");
            return;
        }
    };
    info!(port = port, "Metrics server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
    {
        error!(error = %e, "Metrics server failed");
    }
}
