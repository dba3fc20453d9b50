// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Startup settings.
//!
//! Every flag can also be supplied through the environment variable named in its `env`
//! attribute, which is how the operator is configured when deployed in-cluster.

use crate::constants::{
    BACKEND_RESYNC_INTERVAL_SECS, DEFAULT_BACKEND_PORT, DEFAULT_SPEC_PATH, METRICS_SERVER_PORT,
    WATCH_RECONNECT_DELAY_MILLIS,
};
use crate::errors::OperatorError;
use crate::ordering::{NumericOrdering, OrdinalOrdering, VersionOrdering};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Serialization of the backing application's OpenAPI document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SpecFormat {
    #[default]
    Json,
    Yaml,
}

impl std::str::FromStr for SpecFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(()),
        }
    }
}

/// How a stream runs its registered handlers for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FanOutMode {
    /// One after the other, in registration order (deterministic)
    #[default]
    Sequential,
    /// All at once
    Concurrent,
}

/// Which [`VersionOrdering`] the queue and dispatcher use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OrderingKind {
    #[default]
    Ordinal,
    Numeric,
}

impl OrderingKind {
    #[must_use]
    pub fn build(self) -> Arc<dyn VersionOrdering> {
        match self {
            Self::Ordinal => Arc::new(OrdinalOrdering),
            Self::Numeric => Arc::new(NumericOrdering),
        }
    }
}

/// How to reach and introspect the backing application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub host: String,
    pub port: u16,
    pub https: bool,
    pub spec_path: String,
    pub spec_format: SpecFormat,
    /// Group owned by the backend, if known up-front
    pub group: Option<String>,
}

impl BackendSettings {
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Command line / environment settings.
#[derive(Debug, Clone, Parser)]
#[command(name = "apibridge", version, about)]
pub struct Settings {
    /// Host name of the backing application (omit to discover it from an annotated Service)
    #[arg(long, env = "API_HOST")]
    pub api_host: Option<String>,

    /// Port of the backing application
    #[arg(long, env = "API_PORT", default_value_t = DEFAULT_BACKEND_PORT,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub api_port: u16,

    /// Talk HTTPS to the backing application
    #[arg(long, env = "API_HTTPS")]
    pub api_https: bool,

    /// Path of the OpenAPI document on the backing application
    #[arg(long, env = "API_SPEC_PATH", default_value = DEFAULT_SPEC_PATH)]
    pub api_spec_path: String,

    /// Format of the OpenAPI document
    #[arg(long, env = "API_SPEC_FORMAT", value_enum, default_value_t = SpecFormat::Json)]
    pub api_spec_format: SpecFormat,

    /// API group owned by the backing application (discovered from the backend when omitted)
    #[arg(long, env = "API_GROUP")]
    pub api_group: Option<String>,

    /// Directory for last-seen object snapshots (disabled when omitted)
    #[arg(long, env = "DATA_PATH")]
    pub data_path: Option<PathBuf>,

    /// Handler fan-out policy for watch events
    #[arg(long, env = "FAN_OUT", value_enum, default_value_t = FanOutMode::Sequential)]
    pub fan_out: FanOutMode,

    /// Delete CRDs the backend no longer declares
    #[arg(long, env = "DELETE_REMOVED_CRDS")]
    pub delete_removed_crds: bool,

    /// Comparator for resourceVersion tokens
    #[arg(long, env = "VERSION_ORDERING", value_enum, default_value_t = OrderingKind::Ordinal)]
    pub version_ordering: OrderingKind,

    /// Fixed delay before a watch reconnects
    #[arg(long, env = "RECONNECT_DELAY_MS", default_value_t = WATCH_RECONNECT_DELAY_MILLIS)]
    pub reconnect_delay_ms: u64,

    /// Seconds between backend resyncs; 0 reads the backend only at startup
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = BACKEND_RESYNC_INTERVAL_SECS)]
    pub resync_interval_secs: u64,

    /// Port of the metrics / health server
    #[arg(long, env = "METRICS_PORT", default_value_t = METRICS_SERVER_PORT)]
    pub metrics_port: u16,

    /// Namespace to search for an annotated backend Service
    #[arg(long, env = "SERVICE_NAMESPACE")]
    pub service_namespace: Option<String>,
}

impl Settings {
    /// Check cross-field rules clap cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidSettings`] describing the first broken rule.
    pub fn validate(&self) -> Result<(), OperatorError> {
        if self.api_spec_path.trim().is_empty() {
            return Err(OperatorError::InvalidSettings(
                "api-spec-path must not be empty".into(),
            ));
        }

        if let Some(group) = &self.api_group {
            let group = group.trim();
            if group.is_empty() || group == crate::constants::NO_GROUP_PLACEHOLDER {
                return Err(OperatorError::InvalidSettings(format!(
                    "api-group '{group}' is not a usable group"
                )));
            }
        }

        let host_missing = self.api_host.as_deref().map_or(true, |h| h.trim().is_empty());
        if host_missing && self.service_namespace.is_none() {
            return Err(OperatorError::InvalidSettings(
                "either api-host or service-namespace is required".into(),
            ));
        }

        Ok(())
    }

    /// Backend settings from explicit flags, when a host was given.
    #[must_use]
    pub fn backend(&self) -> Option<BackendSettings> {
        let host = self.api_host.as_deref()?.trim();
        if host.is_empty() {
            return None;
        }

        Some(BackendSettings {
            host: host.to_string(),
            port: self.api_port,
            https: self.api_https,
            spec_path: self.api_spec_path.trim().trim_start_matches('/').to_string(),
            spec_format: self.api_spec_format,
            group: self.api_group.as_ref().map(|g| g.trim().to_ascii_lowercase()),
        })
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Period of the backend resync loop, `None` when disabled.
    #[must_use]
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
