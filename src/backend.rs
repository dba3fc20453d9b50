// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The backing application: how to reach it and what is asked of it.
//!
//! [`BackendClient`] speaks plain HTTP(S) to the application: a health check, the OpenAPI
//! document, group discovery, and the forwarding calls the dispatcher makes.
//!
//! [`BackendService`] is a read-only view over a Kubernetes `Service` whose annotations
//! describe the application, used when the operator discovers its backend in-cluster.
//!
//! # Service annotations
//!
//! | Annotation | Meaning | Default |
//! |---|---|---|
//! | `apibridge.io/enabled` | `true` marks the backend Service | required |
//! | `apibridge.io/port` | backend port | first Service port, else 80 |
//! | `apibridge.io/https` | `true` for HTTPS | `false` |
//! | `apibridge.io/spec-path` | OpenAPI document path | `swagger/v1/swagger.json` |
//! | `apibridge.io/spec-format` | `json` or `yaml` | `json` |
//! | `apibridge.io/group` | API group owned by the backend | discovered |

use crate::config::{BackendSettings, SpecFormat};
use crate::constants::{
    BACKEND_HEALTH_POLL_MILLIS, BACKEND_REQUEST_TIMEOUT_SECS, DEFAULT_BACKEND_PORT,
    DEFAULT_SPEC_PATH, HEALTH_PATH, KUBE_LIST_PAGE_SIZE, METADATA_PATH,
};
use crate::errors::OperatorError;
use crate::labels::{
    ANNOTATION_ENABLED, ANNOTATION_HTTPS, ANNOTATION_PORT, ANNOTATION_SPEC_FORMAT,
    ANNOTATION_SPEC_PATH, LABEL_GROUP,
};
use crate::openapi::{parse_document, ApiEndpoint, Route};
use crate::reconcilers::dispatch::BackendApi;
use crate::reconcilers::retry::retry_api_call;
use crate::resource::ResourceObject;
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// HTTP client for the backing application.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    settings: BackendSettings,
    base_url: String,
}

impl BackendClient {
    /// Build a client for `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(settings: BackendSettings) -> Result<Self, OperatorError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(BACKEND_REQUEST_TIMEOUT_SECS))
            .build()?;
        let base_url = settings.base_url();

        Ok(Self {
            http,
            settings,
            base_url,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<String, OperatorError> {
        let url = self.url(path);
        debug!(method = %method, url = %url, "HTTP request to backend");

        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(OperatorError::Backend {
                status: status.as_u16(),
                url,
                body: text,
            });
        }
        Ok(text)
    }

    /// `true` when the health endpoint answers with a success status.
    pub async fn is_healthy(&self) -> bool {
        match self.request(Method::GET, HEALTH_PATH, None).await {
            Ok(_) => true,
            Err(e) => {
                debug!(url = %self.url(HEALTH_PATH), error = %e, "Backend not healthy yet");
                false
            }
        }
    }

    /// Poll the health endpoint until it succeeds.
    ///
    /// Returns `false` if `token` is cancelled first.
    pub async fn wait_until_healthy(&self, token: &CancellationToken) -> bool {
        let poll = Duration::from_millis(BACKEND_HEALTH_POLL_MILLIS);
        info!(url = %self.base_url, "Waiting for backend to become healthy");

        loop {
            if self.is_healthy().await {
                info!(url = %self.base_url, "Backend is healthy");
                return true;
            }
            tokio::select! {
                () = token.cancelled() => return false,
                () = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Fetch and parse the OpenAPI document.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the body does not parse in the configured
    /// format, or the document is not OpenAPI 3.x.
    pub async fn fetch_spec(&self) -> Result<Value, OperatorError> {
        let body = self
            .request(Method::GET, &self.settings.spec_path, None)
            .await?;
        let document = parse_document(&body, self.settings.spec_format)?;

        let version = document["openapi"].as_str().unwrap_or_default();
        if !version.starts_with("3.") {
            return Err(OperatorError::InvalidSpec(format!(
                "specification is not version 3 (openapi: '{version}')"
            )));
        }

        info!(
            path = %self.settings.spec_path,
            title = %document["info"]["title"].as_str().unwrap_or_default(),
            "Fetched OpenAPI document"
        );
        Ok(document)
    }

    /// Ask the backend which API group it owns.
    ///
    /// Accepts either `{"group": "<group>"}` or a bare (optionally quoted) string body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or no group is reported.
    pub async fn discover_group(&self) -> Result<String, OperatorError> {
        let body = self.request(Method::GET, METADATA_PATH, None).await?;

        let group = match serde_json::from_str::<Value>(&body) {
            Ok(Value::Object(map)) => map
                .get("group")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Ok(Value::String(group)) => group,
            _ => body,
        };

        let group = group.trim().to_ascii_lowercase();
        if group.is_empty() {
            return Err(OperatorError::InvalidSettings(
                "backend metadata did not report an API group".into(),
            ));
        }

        info!(group = %group, "Discovered API group from backend");
        Ok(group)
    }

    fn object_path(endpoint: &ApiEndpoint, obj: &ResourceObject) -> String {
        endpoint.request_path(obj.namespace(), obj.name())
    }
}

#[async_trait]
impl BackendApi for BackendClient {
    async fn add_or_update(&self, route: &Route, obj: &ResourceObject) -> Result<()> {
        let path = Self::object_path(&route.put, obj);
        self.request(Method::PUT, &path, Some(obj.data())).await?;
        Ok(())
    }

    async fn delete(&self, route: &Route, obj: &ResourceObject) -> Result<()> {
        let path = Self::object_path(&route.delete, obj);
        self.request(Method::DELETE, &path, None).await?;
        Ok(())
    }
}

/// Annotation view over a backend `Service`.
pub struct BackendService<'a> {
    service: &'a Service,
}

impl<'a> BackendService<'a> {
    #[must_use]
    pub fn new(service: &'a Service) -> Self {
        Self { service }
    }

    fn annotation(&self, key: &str) -> Option<&'a str> {
        let service: &'a Service = self.service;
        service
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn flag(&self, key: &'static str) -> Result<bool, OperatorError> {
        match self.annotation(key) {
            None => Ok(false),
            Some(value) => value
                .to_ascii_lowercase()
                .parse::<bool>()
                .map_err(|_| OperatorError::InvalidAnnotation {
                    key,
                    value: value.to_string(),
                    reason: "expected true or false",
                }),
        }
    }

    /// `true` when `apibridge.io/enabled` is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidAnnotation`] for a value that is not a boolean.
    pub fn is_enabled(&self) -> Result<bool, OperatorError> {
        self.flag(ANNOTATION_ENABLED)
    }

    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidAnnotation`] for a value that is not a boolean.
    pub fn https(&self) -> Result<bool, OperatorError> {
        self.flag(ANNOTATION_HTTPS)
    }

    /// Annotated port, else the Service's first port, else 80.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidAnnotation`] for a value outside 1-65535.
    pub fn port(&self) -> Result<u16, OperatorError> {
        if let Some(value) = self.annotation(ANNOTATION_PORT) {
            return value
                .parse::<u16>()
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| OperatorError::InvalidAnnotation {
                    key: ANNOTATION_PORT,
                    value: value.to_string(),
                    reason: "expected a port number between 1 and 65535",
                });
        }

        let first_port = self
            .service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .and_then(|ports| ports.first())
            .and_then(|p| u16::try_from(p.port).ok());
        Ok(first_port.unwrap_or(DEFAULT_BACKEND_PORT))
    }

    #[must_use]
    pub fn spec_path(&self) -> String {
        self.annotation(ANNOTATION_SPEC_PATH)
            .unwrap_or(DEFAULT_SPEC_PATH)
            .trim_start_matches('/')
            .to_string()
    }

    /// # Errors
    ///
    /// Returns [`OperatorError::InvalidAnnotation`] for a format other than `json` / `yaml`.
    pub fn spec_format(&self) -> Result<SpecFormat, OperatorError> {
        match self.annotation(ANNOTATION_SPEC_FORMAT) {
            None => Ok(SpecFormat::default()),
            Some(value) => value
                .parse::<SpecFormat>()
                .map_err(|()| OperatorError::InvalidAnnotation {
                    key: ANNOTATION_SPEC_FORMAT,
                    value: value.to_string(),
                    reason: "expected json or yaml",
                }),
        }
    }

    #[must_use]
    pub fn group(&self) -> Option<String> {
        self.annotation(LABEL_GROUP).map(str::to_ascii_lowercase)
    }

    /// In-cluster host name: `<name>.<namespace>.svc`.
    #[must_use]
    pub fn host(&self) -> String {
        let namespace = self.service.namespace().unwrap_or_else(|| "default".into());
        format!("{}.{namespace}.svc", self.service.name_any())
    }

    /// Settings for reaching the backend behind this Service.
    ///
    /// # Errors
    ///
    /// Returns the first malformed annotation.
    pub fn settings(&self) -> Result<BackendSettings, OperatorError> {
        Ok(BackendSettings {
            host: self.host(),
            port: self.port()?,
            https: self.https()?,
            spec_path: self.spec_path(),
            spec_format: self.spec_format()?,
            group: self.group(),
        })
    }
}

/// Find the backend Service in `namespace`.
///
/// Services with a malformed annotation are skipped with a warning. When more than one
/// Service is enabled, the first by name wins.
///
/// # Errors
///
/// Returns an error if the Services cannot be listed.
pub async fn discover_backend(client: Client, namespace: &str) -> Result<Option<BackendSettings>> {
    let api: Api<Service> = Api::namespaced(client, namespace);
    let mut params = ListParams::default().limit(KUBE_LIST_PAGE_SIZE);

    let mut services = Vec::new();
    loop {
        let page = retry_api_call(|| async { api.list(&params).await }, "list Services").await?;
        services.extend(page.items);
        match page.metadata.continue_ {
            Some(token) if !token.is_empty() => params.continue_token = Some(token),
            _ => break,
        }
    }

    Ok(select_backend(&services))
}

/// Pick the enabled Service (first by name) and read its settings.
#[must_use]
pub fn select_backend(services: &[Service]) -> Option<BackendSettings> {
    let mut candidates: Vec<&Service> = services
        .iter()
        .filter(|svc| match BackendService::new(svc).is_enabled() {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(service = %svc.name_any(), error = %e, "Skipping Service");
                false
            }
        })
        .collect();
    candidates.sort_by_key(|svc| svc.name_any());

    if candidates.len() > 1 {
        warn!(
            count = candidates.len(),
            chosen = %candidates[0].name_any(),
            "More than one backend Service is enabled"
        );
    }

    candidates
        .into_iter()
        .find_map(|svc| match BackendService::new(svc).settings() {
            Ok(settings) => {
                info!(
                    service = %svc.name_any(),
                    url = %settings.base_url(),
                    "Discovered backend Service"
                );
                Some(settings)
            }
            Err(e) => {
                warn!(service = %svc.name_any(), error = %e, "Skipping Service");
                None
            }
        })
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod backend_tests;
