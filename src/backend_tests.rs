// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `backend.rs`

#[cfg(test)]
mod tests {
    use super::super::{select_backend, BackendClient, BackendService};
    use crate::config::{BackendSettings, SpecFormat};
    use crate::errors::OperatorError;
    use crate::openapi::{ApiEndpoint, Route};
    use crate::reconcilers::dispatch::BackendApi;
    use crate::resource::{EventType, ResourceObject};
    use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use reqwest::Method;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer, format: SpecFormat) -> BackendSettings {
        let address = server.address();
        BackendSettings {
            host: address.ip().to_string(),
            port: address.port(),
            https: false,
            spec_path: "swagger/v1/swagger.json".to_string(),
            spec_format: format,
            group: None,
        }
    }

    fn client_for(server: &MockServer) -> BackendClient {
        BackendClient::new(settings_for(server, SpecFormat::Json)).unwrap()
    }

    fn widget_route() -> Route {
        let path = "/./v1/v1widget/{namespace}/{name}";
        Route {
            put: ApiEndpoint::parse(path, Method::PUT, "example.com").unwrap(),
            delete: ApiEndpoint::parse(path, Method::DELETE, "example.com").unwrap(),
        }
    }

    fn widget(ty: EventType) -> ResourceObject {
        ResourceObject::new(
            ty,
            json!({
                "apiVersion": "example.com/v1",
                "kind": "V1Widget",
                "metadata": { "namespace": "ns", "name": "w", "resourceVersion": "3" },
                "size": 4
            }),
        )
    }

    fn service(annotations: &[(&str, &str)], port: Option<i32>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("backend".to_string()),
                namespace: Some("apps".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            spec: port.map(|port| ServiceSpec {
                ports: Some(vec![ServicePort {
                    port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.is_healthy().await);
        assert!(client.wait_until_healthy(&CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn test_wait_until_healthy_stops_on_cancel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        token.cancel();
        assert!(!client_for(&server).wait_until_healthy(&token).await);
    }

    #[tokio::test]
    async fn test_fetch_spec_yaml() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/swagger/v1/swagger.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "openapi: 3.0.1\ninfo:\n  title: widgets\npaths: {}\n",
            ))
            .mount(&server)
            .await;

        let client = BackendClient::new(settings_for(&server, SpecFormat::Yaml)).unwrap();
        let document = client.fetch_spec().await.unwrap();
        assert_eq!(document["info"]["title"], "widgets");
    }

    #[tokio::test]
    async fn test_fetch_spec_rejects_swagger_2() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/swagger/v1/swagger.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"swagger": "2.0"}"#))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_spec().await.unwrap_err();
        assert!(matches!(err, OperatorError::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn test_discover_group_from_object_or_string() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"group": "Example.COM"}"#))
            .mount(&server)
            .await;
        assert_eq!(client_for(&server).discover_group().await.unwrap(), "example.com");

        let plain = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_string("\"widgets.io\""))
            .mount(&plain)
            .await;
        assert_eq!(client_for(&plain).discover_group().await.unwrap(), "widgets.io");
    }

    #[tokio::test]
    async fn test_forwarding_substitutes_namespace_and_name() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/example.com/v1/v1widget/ns/w"))
            .and(body_partial_json(json!({"kind": "V1Widget", "size": 4})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/example.com/v1/v1widget/ns/w"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let route = widget_route();
        client
            .add_or_update(&route, &widget(EventType::Added))
            .await
            .unwrap();
        client
            .delete(&route, &widget(EventType::Deleted))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_forwarding_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(422).set_body_string("size too large"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .add_or_update(&widget_route(), &widget(EventType::Modified))
            .await
            .unwrap_err();

        match err.downcast_ref::<OperatorError>() {
            Some(OperatorError::Backend { status, body, .. }) => {
                assert_eq!(*status, 422);
                assert_eq!(body, "size too large");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_service_view_reads_annotations() {
        let svc = service(
            &[
                ("apibridge.io/enabled", "true"),
                ("apibridge.io/port", "8443"),
                ("apibridge.io/https", "TRUE"),
                ("apibridge.io/spec-path", "/openapi.yaml"),
                ("apibridge.io/spec-format", "yaml"),
                ("apibridge.io/group", "Example.com"),
            ],
            Some(80),
        );
        let view = BackendService::new(&svc);

        assert!(view.is_enabled().unwrap());
        let settings = view.settings().unwrap();
        assert_eq!(settings.base_url(), "https://backend.apps.svc:8443");
        assert_eq!(settings.spec_path, "openapi.yaml");
        assert_eq!(settings.spec_format, SpecFormat::Yaml);
        assert_eq!(settings.group.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_service_view_defaults() {
        let svc = service(&[("apibridge.io/enabled", "true")], Some(5000));
        let settings = BackendService::new(&svc).settings().unwrap();

        assert_eq!(settings.port, 5000);
        assert!(!settings.https);
        assert_eq!(settings.spec_path, "swagger/v1/swagger.json");
        assert_eq!(settings.spec_format, SpecFormat::Json);
        assert_eq!(settings.group, None);

        let bare = service(&[], None);
        assert_eq!(BackendService::new(&bare).port().unwrap(), 80);
        assert!(!BackendService::new(&bare).is_enabled().unwrap());
    }

    #[test]
    fn test_service_view_rejects_malformed_values() {
        let svc = service(
            &[
                ("apibridge.io/enabled", "yes"),
                ("apibridge.io/port", "0"),
                ("apibridge.io/spec-format", "xml"),
            ],
            None,
        );
        let view = BackendService::new(&svc);

        assert!(matches!(
            view.is_enabled(),
            Err(OperatorError::InvalidAnnotation { key: "apibridge.io/enabled", .. })
        ));
        assert!(matches!(
            view.port(),
            Err(OperatorError::InvalidAnnotation { key: "apibridge.io/port", .. })
        ));
        assert!(matches!(
            view.spec_format(),
            Err(OperatorError::InvalidAnnotation { key: "apibridge.io/spec-format", .. })
        ));
    }

    #[test]
    fn test_select_backend_skips_disabled_and_malformed() {
        let mut disabled = service(&[("apibridge.io/enabled", "false")], None);
        disabled.metadata.name = Some("a-disabled".to_string());
        let mut broken = service(
            &[("apibridge.io/enabled", "true"), ("apibridge.io/port", "x")],
            None,
        );
        broken.metadata.name = Some("b-broken".to_string());
        let mut good = service(&[("apibridge.io/enabled", "true")], Some(8080));
        good.metadata.name = Some("c-good".to_string());

        let settings = select_backend(&[disabled, broken, good]).unwrap();
        assert_eq!(settings.host, "c-good.apps.svc");
        assert_eq!(settings.port, 8080);

        assert!(select_backend(&[]).is_none());
    }
}
