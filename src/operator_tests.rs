// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `operator.rs`

#[cfg(test)]
mod tests {
    use super::super::{start_streams, stop_stale_streams, Bridge, ResyncSummary, StreamOptions};
    use crate::config::FanOutMode;
    use crate::crd::CrdDescriptor;
    use crate::openapi::{CollectionLookup, LookupError, Route};
    use crate::ordering::OrdinalOrdering;
    use crate::reconcilers::crds::CrdClient;
    use crate::reconcilers::dispatch::{BackendApi, DispatchOutcome};
    use crate::resource::{EventType, ResourceObject, WatchSubscription};
    use crate::tasks::TaskRegistry;
    use crate::watch::{ResourceObjectQueue, WatchSource};
    use anyhow::Result;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream, StreamExt};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Lists nothing and holds every watch open without events.
    struct QuietSource;

    #[async_trait]
    impl WatchSource for QuietSource {
        async fn list(&self, _subscription: &WatchSubscription) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }

        async fn watch(
            &self,
            _subscription: &WatchSubscription,
        ) -> Result<BoxStream<'static, Result<(EventType, Value)>>> {
            Ok(stream::pending().boxed())
        }
    }

    /// The cluster serves no pre-existing collection.
    struct NothingServed;

    #[async_trait]
    impl CollectionLookup for NothingServed {
        async fn lookup(&self, _group: &str, _version: &str, _plural: &str) -> Result<(), LookupError> {
            Err(LookupError::NotFound)
        }
    }

    /// CRDs kept in memory, so a second pass sees what the first one created.
    #[derive(Default)]
    struct MemoryCrdClient {
        crds: Mutex<Vec<CrdDescriptor>>,
    }

    #[async_trait]
    impl CrdClient for MemoryCrdClient {
        async fn list_managed(&self, group: &str) -> Result<Vec<CrdDescriptor>> {
            Ok(self
                .crds
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.group == group)
                .cloned()
                .collect())
        }

        async fn create(&self, crd: &CrdDescriptor) -> Result<()> {
            self.crds.lock().unwrap().push(crd.clone());
            Ok(())
        }

        async fn replace(&self, crd: &CrdDescriptor) -> Result<()> {
            let mut crds = self.crds.lock().unwrap();
            crds.retain(|c| c.name() != crd.name());
            crds.push(crd.clone());
            Ok(())
        }

        async fn delete(&self, name: &str) -> Result<()> {
            self.crds.lock().unwrap().retain(|c| c.name() != name);
            Ok(())
        }
    }

    /// Records the request path of every forwarded object.
    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BackendApi for RecordingBackend {
        async fn add_or_update(&self, route: &Route, obj: &ResourceObject) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(route.put.request_path(obj.namespace(), obj.name()));
            Ok(())
        }

        async fn delete(&self, route: &Route, obj: &ResourceObject) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(route.delete.request_path(obj.namespace(), obj.name()));
            Ok(())
        }
    }

    fn options() -> StreamOptions {
        StreamOptions {
            fan_out: FanOutMode::Sequential,
            reconnect_delay: Duration::from_millis(10),
            data_path: None,
        }
    }

    fn widget_crd() -> CrdDescriptor {
        CrdDescriptor::new("V1Widget", "example.com", true, "v1", json!({"type": "object"}))
    }

    fn op() -> Value {
        json!({ "responses": { "200": { "description": "ok" } } })
    }

    /// Document declaring one namespaced kind per entry of `kinds` (lowercased in paths).
    fn document(kinds: &[&str]) -> Value {
        let mut paths = serde_json::Map::new();
        let mut schemas = serde_json::Map::new();
        for kind in kinds {
            let path = format!("/./v1/{}/{{namespace}}/{{name}}", kind.to_ascii_lowercase());
            paths.insert(path, json!({ "put": op(), "delete": op() }));
            schemas.insert(
                (*kind).to_string(),
                json!({ "type": "object", "properties": { "size": { "type": "integer" } } }),
            );
        }
        json!({
            "openapi": "3.0.1",
            "info": { "title": "example", "version": "1" },
            "paths": paths,
            "components": { "schemas": schemas }
        })
    }

    fn object(kind: &str, rv: &str) -> ResourceObject {
        ResourceObject::new(
            EventType::Added,
            json!({
                "apiVersion": "example.com/v1",
                "kind": kind,
                "metadata": { "namespace": "ns", "name": "w", "resourceVersion": rv }
            }),
        )
        .with_source(&format!("example.com/v1/{}", kind.to_ascii_lowercase()))
    }

    fn bridge(backend: &Arc<RecordingBackend>) -> Bridge {
        Bridge::new(
            backend.clone(),
            Arc::new(QuietSource),
            Arc::new(OrdinalOrdering),
            options(),
            false,
        )
    }

    #[tokio::test]
    async fn test_streams_are_registered_once_per_collection() {
        let registry = TaskRegistry::new();
        let queue = Arc::new(ResourceObjectQueue::new(Arc::new(OrdinalOrdering)));
        let source: Arc<dyn WatchSource> = Arc::new(QuietSource);
        let token = CancellationToken::new();
        let subs = vec![
            widget_crd().subscription().unwrap(),
            WatchSubscription::new(None, "v1", "configmaps").unwrap(),
        ];

        let started = start_streams(&registry, &subs, &source, &queue, &options(), &token)
            .await
            .unwrap();
        assert_eq!(started, 2);
        assert_eq!(
            registry.names().await,
            vec![
                "stream:example.com/v1/v1widget".to_string(),
                "stream:v1/configmaps".to_string(),
            ]
        );

        let again = start_streams(&registry, &subs, &source, &queue, &options(), &token)
            .await
            .unwrap();
        assert_eq!(again, 0, "running streams are left alone");

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_streams_are_stopped() {
        let registry = TaskRegistry::new();
        let queue = Arc::new(ResourceObjectQueue::new(Arc::new(OrdinalOrdering)));
        let source: Arc<dyn WatchSource> = Arc::new(QuietSource);
        let token = CancellationToken::new();

        let gadget = CrdDescriptor::new("V1Gadget", "example.com", false, "v1", json!({}));
        let subs = vec![
            widget_crd().subscription().unwrap(),
            gadget.subscription().unwrap(),
        ];
        start_streams(&registry, &subs, &source, &queue, &options(), &token)
            .await
            .unwrap();

        let stopped = stop_stale_streams(&registry, &[gadget.subscription().unwrap()]).await;

        assert_eq!(stopped, 1);
        assert_eq!(
            registry.names().await,
            vec!["stream:example.com/v1/v1gadget".to_string()]
        );
        assert!(!token.is_cancelled(), "the root token is untouched");

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_stale_on_empty_registry_is_a_no_op() {
        let registry = TaskRegistry::new();

        assert_eq!(stop_stale_streams(&registry, &[]).await, 0);
        assert!(registry.names().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_installs_crds_routes_and_streams() {
        let backend = Arc::new(RecordingBackend::default());
        let bridge = bridge(&backend);
        let crds = MemoryCrdClient::default();
        let token = CancellationToken::new();

        bridge.start_dispatcher(&token).await.unwrap();
        let summary = bridge
            .apply(&document(&["V1Widget", "V1Gadget"]), "example.com", &NothingServed, &crds, &token)
            .await
            .unwrap();

        assert_eq!(
            summary,
            ResyncSummary {
                crds_applied: 2,
                routes: 2,
                streams_started: 2,
                streams_stopped: 0,
            }
        );
        assert_eq!(crds.crds.lock().unwrap().len(), 2);
        assert_eq!(
            bridge.registry().names().await,
            vec![
                "dispatcher".to_string(),
                "stream:example.com/v1/v1gadget".to_string(),
                "stream:example.com/v1/v1widget".to_string(),
            ]
        );
        assert_eq!(
            bridge.dispatcher().dispatch(&object("V1Gadget", "1")).await,
            DispatchOutcome::Forwarded
        );

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_reapply_follows_the_new_document() {
        let backend = Arc::new(RecordingBackend::default());
        let bridge = bridge(&backend);
        let crds = MemoryCrdClient::default();
        let token = CancellationToken::new();

        bridge.start_dispatcher(&token).await.unwrap();
        bridge
            .apply(&document(&["V1Widget", "V1Gadget"]), "example.com", &NothingServed, &crds, &token)
            .await
            .unwrap();

        let summary = bridge
            .apply(&document(&["V1Widget", "V1Sprocket"]), "example.com", &NothingServed, &crds, &token)
            .await
            .unwrap();

        assert_eq!(
            summary,
            ResyncSummary {
                crds_applied: 1,
                routes: 2,
                streams_started: 1,
                streams_stopped: 1,
            },
            "the unchanged widget is left alone"
        );
        assert_eq!(
            bridge.registry().names().await,
            vec![
                "dispatcher".to_string(),
                "stream:example.com/v1/v1sprocket".to_string(),
                "stream:example.com/v1/v1widget".to_string(),
            ],
            "the dispatcher survives a resync"
        );

        let dispatcher = bridge.dispatcher();
        assert_eq!(
            dispatcher.dispatch(&object("V1Gadget", "1")).await,
            DispatchOutcome::Failed,
            "the dropped kind has no route anymore"
        );
        assert_eq!(
            dispatcher.dispatch(&object("V1Sprocket", "1")).await,
            DispatchOutcome::Forwarded
        );
        assert_eq!(
            *backend.calls.lock().unwrap(),
            vec!["/example.com/v1/v1sprocket/ns/w".to_string()]
        );
        assert!(!token.is_cancelled());

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_apply_keeps_running_streams() {
        let backend = Arc::new(RecordingBackend::default());
        let bridge = bridge(&backend);
        let crds = MemoryCrdClient::default();
        let token = CancellationToken::new();

        bridge
            .apply(&document(&["V1Widget"]), "example.com", &NothingServed, &crds, &token)
            .await
            .unwrap();

        let not_openapi = json!({ "swagger": "2.0" });
        assert!(bridge
            .apply(&not_openapi, "example.com", &NothingServed, &crds, &token)
            .await
            .is_err());

        assert_eq!(
            bridge.registry().names().await,
            vec!["stream:example.com/v1/v1widget".to_string()]
        );
        assert_eq!(
            bridge.dispatcher().dispatch(&object("V1Widget", "1")).await,
            DispatchOutcome::Forwarded
        );

        bridge.shutdown().await;
    }
}
