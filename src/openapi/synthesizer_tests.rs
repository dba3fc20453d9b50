// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `synthesizer.rs`

#[cfg(test)]
mod tests {
    use super::super::{parse_document, synthesize};
    use crate::config::SpecFormat;
    use crate::crd::CrdScope;
    use crate::openapi::known_kind::{CollectionLookup, LookupError};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// Serves `configmaps` only.
    struct CoreLookup;

    #[async_trait]
    impl CollectionLookup for CoreLookup {
        async fn lookup(&self, group: &str, _version: &str, plural: &str) -> Result<(), LookupError> {
            if group.is_empty() && plural == "configmaps" {
                Ok(())
            } else {
                Err(LookupError::NotFound)
            }
        }
    }

    fn op() -> Value {
        json!({ "responses": { "200": { "description": "ok" } } })
    }

    fn document() -> Value {
        json!({
            "openapi": "3.0.1",
            "info": { "title": "example", "version": "1" },
            "paths": {
                "/health": { "get": op() },
                "/./v1/v1widget/{namespace}/{name}": { "put": op(), "delete": op(), "get": op() },
                "/./v1/v1gadget/-/{name}": { "put": op(), "delete": op() },
                "/./v1/v1mismatch/{namespace}/{name}": { "put": op() },
                "/./v1/v1mismatch/-/{name}": { "delete": op() },
                "/-/v1/v1configmap/{namespace}/{name}": { "put": op(), "delete": op() },
                "/-/v1/v1mystery/{namespace}/{name}": { "put": op(), "delete": op() },
                "/not/a/valid/path": { "put": op() }
            },
            "components": { "schemas": {
                "V1Widget": {
                    "type": "object",
                    "properties": {
                        "metadata": { "$ref": "#/components/schemas/V1ObjectMeta" },
                        "size": { "type": "integer" }
                    }
                },
                "V1Gadget": { "type": "object", "properties": { "on": { "type": "boolean" } } },
                "V1Mismatch": { "type": "object" },
                "V1ConfigMap": { "type": "object" },
                "V1Mystery": { "type": "object" },
                "V1ObjectMeta": { "type": "object" },
                "Helper": { "type": "string" }
            }}
        })
    }

    #[tokio::test]
    async fn test_synthesizes_crds_for_own_group() {
        let out = synthesize(&document(), "Example.com", &CoreLookup).await.unwrap();

        let names: Vec<String> = out.crds.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["v1gadget.example.com", "v1widget.example.com"]);

        let widget = out.crds.iter().find(|c| c.kind == "V1Widget").unwrap();
        assert_eq!(widget.scope, CrdScope::Namespaced);
        assert_eq!(widget.versions[0].name, "v1");
        assert!(widget.versions[0].schema["properties"].get("metadata").is_none());

        let gadget = out.crds.iter().find(|c| c.kind == "V1Gadget").unwrap();
        assert_eq!(gadget.scope, CrdScope::Cluster);
    }

    #[tokio::test]
    async fn test_known_kinds_are_resolved_or_skipped() {
        let out = synthesize(&document(), "example.com", &CoreLookup).await.unwrap();

        assert_eq!(out.known_kinds.len(), 1, "V1Mystery is not served by the cluster");
        assert_eq!(out.known_kinds[0].key(), "v1/configmaps");
        assert!(out.routes.contains_key("v1/configmaps"));
    }

    #[tokio::test]
    async fn test_routes_cover_every_watched_collection() {
        let out = synthesize(&document(), "example.com", &CoreLookup).await.unwrap();

        let subs = out.subscriptions().unwrap();
        assert_eq!(subs.len(), 3);
        for sub in subs {
            assert!(out.routes.contains_key(&sub.key()), "missing route for {sub}");
        }

        let widget = &out.routes["example.com/v1/v1widget"];
        assert_eq!(widget.put.request_path("ns", "w"), "/example.com/v1/v1widget/ns/w");
    }

    #[tokio::test]
    async fn test_namespace_mismatch_is_skipped() {
        let out = synthesize(&document(), "example.com", &CoreLookup).await.unwrap();
        assert!(out.crds.iter().all(|c| c.kind != "V1Mismatch"));
    }

    #[tokio::test]
    async fn test_resynthesis_reproduces_hashes() {
        let first = synthesize(&document(), "example.com", &CoreLookup).await.unwrap();
        let second = synthesize(&document(), "example.com", &CoreLookup).await.unwrap();

        let hashes = |s: &super::super::Synthesis| {
            s.crds.iter().map(|c| c.content_hash.clone()).collect::<Vec<_>>()
        };
        assert_eq!(hashes(&first), hashes(&second));
    }

    #[tokio::test]
    async fn test_openapi_2_is_rejected() {
        let doc = json!({ "swagger": "2.0", "paths": {} });
        let err = synthesize(&doc, "example.com", &CoreLookup).await.unwrap_err();
        assert!(err.to_string().contains("not version 3"));
    }

    #[test]
    fn test_parse_document_yaml_and_json() {
        let yaml = "openapi: 3.0.0\npaths: {}\n";
        let json_doc = r#"{"openapi": "3.0.0", "paths": {}}"#;

        assert_eq!(
            parse_document(yaml, SpecFormat::Yaml).unwrap(),
            parse_document(json_doc, SpecFormat::Json).unwrap()
        );
        assert!(parse_document("{", SpecFormat::Json).is_err());
    }
}
