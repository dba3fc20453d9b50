// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `known_kind.rs`

#[cfg(test)]
mod tests {
    use super::super::{candidate_plurals, resolve_known_kind, CollectionLookup, LookupError};
    use crate::openapi::endpoint::ApiEndpoint;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use reqwest::Method;
    use std::sync::Mutex;

    struct FakeLookup {
        served: Vec<&'static str>,
        broken: Option<&'static str>,
        asked: Mutex<Vec<String>>,
    }

    impl FakeLookup {
        fn serving(served: Vec<&'static str>) -> Self {
            Self {
                served,
                broken: None,
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CollectionLookup for FakeLookup {
        async fn lookup(&self, _group: &str, _version: &str, plural: &str) -> Result<(), LookupError> {
            self.asked.lock().unwrap().push(plural.to_string());
            if self.broken == Some(plural) {
                return Err(LookupError::Other(anyhow!("connection reset")));
            }
            if self.served.iter().any(|s| *s == plural) {
                Ok(())
            } else {
                Err(LookupError::NotFound)
            }
        }
    }

    fn configmap_endpoint() -> ApiEndpoint {
        ApiEndpoint::parse("/-/v1/v1configmap/{namespace}/{name}", Method::PUT, "example.com")
            .unwrap()
    }

    #[test]
    fn test_candidate_order() {
        assert_eq!(
            candidate_plurals("v1", "v1configmap"),
            vec!["v1configmap", "configmaps", "configmap", "v1configmaps"]
        );
    }

    #[test]
    fn test_candidate_plural_rules() {
        assert_eq!(candidate_plurals("v1", "v1ingress")[1], "ingresses");
        assert_eq!(candidate_plurals("v1", "v1policy")[1], "policies");
        assert_eq!(candidate_plurals("v1", "v1gateway")[1], "gateways");
        assert_eq!(candidate_plurals("v1", "v1endpoints")[2], "endpoint");
    }

    #[tokio::test]
    async fn test_first_served_candidate_wins() {
        let lookup = FakeLookup::serving(vec!["configmaps", "configmap"]);

        let sub = resolve_known_kind(&lookup, &configmap_endpoint())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(sub.group, "");
        assert_eq!(sub.version, "v1");
        assert_eq!(sub.plural, "configmaps");
        assert_eq!(
            *lookup.asked.lock().unwrap(),
            vec!["v1configmap", "configmaps"]
        );
    }

    #[tokio::test]
    async fn test_unresolved_when_nothing_is_served() {
        let lookup = FakeLookup::serving(vec![]);
        assert!(resolve_known_kind(&lookup, &configmap_endpoint())
            .await
            .unwrap()
            .is_none());
        assert_eq!(lookup.asked.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_other_failures_abort_resolution() {
        let lookup = FakeLookup {
            served: vec!["configmap"],
            broken: Some("configmaps"),
            asked: Mutex::new(Vec::new()),
        };

        let err = resolve_known_kind(&lookup, &configmap_endpoint())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("connection reset"));
        assert_eq!(lookup.asked.lock().unwrap().len(), 2);
    }
}
