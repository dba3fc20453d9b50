// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `handler.rs`

#[cfg(test)]
mod tests {
    use super::super::{fan_out, panic_message, QueueHandler, ResourceObjectEventHandler};
    use crate::config::FanOutMode;
    use crate::ordering::OrdinalOrdering;
    use crate::resource::{EventType, ResourceObject};
    use crate::watch::queue::ResourceObjectQueue;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    struct Recorder {
        name: String,
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl ResourceObjectEventHandler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, obj: &ResourceObject, _token: &CancellationToken) -> Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, obj.name()));
            if self.fail {
                return Err(anyhow!("handler {} failed", self.name));
            }
            Ok(())
        }
    }

    fn sample() -> ResourceObject {
        ResourceObject::new(
            EventType::Added,
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm", "resourceVersion": "1"}}),
        )
    }

    fn recorders(seen: &Arc<Mutex<Vec<String>>>) -> Vec<Arc<dyn ResourceObjectEventHandler>> {
        vec![
            Arc::new(Recorder {
                name: "first".into(),
                seen: seen.clone(),
                fail: true,
            }),
            Arc::new(Recorder {
                name: "second".into(),
                seen: seen.clone(),
                fail: false,
            }),
        ]
    }

    #[tokio::test]
    async fn test_sequential_runs_in_order_despite_failure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handlers = recorders(&seen);

        fan_out(
            &handlers,
            &sample(),
            FanOutMode::Sequential,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(*seen.lock().unwrap(), vec!["first:cm", "second:cm"]);
    }

    #[tokio::test]
    async fn test_concurrent_reaches_every_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handlers = recorders(&seen);

        fan_out(
            &handlers,
            &sample(),
            FanOutMode::Concurrent,
            &CancellationToken::new(),
        )
        .await;

        let mut got = seen.lock().unwrap().clone();
        got.sort();
        assert_eq!(got, vec!["first:cm", "second:cm"]);
    }

    #[tokio::test]
    async fn test_queue_handler_enqueues() {
        let queue = Arc::new(ResourceObjectQueue::new(Arc::new(OrdinalOrdering)));
        let handler = QueueHandler::new(queue.clone());

        handler
            .handle(&sample(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.next().await.name(), "cm");
    }

    struct Panicker;

    #[async_trait]
    impl ResourceObjectEventHandler for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }

        async fn handle(&self, _obj: &ResourceObject, _token: &CancellationToken) -> Result<()> {
            panic!("handler bug");
        }
    }

    fn with_panicker(seen: &Arc<Mutex<Vec<String>>>) -> Vec<Arc<dyn ResourceObjectEventHandler>> {
        vec![
            Arc::new(Panicker),
            Arc::new(Recorder {
                name: "after".into(),
                seen: seen.clone(),
                fail: false,
            }),
        ]
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_siblings() {
        for mode in [FanOutMode::Sequential, FanOutMode::Concurrent] {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let handlers = with_panicker(&seen);

            fan_out(&handlers, &sample(), mode, &CancellationToken::new()).await;

            assert_eq!(*seen.lock().unwrap(), vec!["after:cm"], "{mode:?}");
        }
    }

    #[test]
    fn test_panic_message_reads_str_and_string_payloads() {
        let literal: Box<dyn std::any::Any + Send> = Box::new("static text");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("formatted text"));
        let other: Box<dyn std::any::Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(literal.as_ref()), "static text");
        assert_eq!(panic_message(owned.as_ref()), "formatted text");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
