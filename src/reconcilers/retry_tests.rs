// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `retry.rs`

#[cfg(test)]
mod tests {
    use super::super::{is_transient, retry_api_call, retry_with, Backoff};
    use kube::core::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(
            Status::failure(&format!("{reason} from test"), reason)
                .with_code(code)
                .boxed(),
        )
    }

    fn quick() -> Backoff {
        Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(4),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_default_schedule_doubles_and_caps() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.upcoming(), Duration::from_millis(100));

        let first = backoff.next_delay().unwrap();
        assert!(first >= Duration::from_millis(90) && first <= Duration::from_millis(110));
        assert_eq!(backoff.upcoming(), Duration::from_millis(200));

        for _ in 0..20 {
            backoff.next_delay();
        }
        assert_eq!(backoff.upcoming(), Duration::from_secs(30));
    }

    #[test]
    fn test_unjittered_schedule_is_exact() {
        let mut backoff = quick();
        let delays: Vec<Duration> = (0..4).map(|_| backoff.next_delay().unwrap()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1),
                Duration::from_millis(2),
                Duration::from_millis(4),
                Duration::from_millis(4),
            ]
        );
    }

    #[test]
    fn test_spent_budget_stops_the_schedule() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_secs(1), Duration::ZERO);
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn test_transient_classification() {
        for code in [429, 500, 503, 599] {
            assert!(is_transient(&api_error(code, "Transient")), "{code}");
        }
        for code in [400, 403, 404, 409, 422] {
            assert!(!is_transient(&api_error(code, "Permanent")), "{code}");
        }

        let refused: Box<dyn std::error::Error + Send + Sync> = Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(is_transient(&kube::Error::Service(refused)));
    }

    #[tokio::test]
    async fn test_forbidden_fails_on_first_attempt() {
        let attempts = AtomicUsize::new(0);

        let result: anyhow::Result<()> = retry_api_call(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(api_error(403, "Forbidden")) }
            },
            "create CRD",
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(crate::errors::is_forbidden(&err), "the kube error stays in the chain");
    }

    #[tokio::test]
    async fn test_transient_error_is_retried_until_success() {
        let attempts = AtomicUsize::new(0);

        let result = retry_with(
            quick(),
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(api_error(503, "ServiceUnavailable"))
                    } else {
                        Ok("listed")
                    }
                }
            },
            "list CRDs",
        )
        .await;

        assert_eq!(result.unwrap(), "listed");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_keeps_last_error() {
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(1), Duration::ZERO);

        let err = retry_with(
            backoff,
            || async { Err::<(), _>(api_error(500, "InternalError")) },
            "delete CRD v1widget.example.com",
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("gave up after 1 attempts"));
        assert!(matches!(
            err.downcast_ref::<kube::Error>(),
            Some(kube::Error::Api(status)) if status.code == 500
        ));
    }
}
