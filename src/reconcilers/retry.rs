// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retries for the one-shot Kubernetes calls made while reconciling CRDs and discovering the
//! backend Service.
//!
//! Only rate limiting (429), server errors (5xx) and transport failures are retried. Watch
//! streams reconnect on their own fixed delay, and forwarding to the backend is never retried.

use crate::constants::{
    API_RETRY_BUDGET_SECS, API_RETRY_FIRST_DELAY_MILLIS, API_RETRY_JITTER,
    API_RETRY_MAX_DELAY_SECS,
};
use anyhow::Result;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Doubling delay schedule with a per-delay ceiling and an overall time budget.
#[derive(Debug, Clone)]
pub struct Backoff {
    upcoming: Duration,
    max_delay: Duration,
    budget: Duration,
    jitter: f64,
    started: Instant,
}

impl Backoff {
    /// Schedule starting at `first`, never exceeding `max_delay` per step, giving up once
    /// `budget` has elapsed since construction. No jitter.
    #[must_use]
    pub fn new(first: Duration, max_delay: Duration, budget: Duration) -> Self {
        Self {
            upcoming: first,
            max_delay,
            budget,
            jitter: 0.0,
            started: Instant::now(),
        }
    }

    /// Spread every delay uniformly over `±fraction` of its nominal value.
    #[must_use]
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// Nominal (unjittered) delay the next call to [`Backoff::next_delay`] is based on.
    #[must_use]
    pub fn upcoming(&self) -> Duration {
        self.upcoming
    }

    /// Delay to wait before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.started.elapsed() >= self.budget {
            return None;
        }

        let nominal = self.upcoming;
        self.upcoming = nominal.saturating_mul(2).min(self.max_delay);
        Some(self.spread(nominal))
    }

    fn spread(&self, nominal: Duration) -> Duration {
        if self.jitter == 0.0 {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        nominal.mul_f64(factor)
    }
}

impl Default for Backoff {
    /// 100 ms, 200 ms, 400 ms, ... capped at 30 s, for at most 5 minutes, ±10% jitter.
    fn default() -> Self {
        Self::new(
            Duration::from_millis(API_RETRY_FIRST_DELAY_MILLIS),
            Duration::from_secs(API_RETRY_MAX_DELAY_SECS),
            Duration::from_secs(API_RETRY_BUDGET_SECS),
        )
        .with_jitter(API_RETRY_JITTER)
    }
}

/// Run `call` until it succeeds, fails permanently, or the default [`Backoff`] runs out.
///
/// The `kube::Error` of the last attempt stays in the returned error's chain, so callers can
/// still classify it (for example with [`crate::errors::is_forbidden`]).
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient one once retrying stops.
///
/// # Example
///
/// ```no_run
/// use apibridge::reconcilers::retry::retry_api_call;
/// use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
/// use kube::{Api, Client};
///
/// # async fn example() -> anyhow::Result<()> {
/// let api: Api<CustomResourceDefinition> = Api::all(Client::try_default().await?);
/// let crd = retry_api_call(
///     || async { api.get("v1widget.example.com").await },
///     "get CRD v1widget.example.com",
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_api_call<T, F, Fut>(call: F, what: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    retry_with(Backoff::default(), call, what).await
}

/// [`retry_api_call`] with an explicit schedule.
///
/// # Errors
///
/// Same as [`retry_api_call`].
pub async fn retry_with<T, F, Fut>(mut backoff: Backoff, mut call: F, what: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut attempt: u32 = 1;
    loop {
        let err = match call().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = what, attempt, "Kubernetes API call succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !is_transient(&err) {
            debug!(operation = what, error = %err, "Kubernetes API call failed permanently");
            return Err(err.into());
        }

        let Some(delay) = backoff.next_delay() else {
            warn!(operation = what, attempt, error = %err, "Giving up on Kubernetes API call");
            return Err(anyhow::Error::from(err)
                .context(format!("{what}: gave up after {attempt} attempts")));
        };

        warn!(
            operation = what,
            attempt,
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Transient Kubernetes API error"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// 429, 5xx and transport failures are worth another attempt; everything else is not.
fn is_transient(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(status) => status.code == 429 || (500..600).contains(&status.code),
        kube::Error::Service(_) | kube::Error::HyperError(_) => true,
        _ => false,
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
