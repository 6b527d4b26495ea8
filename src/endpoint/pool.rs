//! Pool of interchangeable RPC endpoints
//!
//! Every network call goes through [`EndpointPool::execute`], which picks
//! the healthiest endpoint, bounds the call with a timeout and feeds the
//! outcome back into that endpoint's health.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::health::{HealthPolicy, HealthSnapshot, HealthTracker};
use crate::config::{mask_url, RpcConfig};
use crate::error::{Error, ErrorClass, Result};

/// Address of one RPC endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Index into the pool, stable for the session
    pub id: usize,
    pub url: String,
    pub ws_url: String,
}

impl Endpoint {
    /// Url safe for logs
    pub fn display_url(&self) -> String {
        mask_url(&self.url)
    }
}

/// Health view of one endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub url: String,
    pub healthy: bool,
    #[serde(flatten)]
    pub health: HealthSnapshot,
}

pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
    health: Mutex<Vec<HealthTracker>>,
    policy: HealthPolicy,
    timeout: Duration,
    /// Rotates selection among equally healthy endpoints
    cursor: AtomicUsize,
}

impl EndpointPool {
    /// Build the pool from the configured endpoint list
    pub fn new(config: &RpcConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }

        let endpoints: Vec<Endpoint> = config
            .endpoints
            .iter()
            .enumerate()
            .map(|(id, e)| Endpoint {
                id,
                url: e.url.clone(),
                ws_url: e.websocket_url(),
            })
            .collect();
        let health = vec![HealthTracker::new(); endpoints.len()];

        Ok(Self {
            endpoints,
            health: Mutex::new(health),
            policy: HealthPolicy::from(config),
            timeout: config.timeout(),
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HealthTracker>> {
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Best endpoint that is not rate limited
    pub fn acquire(&self) -> Endpoint {
        self.acquire_excluding(None)
    }

    /// Best endpoint other than `exclude`, used when retrying elsewhere.
    ///
    /// Falls back to the least-bad endpoint when every candidate is rate
    /// limited, so callers always get something to try.
    pub fn acquire_excluding(&self, exclude: Option<usize>) -> Endpoint {
        let health = self.lock();
        let now = Instant::now();
        let n = self.endpoints.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;

        let mut candidates: Vec<usize> = (0..n)
            .map(|i| (start + i) % n)
            .filter(|i| Some(*i) != exclude || n == 1)
            .collect();
        if candidates.is_empty() {
            candidates = (0..n).collect();
        }

        let available: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|i| !health[*i].is_rate_limited(now))
            .collect();

        let chosen = if available.is_empty() {
            // Everything is rate limited: pick the one that frees up first
            candidates
                .iter()
                .copied()
                .min_by_key(|i| health[*i].rate_limited_until)
                .unwrap_or(0)
        } else {
            let mut best = available[0];
            for &i in &available[1..] {
                let (a, b) = (&health[i], &health[best]);
                if a.score > b.score || (a.score == b.score && a.avg_latency_ms < b.avg_latency_ms)
                {
                    best = i;
                }
            }
            best
        };

        self.endpoints[chosen].clone()
    }

    /// Feed a call outcome back into the endpoint's health
    pub fn report(&self, endpoint: &Endpoint, latency: Duration, success: bool) {
        let mut health = self.lock();
        let Some(tracker) = health.get_mut(endpoint.id) else {
            return;
        };
        let was_healthy = tracker.is_healthy(&self.policy);
        if success {
            tracker.record_success(latency, &self.policy);
        } else {
            tracker.record_failure(latency, &self.policy);
        }
        let healthy = tracker.is_healthy(&self.policy);

        if was_healthy && !healthy {
            warn!(
                endpoint = %endpoint.display_url(),
                score = tracker.score,
                failures = tracker.consecutive_failures,
                "Endpoint became unhealthy"
            );
        } else if !was_healthy && healthy {
            debug!(endpoint = %endpoint.display_url(), score = tracker.score, "Endpoint recovered");
        }
    }

    /// Mark an endpoint rate limited until `retry_after` elapses
    pub fn report_rate_limited(&self, endpoint: &Endpoint, retry_after: Option<Duration>) {
        let mut health = self.lock();
        if let Some(tracker) = health.get_mut(endpoint.id) {
            tracker.record_rate_limit(retry_after, &self.policy);
            debug!(
                endpoint = %endpoint.display_url(),
                retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                "Endpoint rate limited"
            );
        }
    }

    /// Run one call against the best endpoint with a bounded timeout.
    ///
    /// Transient failures and timeouts penalize the endpoint. Structural
    /// errors (the endpoint answered, the data was bad) count as a success
    /// for health purposes.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Endpoint) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let endpoint = self.acquire();
        self.execute_on(endpoint, f).await
    }

    /// Like [`execute`](Self::execute) but retries transient failures on a
    /// different endpoint, up to `attempts` calls in total.
    pub async fn execute_with_failover<T, F, Fut>(&self, attempts: usize, f: F) -> Result<T>
    where
        F: Fn(Endpoint) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_id = None;
        let mut last_err = Error::NoEndpoints;
        for _ in 0..attempts.max(1) {
            let endpoint = self.acquire_excluding(last_id);
            last_id = Some(endpoint.id);
            match self.execute_on(endpoint, &f).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => last_err = e,
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /// Run one call on a specific endpoint and report the outcome
    pub async fn execute_on<T, F, Fut>(&self, endpoint: Endpoint, f: F) -> Result<T>
    where
        F: FnOnce(Endpoint) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, f(endpoint.clone())).await;
        let latency = started.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                self.report(&endpoint, latency, true);
                Ok(value)
            }
            Ok(Err(Error::RateLimited { retry_after, .. })) => {
                self.report_rate_limited(&endpoint, Some(retry_after));
                Err(Error::RateLimited {
                    endpoint: endpoint.display_url(),
                    retry_after,
                })
            }
            Ok(Err(e)) => {
                self.report(&endpoint, latency, e.class() != ErrorClass::Transient);
                Err(e)
            }
            Err(_) => {
                self.report(&endpoint, latency, false);
                Err(Error::RpcTimeout(self.timeout.as_millis() as u64))
            }
        }
    }

    /// True when no endpoint is above the unhealthy threshold
    pub fn all_unhealthy(&self) -> bool {
        let health = self.lock();
        health.iter().all(|t| !t.is_healthy(&self.policy))
    }

    /// Mean EWMA latency over endpoints that have served calls
    pub fn avg_latency_ms(&self) -> f64 {
        let health = self.lock();
        let used: Vec<f64> = health
            .iter()
            .filter(|t| t.total_calls > 0)
            .map(|t| t.avg_latency_ms)
            .collect();
        if used.is_empty() {
            0.0
        } else {
            used.iter().sum::<f64>() / used.len() as f64
        }
    }

    pub fn statuses(&self) -> Vec<EndpointStatus> {
        let health = self.lock();
        self.endpoints
            .iter()
            .zip(health.iter())
            .map(|(endpoint, tracker)| EndpointStatus {
                url: endpoint.display_url(),
                healthy: tracker.is_healthy(&self.policy),
                health: tracker.snapshot(),
            })
            .collect()
    }
}
