//! Health scoring shared by RPC endpoints and market-data providers
//!
//! Health starts at 100 and is recomputed after every call from two
//! inputs: the consecutive-failure counter and the EWMA latency.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::config::{AggregatorConfig, RpcConfig};

/// Tunables for health scoring
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// EWMA smoothing factor for latency
    pub latency_alpha: f64,
    /// Health points lost per consecutive failure
    pub failure_penalty: f64,
    /// Latency below this costs nothing
    pub latency_baseline_ms: f64,
    /// Maximum health lost to latency alone
    pub max_latency_penalty: f64,
    /// Below this score a target counts as unhealthy
    pub unhealthy_below: f64,
    /// Cooldown when a rate limit carries no retry hint
    pub rate_limit_cooldown: Duration,
    /// Longest cooldown any retry hint can impose
    pub max_rate_limit_cooldown: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            latency_alpha: 0.3,
            failure_penalty: 20.0,
            latency_baseline_ms: 250.0,
            max_latency_penalty: 30.0,
            unhealthy_below: 30.0,
            rate_limit_cooldown: Duration::from_secs(10),
            max_rate_limit_cooldown: Duration::from_secs(600),
        }
    }
}

impl From<&RpcConfig> for HealthPolicy {
    fn from(config: &RpcConfig) -> Self {
        Self {
            latency_alpha: config.latency_alpha,
            failure_penalty: config.failure_penalty,
            latency_baseline_ms: config.latency_baseline_ms,
            unhealthy_below: config.unhealthy_below,
            rate_limit_cooldown: Duration::from_millis(config.rate_limit_cooldown_ms),
            ..Default::default()
        }
    }
}

impl From<&AggregatorConfig> for HealthPolicy {
    fn from(config: &AggregatorConfig) -> Self {
        Self {
            unhealthy_below: config.unhealthy_below,
            latency_baseline_ms: 1000.0,
            ..Default::default()
        }
    }
}

/// Mutable health state of one endpoint or provider
#[derive(Debug, Clone)]
pub struct HealthTracker {
    pub score: f64,
    pub avg_latency_ms: f64,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rate_limited_until: Option<Instant>,
    pub last_success: Option<Instant>,
    samples: u64,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self {
            score: 100.0,
            avg_latency_ms: 0.0,
            consecutive_failures: 0,
            total_calls: 0,
            total_failures: 0,
            rate_limited_until: None,
            last_success: None,
            samples: 0,
        }
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful call
    pub fn record_success(&mut self, latency: Duration, policy: &HealthPolicy) {
        self.total_calls += 1;
        self.observe_latency(latency, policy);
        // Successes decay the failure streak toward zero
        self.consecutive_failures /= 2;
        self.last_success = Some(Instant::now());
        self.recompute(policy);
    }

    /// Record a failed call (including timeouts)
    pub fn record_failure(&mut self, latency: Duration, policy: &HealthPolicy) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.observe_latency(latency, policy);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.recompute(policy);
    }

    /// Record a rate-limit response
    pub fn record_rate_limit(&mut self, retry_after: Option<Duration>, policy: &HealthPolicy) {
        self.total_calls += 1;
        self.total_failures += 1;
        let cooldown = retry_after
            .unwrap_or(policy.rate_limit_cooldown)
            .min(policy.max_rate_limit_cooldown);
        let now = Instant::now();
        self.rate_limited_until = Some(now.checked_add(cooldown).unwrap_or(now));
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.recompute(policy);
    }

    /// Check if the rate-limit reset time is still in the future
    pub fn is_rate_limited(&self, now: Instant) -> bool {
        self.rate_limited_until.is_some_and(|until| until > now)
    }

    pub fn is_healthy(&self, policy: &HealthPolicy) -> bool {
        self.score >= policy.unhealthy_below
    }

    /// Lifetime failure ratio
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_calls as f64
        }
    }

    fn observe_latency(&mut self, latency: Duration, policy: &HealthPolicy) {
        let ms = latency.as_secs_f64() * 1000.0;
        if self.samples == 0 {
            self.avg_latency_ms = ms;
        } else {
            self.avg_latency_ms =
                policy.latency_alpha * ms + (1.0 - policy.latency_alpha) * self.avg_latency_ms;
        }
        self.samples += 1;
    }

    fn recompute(&mut self, policy: &HealthPolicy) {
        let failure_penalty = self.consecutive_failures as f64 * policy.failure_penalty;
        let latency_penalty = ((self.avg_latency_ms - policy.latency_baseline_ms) / 50.0)
            .clamp(0.0, policy.max_latency_penalty);
        self.score = (100.0 - failure_penalty - latency_penalty).clamp(0.0, 100.0);
    }

    /// Serializable view for stats and the `check` command
    pub fn snapshot(&self) -> HealthSnapshot {
        let now = Instant::now();
        HealthSnapshot {
            score: self.score,
            avg_latency_ms: self.avg_latency_ms,
            consecutive_failures: self.consecutive_failures,
            total_calls: self.total_calls,
            total_failures: self.total_failures,
            rate_limited_for_ms: self
                .rate_limited_until
                .filter(|until| *until > now)
                .map(|until| (until - now).as_millis() as u64),
        }
    }
}

/// Point-in-time health view
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub score: f64,
    pub avg_latency_ms: f64,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rate_limited_for_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracker_is_fully_healthy() {
        let tracker = HealthTracker::new();
        assert_eq!(tracker.score, 100.0);
        assert!(tracker.is_healthy(&HealthPolicy::default()));
    }

    #[test]
    fn test_failures_lower_score_and_successes_decay_streak() {
        let policy = HealthPolicy::default();
        let mut tracker = HealthTracker::new();

        for _ in 0..4 {
            tracker.record_failure(Duration::from_millis(100), &policy);
        }
        assert_eq!(tracker.consecutive_failures, 4);
        assert_eq!(tracker.score, 20.0);
        assert!(!tracker.is_healthy(&policy));

        tracker.record_success(Duration::from_millis(100), &policy);
        assert_eq!(tracker.consecutive_failures, 2);
        tracker.record_success(Duration::from_millis(100), &policy);
        tracker.record_success(Duration::from_millis(100), &policy);
        assert_eq!(tracker.consecutive_failures, 0);
        assert_eq!(tracker.score, 100.0);
    }

    #[test]
    fn test_latency_ewma() {
        let policy = HealthPolicy {
            latency_alpha: 0.5,
            ..Default::default()
        };
        let mut tracker = HealthTracker::new();
        tracker.record_success(Duration::from_millis(100), &policy);
        assert!((tracker.avg_latency_ms - 100.0).abs() < 1e-9);
        tracker.record_success(Duration::from_millis(300), &policy);
        assert!((tracker.avg_latency_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_slow_endpoint_loses_health() {
        let policy = HealthPolicy::default();
        let mut tracker = HealthTracker::new();
        tracker.record_success(Duration::from_millis(1250), &policy);
        // (1250 - 250) / 50 = 20 points
        assert!((tracker.score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_limit_sets_reset_time() {
        let policy = HealthPolicy::default();
        let mut tracker = HealthTracker::new();
        tracker.record_rate_limit(Some(Duration::from_secs(60)), &policy);
        assert!(tracker.is_rate_limited(Instant::now()));
        assert!(!tracker.is_rate_limited(Instant::now() + Duration::from_secs(61)));
        assert!(tracker.snapshot().rate_limited_for_ms.is_some());
    }

    #[test]
    fn test_huge_retry_hint_is_capped() {
        let policy = HealthPolicy::default();
        let mut tracker = HealthTracker::new();
        tracker.record_rate_limit(Some(Duration::from_secs(u64::MAX)), &policy);

        let now = Instant::now();
        assert!(tracker.is_rate_limited(now));
        assert!(!tracker.is_rate_limited(now + policy.max_rate_limit_cooldown + Duration::from_secs(1)));
    }
}
