//! Periodic health checks
//!
//! The monitor only observes and decides: it raises alerts and returns
//! the restarts the supervisor allowed. The pipeline owns the tasks and
//! carries the restarts out.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::alerts::{AlertLevel, AlertLog};
use super::metrics::PipelineMetrics;
use super::supervisor::{Component, ComponentState, RestartDecision, Supervisor};
use crate::aggregator::Aggregator;
use crate::config::HealthConfig;
use crate::endpoint::EndpointPool;
use crate::source::SourceStatus;

/// Windowed samples needed before the error rate is judged
const MIN_ERROR_SAMPLES: usize = 10;

/// A restart the supervisor approved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryAction {
    pub component: Component,
    pub delay: Duration,
}

pub struct HealthMonitor {
    config: HealthConfig,
    metrics: Arc<PipelineMetrics>,
    pool: Arc<EndpointPool>,
    aggregator: Option<Arc<Aggregator>>,
    sources: Vec<Arc<SourceStatus>>,
    supervisor: Arc<Supervisor>,
    alerts: Arc<AlertLog>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        metrics: Arc<PipelineMetrics>,
        pool: Arc<EndpointPool>,
        aggregator: Option<Arc<Aggregator>>,
        sources: Vec<Arc<SourceStatus>>,
        supervisor: Arc<Supervisor>,
        alerts: Arc<AlertLog>,
    ) -> Self {
        Self {
            config,
            metrics,
            pool,
            aggregator,
            sources,
            supervisor,
            alerts,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.config.interval_ms.max(1))
    }

    /// Run every check once
    pub fn check(&self) -> Vec<RecoveryAction> {
        let now = Instant::now();
        let mut actions = Vec::new();

        self.check_detections(now, &mut actions);
        self.check_error_rate();
        self.check_latency();
        self.check_pool();
        self.check_providers(now, &mut actions);
        self.check_sources(now, &mut actions);

        debug!(
            actions = actions.len(),
            error_rate = self.metrics.error_rate(),
            "Health check complete"
        );
        actions
    }

    fn request(&self, component: Component, now: Instant, reason: &str, actions: &mut Vec<RecoveryAction>) {
        match self.supervisor.request_restart(component, now) {
            RestartDecision::Restart { attempt, delay } => {
                self.alerts.raise(
                    AlertLevel::Warning,
                    component.to_string(),
                    format!("{}, restart attempt {}", reason, attempt),
                );
                actions.push(RecoveryAction { component, delay });
            }
            RestartDecision::Park => {
                self.alerts.raise(
                    AlertLevel::Critical,
                    component.to_string(),
                    format!("{}, restarts exhausted, parked as degraded", reason),
                );
            }
            RestartDecision::Wait(_) | RestartDecision::Parked => {}
        }
    }

    fn check_detections(&self, now: Instant, actions: &mut Vec<RecoveryAction>) {
        if self.sources.is_empty() {
            return;
        }
        let silent = self.metrics.since_last_detection();
        let limit = Duration::from_secs(self.config.no_detection_secs);
        if silent >= limit {
            let reason = format!("No detections in {} minutes", silent.as_secs() / 60);
            self.request(Component::Sources, now, &reason, actions);
        } else {
            self.supervisor.mark_recovered(Component::Sources);
        }
    }

    fn check_error_rate(&self) {
        if self.metrics.window_samples() < MIN_ERROR_SAMPLES {
            return;
        }
        let rate = self.metrics.error_rate();
        let level = if rate >= self.config.error_rate_critical {
            AlertLevel::Error
        } else if rate >= self.config.error_rate_warning {
            AlertLevel::Warning
        } else {
            return;
        };
        self.alerts.raise(
            level,
            "extractor",
            format!("Error rate {:.0}% over processed transactions", rate * 100.0),
        );
    }

    fn check_latency(&self) {
        let latency = self.pool.avg_latency_ms();
        let level = if latency >= self.config.latency_critical_ms {
            AlertLevel::Error
        } else if latency >= self.config.latency_warning_ms {
            AlertLevel::Warning
        } else {
            return;
        };
        self.alerts.raise(
            level,
            "rpc_pool",
            format!("Average RPC latency {:.0}ms", latency),
        );
    }

    fn check_pool(&self) {
        if self.pool.all_unhealthy() {
            self.alerts.raise(
                AlertLevel::Critical,
                "rpc_pool",
                format!("All {} RPC endpoints unhealthy", self.pool.len()),
            );
        }
    }

    fn check_providers(&self, now: Instant, actions: &mut Vec<RecoveryAction>) {
        let Some(aggregator) = &self.aggregator else {
            return;
        };

        if aggregator.all_providers_failing() {
            let mut message = format!(
                "All {} market-data providers failing for {} cycles",
                aggregator.provider_count(),
                aggregator.failed_cycles()
            );
            if aggregator.synthetic_active() {
                message.push_str(", serving synthetic records");
            }
            self.alerts.raise(AlertLevel::Critical, "providers", message);
        }

        match self.supervisor.state(Component::Aggregator) {
            Some(ComponentState::Stopped) => {
                self.request(Component::Aggregator, now, "Aggregator stopped", actions);
            }
            Some(ComponentState::Running) => self.supervisor.mark_recovered(Component::Aggregator),
            _ => {}
        }
    }

    fn check_sources(&self, now: Instant, actions: &mut Vec<RecoveryAction>) {
        for status in &self.sources {
            let component = Component::Source(status.kind());
            if status.is_disabled() {
                self.alerts.raise(
                    AlertLevel::Error,
                    component.to_string(),
                    format!("Source disabled after {} consecutive failures", status.consecutive_failures()),
                );
                self.request(component, now, "Source disabled", actions);
            } else if !status.is_running() {
                if self.supervisor.state(component) == Some(ComponentState::Restarting) {
                    continue;
                }
                self.request(component, now, "Source stopped", actions);
            } else if status.consecutive_failures() == 0 && status.has_progressed() {
                self.supervisor.mark_recovered(component);
            }
        }

        let degraded = self.supervisor.degraded();
        if !degraded.is_empty() {
            let names: Vec<String> = degraded.iter().map(|c| c.to_string()).collect();
            self.alerts.raise(
                AlertLevel::Error,
                "supervisor",
                format!("Degraded components: {}", names.join(", ")),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::provider::mock::MockProvider;
    use crate::aggregator::MarketDataProvider;
    use crate::config::{AggregatorConfig, EndpointConfig, RpcConfig};
    use crate::error::ErrorClass;
    use crate::health::metrics::ProcessOutcome;
    use crate::source::SourceKind;

    struct Fixture {
        metrics: Arc<PipelineMetrics>,
        pool: Arc<EndpointPool>,
        supervisor: Arc<Supervisor>,
        alerts: Arc<AlertLog>,
        sources: Vec<Arc<SourceStatus>>,
    }

    fn fixture(config: &HealthConfig) -> Fixture {
        let pool = EndpointPool::new(&RpcConfig {
            endpoints: vec![EndpointConfig::new("https://a.example")],
            ..Default::default()
        })
        .unwrap();
        Fixture {
            metrics: Arc::new(PipelineMetrics::new()),
            pool: Arc::new(pool),
            supervisor: Arc::new(Supervisor::new(config)),
            alerts: Arc::new(AlertLog::new(50)),
            sources: vec![Arc::new(SourceStatus::new(SourceKind::Polling))],
        }
    }

    fn monitor(config: HealthConfig, f: &Fixture, aggregator: Option<Arc<Aggregator>>) -> HealthMonitor {
        HealthMonitor::new(
            config,
            f.metrics.clone(),
            f.pool.clone(),
            aggregator,
            f.sources.clone(),
            f.supervisor.clone(),
            f.alerts.clone(),
        )
    }

    #[test]
    fn test_silence_requests_source_restart() {
        let config = HealthConfig {
            no_detection_secs: 0,
            ..Default::default()
        };
        let f = fixture(&config);
        let monitor = monitor(config, &f, None);

        let actions = monitor.check();
        assert!(actions.iter().any(|a| a.component == Component::Sources));
        assert!(f.alerts.recent().iter().any(|a| a.component == "sources"));
    }

    #[test]
    fn test_stopped_source_restart_is_requested_once_per_backoff() {
        let config = HealthConfig::default();
        let f = fixture(&config);
        let monitor = monitor(config, &f, None);

        let first = monitor.check();
        let component = Component::Source(SourceKind::Polling);
        assert!(first.iter().any(|a| a.component == component));

        // Still restarting: no second request
        let second = monitor.check();
        assert!(!second.iter().any(|a| a.component == component));
    }

    fn restarted(f: &Fixture, status: &SourceStatus, component: Component) {
        status.reset();
        status.mark_started();
        f.supervisor.set_state(component, ComponentState::Running);
    }

    #[test]
    fn test_source_failing_after_every_restart_is_parked() {
        let config = HealthConfig {
            max_restart_attempts: 3,
            restart_backoff_initial_ms: 1,
            restart_backoff_max_ms: 4,
            ..Default::default()
        };
        let f = fixture(&config);
        let monitor = monitor(config, &f, None);
        let status = f.sources[0].clone();
        let component = Component::Source(SourceKind::Polling);

        for attempt in 1..=3 {
            std::thread::sleep(Duration::from_millis(20));
            let actions = monitor.check();
            assert!(
                actions.iter().any(|a| a.component == component),
                "restart {} not requested",
                attempt
            );

            // A tick between the restart and its first failure keeps the budget
            restarted(&f, &status, component);
            monitor.check();
            status.mark_stopped();
        }

        std::thread::sleep(Duration::from_millis(20));
        monitor.check();
        assert!(f.supervisor.is_degraded(component));
        assert!(f
            .alerts
            .recent()
            .iter()
            .any(|a| a.component == component.to_string() && a.level == AlertLevel::Critical));
    }

    #[test]
    fn test_source_that_succeeds_after_restart_recovers() {
        let config = HealthConfig::default();
        let f = fixture(&config);
        let monitor = monitor(config, &f, None);
        let status = f.sources[0].clone();
        let component = Component::Source(SourceKind::Polling);

        assert!(monitor.check().iter().any(|a| a.component == component));
        restarted(&f, &status, component);
        status.record_success();
        monitor.check();

        let statuses = f.supervisor.statuses();
        let entry = statuses
            .iter()
            .find(|s| s.component == component.to_string())
            .unwrap();
        assert_eq!(entry.restart_attempts, 0);
        assert_eq!(entry.state, ComponentState::Running);
    }

    #[test]
    fn test_error_rate_alert() {
        let config = HealthConfig::default();
        let f = fixture(&config);
        for _ in 0..6 {
            f.metrics
                .record_processed(Duration::ZERO, ProcessOutcome::Failed(ErrorClass::Transient));
        }
        for _ in 0..4 {
            f.metrics.record_processed(Duration::ZERO, ProcessOutcome::Extracted);
        }
        monitor(config, &f, None).check();

        let alerts = f.alerts.recent();
        let alert = alerts.iter().find(|a| a.component == "extractor").unwrap();
        assert_eq!(alert.level, AlertLevel::Error);
    }

    #[test]
    fn test_unhealthy_pool_is_critical() {
        let config = HealthConfig::default();
        let f = fixture(&config);
        let endpoint = f.pool.acquire();
        for _ in 0..5 {
            f.pool.report(&endpoint, Duration::from_millis(10), false);
        }
        monitor(config, &f, None).check();

        assert!(f
            .alerts
            .recent()
            .iter()
            .any(|a| a.component == "rpc_pool" && a.level == AlertLevel::Critical));
    }

    #[tokio::test]
    async fn test_failing_providers_are_critical() {
        let config = HealthConfig::default();
        let f = fixture(&config);
        let providers: Vec<Arc<dyn MarketDataProvider>> =
            vec![Arc::new(MockProvider::failing("pumpfun"))];
        let aggregator = Arc::new(Aggregator::new(AggregatorConfig::default(), providers));
        aggregator.run_cycle(chrono::Utc::now()).await;

        monitor(config, &f, Some(aggregator)).check();

        let alerts = f.alerts.recent();
        let alert = alerts.iter().find(|a| a.component == "providers").unwrap();
        assert_eq!(alert.level, AlertLevel::Critical);
        assert!(alert.message.contains("synthetic"));
    }
}
