//! Multi-source market-data aggregator
//!
//! Each cycle queries every usable provider concurrently, merges the
//! returned tokens per mint and hands back the records whose data quality
//! clears the configured minimum. When no provider answers, the cycle
//! yields flagged synthetic records instead; those are purged as soon as
//! a later cycle gets real data.

pub mod provider;
pub mod providers;
pub mod quality;
pub mod synthetic;

pub use provider::{build_providers, MarketDataProvider, ProviderToken};
pub use quality::{data_quality, QualityPolicy};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::AggregatorConfig;
use crate::endpoint::{HealthPolicy, HealthSnapshot, HealthTracker};
use crate::error::{Error, Result};
use crate::token::TokenRecord;

/// Unhealthy providers are probed again every this many cycles
const PROBE_EVERY: u64 = 5;

/// Health view of one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub priority: u8,
    pub healthy: bool,
    #[serde(flatten)]
    pub health: HealthSnapshot,
}

/// Outcome of one aggregation cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Merged records that passed the quality bar, or synthetic records
    pub records: Vec<TokenRecord>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub below_quality: usize,
    /// Records are degraded-mode placeholders
    pub synthetic: bool,
    /// Real data returned: previously emitted synthetic records must go
    pub purge_synthetic: bool,
}

struct ProviderSlot {
    provider: Arc<dyn MarketDataProvider>,
    health: Mutex<HealthTracker>,
}

impl ProviderSlot {
    fn health(&self) -> MutexGuard<'_, HealthTracker> {
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Aggregator {
    config: AggregatorConfig,
    slots: Vec<ProviderSlot>,
    policy: HealthPolicy,
    quality: QualityPolicy,
    /// Latest merged view per mint
    merged: DashMap<String, TokenRecord>,
    synthetic_active: AtomicBool,
    failed_cycles: AtomicU32,
    cycles: AtomicU64,
}

impl Aggregator {
    /// Build with explicit providers, queried in priority order
    pub fn new(config: AggregatorConfig, mut providers: Vec<Arc<dyn MarketDataProvider>>) -> Self {
        providers.sort_by_key(|p| p.priority());
        let slots = providers
            .into_iter()
            .map(|provider| ProviderSlot {
                provider,
                health: Mutex::new(HealthTracker::new()),
            })
            .collect();

        Self {
            policy: HealthPolicy::from(&config),
            quality: QualityPolicy::from(&config),
            config,
            slots,
            merged: DashMap::new(),
            synthetic_active: AtomicBool::new(false),
            failed_cycles: AtomicU32::new(0),
            cycles: AtomicU64::new(0),
        }
    }

    /// Build the configured HTTP providers
    pub fn from_config(config: AggregatorConfig) -> Self {
        let providers = build_providers(&config.providers);
        Self::new(config, providers)
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn provider_count(&self) -> usize {
        self.slots.len()
    }

    /// Consecutive cycles in which no provider returned data
    pub fn failed_cycles(&self) -> u32 {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    pub fn all_providers_failing(&self) -> bool {
        !self.slots.is_empty() && self.failed_cycles() > 0
    }

    pub fn synthetic_active(&self) -> bool {
        self.synthetic_active.load(Ordering::Relaxed)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Mints currently held in the merged view
    pub fn merged_len(&self) -> usize {
        self.merged.len()
    }

    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.slots
            .iter()
            .map(|slot| {
                let health = slot.health();
                ProviderStatus {
                    name: slot.provider.name().to_string(),
                    priority: slot.provider.priority(),
                    healthy: health.is_healthy(&self.policy),
                    health: health.snapshot(),
                }
            })
            .collect()
    }

    /// Providers to query this cycle.
    ///
    /// Rate-limited providers always sit out. Unhealthy ones sit out while
    /// a healthy alternative exists, except on probe cycles.
    fn usable_slots(&self, probe: bool) -> Vec<&ProviderSlot> {
        let now = Instant::now();
        let available: Vec<&ProviderSlot> = self
            .slots
            .iter()
            .filter(|s| !s.health().is_rate_limited(now))
            .collect();

        let healthy: Vec<&ProviderSlot> = available
            .iter()
            .copied()
            .filter(|s| s.health().is_healthy(&self.policy))
            .collect();

        if probe || healthy.is_empty() {
            available
        } else {
            healthy
        }
    }

    async fn query(slot: &ProviderSlot) -> (Result<Vec<ProviderToken>>, std::time::Duration) {
        let started = Instant::now();
        let timeout = slot.provider.timeout();
        let outcome = match tokio::time::timeout(timeout, slot.provider.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Provider {
                provider: slot.provider.name().to_string(),
                reason: format!("timed out after {}ms", timeout.as_millis()),
            }),
        };
        (outcome, started.elapsed())
    }

    /// Merge one provider's tokens, returning the mints touched
    fn merge_tokens(&self, provider: &str, tokens: Vec<ProviderToken>, now: DateTime<Utc>) -> Vec<String> {
        let mut touched = Vec::with_capacity(tokens.len());
        for token in tokens {
            let incoming = token.into_record(provider, now);
            let mint = incoming.mint.clone();
            self.merged
                .entry(mint.clone())
                .and_modify(|existing| {
                    if let Err(e) = existing.merge(&incoming) {
                        warn!(mint = %existing.mint, error = %e, "Merge rejected");
                    }
                })
                .or_insert_with(|| incoming.clone());
            touched.push(mint);
        }
        touched
    }

    /// Run one aggregation cycle
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed);
        let mut report = CycleReport::default();
        if self.slots.is_empty() {
            return report;
        }

        let selected = self.usable_slots(cycle % PROBE_EVERY == 0);
        report.skipped = self.slots.len() - selected.len();

        let outcomes =
            futures::future::join_all(selected.iter().map(|slot| async move {
                let (result, latency) = Self::query(slot).await;
                (*slot, result, latency)
            }))
            .await;

        let mut touched: HashSet<String> = HashSet::new();
        for (slot, result, latency) in outcomes {
            let name = slot.provider.name();
            match result {
                Ok(tokens) => {
                    slot.health().record_success(latency, &self.policy);
                    debug!(provider = name, tokens = tokens.len(), "Provider answered");
                    report.succeeded += 1;
                    touched.extend(self.merge_tokens(name, tokens, now));
                }
                Err(Error::RateLimited { retry_after, .. }) => {
                    slot.health().record_rate_limit(Some(retry_after), &self.policy);
                    warn!(provider = name, ?retry_after, "Provider rate limited");
                    report.failed += 1;
                }
                Err(e) => {
                    slot.health().record_failure(latency, &self.policy);
                    warn!(provider = name, error = %e, "Provider query failed");
                    report.failed += 1;
                }
            }
        }

        if report.succeeded == 0 {
            let failed_cycles = self.failed_cycles.fetch_add(1, Ordering::Relaxed) + 1;
            error!(
                providers = self.slots.len(),
                failed_cycles, "All market-data providers failed"
            );
            if self.config.synthetic_fallback {
                report.records = synthetic::synthetic_records(self.config.synthetic_count, now);
                report.synthetic = true;
                self.synthetic_active.store(true, Ordering::Relaxed);
            }
            return report;
        }

        self.failed_cycles.store(0, Ordering::Relaxed);
        if self.synthetic_active.swap(false, Ordering::Relaxed) {
            info!("Provider data restored, purging synthetic records");
            report.purge_synthetic = true;
        }

        for mint in touched {
            let Some(mut entry) = self.merged.get_mut(&mint) else {
                continue;
            };
            let quality = data_quality(&entry, now, &self.quality);
            entry.data_quality = quality;
            if quality >= self.config.min_data_quality {
                report.records.push(entry.clone());
            } else {
                report.below_quality += 1;
            }
        }

        self.prune(now);
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            emitted = report.records.len(),
            below_quality = report.below_quality,
            "Aggregation cycle complete"
        );
        report
    }

    /// Forget mints with no observation inside the recency window
    fn prune(&self, now: DateTime<Utc>) {
        let window = self.quality.recency_window;
        self.merged.retain(|_, record| {
            record
                .last_observed()
                .map(|t| now - t <= window)
                .unwrap_or(false)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::provider::mock::{full_token, MockProvider};
    use super::*;
    use crate::token::SOURCE_SYNTHETIC;

    const MINT: &str = "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr";

    fn aggregator(providers: Vec<Arc<MockProvider>>) -> Aggregator {
        let providers = providers
            .into_iter()
            .map(|p| p as Arc<dyn MarketDataProvider>)
            .collect();
        Aggregator::new(AggregatorConfig::default(), providers)
    }

    #[tokio::test]
    async fn test_two_providers_merge_to_average() {
        let pumpfun = Arc::new(MockProvider::new("pumpfun", vec![full_token(MINT, 1000.0)]));
        let dex = Arc::new(MockProvider::new("dexscreener", vec![full_token(MINT, 3000.0)]));
        let aggregator = aggregator(vec![pumpfun, dex]);

        let report = aggregator.run_cycle(Utc::now()).await;

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.records.len(), 1);
        let record = &report.records[0];
        assert_eq!(record.market_cap_usd, Some(2000.0));
        assert!(record.data_sources.contains("pumpfun"));
        assert!(record.data_sources.contains("dexscreener"));
        assert!(record.data_quality >= 70.0);
        assert!(!record.synthetic);
    }

    #[tokio::test]
    async fn test_low_quality_records_dropped() {
        let sparse = ProviderToken {
            mint: MINT.into(),
            market_cap_usd: Some(500.0),
            ..Default::default()
        };
        let aggregator = aggregator(vec![Arc::new(MockProvider::new("generic", vec![sparse]))]);

        let report = aggregator.run_cycle(Utc::now()).await;
        assert!(report.records.is_empty());
        assert_eq!(report.below_quality, 1);
        assert_eq!(aggregator.merged_len(), 1);
    }

    #[tokio::test]
    async fn test_all_failing_yields_flagged_synthetic_then_purges() {
        let a = Arc::new(MockProvider::failing("pumpfun"));
        let b = Arc::new(MockProvider::failing("dexscreener"));
        let aggregator = aggregator(vec![a.clone(), b]);

        let report = aggregator.run_cycle(Utc::now()).await;
        assert_eq!(report.failed, 2);
        assert!(report.synthetic);
        assert_eq!(report.records.len(), AggregatorConfig::default().synthetic_count);
        assert!(report
            .records
            .iter()
            .all(|r| r.synthetic && r.data_sources.contains(SOURCE_SYNTHETIC)));
        assert!(aggregator.all_providers_failing());
        assert!(aggregator.synthetic_active());

        // One provider recovers
        a.fail.store(false, Ordering::SeqCst);
        *a.tokens.lock().unwrap() = vec![full_token(MINT, 1000.0)];
        let report = aggregator.run_cycle(Utc::now()).await;

        assert!(report.purge_synthetic);
        assert!(!report.synthetic);
        assert!(report.records.iter().all(|r| !r.synthetic));
        assert!(!aggregator.all_providers_failing());
        assert!(!aggregator.synthetic_active());
    }

    #[tokio::test]
    async fn test_unhealthy_provider_sits_out_while_others_work() {
        let flaky = Arc::new(MockProvider::failing("flaky"));
        let steady = Arc::new(MockProvider::new("steady", vec![full_token(MINT, 1000.0)]));
        let aggregator = aggregator(vec![flaky.clone(), steady]);

        for _ in 0..4 {
            aggregator.run_cycle(Utc::now()).await;
        }
        let calls = flaky.calls.load(Ordering::SeqCst);
        assert_eq!(calls, 4);

        let report = aggregator.run_cycle(Utc::now()).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), calls);

        let statuses = aggregator.provider_statuses();
        assert!(!statuses.iter().find(|s| s.name == "flaky").unwrap().healthy);

        // Probe cycle gives it another chance
        aggregator.run_cycle(Utc::now()).await;
        assert_eq!(flaky.calls.load(Ordering::SeqCst), calls + 1);
    }

    #[tokio::test]
    async fn test_no_providers_is_not_a_failure() {
        let aggregator = Aggregator::new(AggregatorConfig::default(), Vec::new());
        let report = aggregator.run_cycle(Utc::now()).await;
        assert!(report.records.is_empty());
        assert!(!aggregator.all_providers_failing());
    }
}
