//! Detection pipeline
//!
//! ```text
//! sources ──mpsc──> dispatcher ──(dedup)──> work queue ──> workers ──┐
//!                                                                     ├─> store ─> listeners
//! aggregator (interval) ──────────────────────────────────────────────┘
//! health monitor (interval) ──> restart sources / aggregator
//! ```
//!
//! [`Pipeline`] owns every task. Sources, workers and the aggregator run
//! under one cancellation token; each source and the aggregator get a
//! child token so the health monitor can restart them individually.

pub mod listener;
pub mod processor;
pub mod store;

pub use listener::{Listeners, TokenListener};
pub use processor::Processor;
pub use store::{TokenStore, Upserted};

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::aggregator::{build_providers, Aggregator, MarketDataProvider, ProviderStatus};
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::endpoint::{EndpointPool, EndpointStatus};
use crate::error::{Error, Result};
use crate::extractor::TransactionExtractor;
use crate::health::{
    Alert, AlertLog, Component, ComponentState, ComponentStatus, HealthMonitor, MetricsSnapshot,
    PipelineMetrics, Supervisor,
};
use crate::rpc::ChainRpc;
use crate::scoring::{ScoringEngine, SessionHistory};
use crate::source::{
    run_source, BlockScanSource, CandidateReference, EventSource, PollingSource, SourceContext,
    SourceExit, SourceKind, SourceSnapshot, SourceStatus, SubscriptionSource,
};
use crate::token::TokenRecord;

/// How long `stop` waits for each task before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Point-in-time view of the whole pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub running: bool,
    pub detected: u64,
    pub processed: u64,
    pub error_rate: f64,
    /// Mean RPC latency over endpoints in use
    pub avg_latency_ms: f64,
    pub avg_processing_ms: f64,
    pub duplicates: u64,
    pub dedup_size: usize,
    pub in_flight: usize,
    pub tokens: usize,
    pub evicted: u64,
    pub synthetic_active: bool,
    pub aggregation_cycles: u64,
    pub alerts: usize,
    pub metrics: MetricsSnapshot,
    pub endpoints: Vec<EndpointStatus>,
    pub providers: Vec<ProviderStatus>,
    pub sources: Vec<SourceSnapshot>,
    pub components: Vec<ComponentStatus>,
}

/// Tasks of one start..stop run
struct Runtime {
    cancel: CancellationToken,
    candidate_tx: mpsc::Sender<CandidateReference>,
    /// Child token per running source
    sources: HashMap<SourceKind, CancellationToken>,
    aggregator: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    fn track(&mut self, handle: JoinHandle<()>) {
        self.tasks.retain(|h| !h.is_finished());
        self.tasks.push(handle);
    }
}

struct PipelineInner {
    config: Config,
    rpc: Arc<dyn ChainRpc>,
    pool: Arc<EndpointPool>,
    dedup: Arc<Deduplicator>,
    processor: Arc<Processor>,
    aggregator: Option<Arc<Aggregator>>,
    metrics: Arc<PipelineMetrics>,
    alerts: Arc<AlertLog>,
    supervisor: Arc<Supervisor>,
    sources: Vec<Arc<SourceStatus>>,
    runtime: Mutex<Option<Runtime>>,
    running: AtomicBool,
}

/// Handle to a detection pipeline; clones share the same pipeline
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Build a pipeline using the configured market-data providers
    pub fn new(config: Config, rpc: Arc<dyn ChainRpc>) -> Result<Self> {
        let providers = build_providers(&config.aggregator.providers);
        Self::with_providers(config, rpc, providers)
    }

    /// Build a pipeline with explicit market-data providers
    pub fn with_providers(
        config: Config,
        rpc: Arc<dyn ChainRpc>,
        providers: Vec<Arc<dyn MarketDataProvider>>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        let pool = Arc::new(EndpointPool::new(&config.rpc)?);
        let metrics = Arc::new(PipelineMetrics::new());
        let scoring = config.scoring.clone();
        let processor = Arc::new(Processor {
            extractor: TransactionExtractor::new(&config.program),
            history: SessionHistory::new(scoring.recent_window, scoring.creator_success_market_cap_usd)
                .with_creator_window(scoring.creator_window),
            scoring: ScoringEngine::new(scoring),
            store: Arc::new(TokenStore::new(config.pipeline.max_retained)),
            listeners: Arc::new(Listeners::default()),
            metrics: metrics.clone(),
            freshness: config.pipeline.freshness_window(),
        });

        let aggregator = config
            .aggregator
            .enabled
            .then(|| Arc::new(Aggregator::new(config.aggregator.clone(), providers)));

        let sources = enabled_sources(&config)
            .into_iter()
            .map(|kind| Arc::new(SourceStatus::new(kind)))
            .collect();

        Ok(Self {
            inner: Arc::new(PipelineInner {
                rpc,
                pool,
                dedup: Arc::new(Deduplicator::new(config.dedup.max_size)),
                processor,
                aggregator,
                metrics,
                alerts: Arc::new(AlertLog::new(config.health.alert_history)),
                supervisor: Arc::new(Supervisor::new(&config.health)),
                sources,
                runtime: Mutex::new(None),
                running: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// Spawn every task. Starting a running pipeline is a no-op.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut slot = inner.runtime.lock().await;
        if slot.is_some() {
            warn!("Pipeline already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let (candidate_tx, candidate_rx) = mpsc::channel(inner.config.sources.channel_capacity.max(1));
        let (work_tx, work_rx) = async_channel::bounded(inner.config.extractor.queue_capacity.max(1));

        let mut runtime = Runtime {
            cancel: cancel.clone(),
            candidate_tx,
            sources: HashMap::new(),
            aggregator: None,
            tasks: Vec::new(),
        };

        runtime.track(tokio::spawn(dispatch(
            candidate_rx,
            work_tx,
            inner.dedup.clone(),
            inner.metrics.clone(),
            cancel.clone(),
        )));

        for id in 0..inner.config.extractor.workers {
            runtime.track(tokio::spawn(work(
                id,
                work_rx.clone(),
                inner.clone(),
                cancel.clone(),
            )));
        }

        for status in &inner.sources {
            inner.spawn_source(status.kind(), &mut runtime);
        }
        inner.spawn_aggregator(&mut runtime);

        let monitor = HealthMonitor::new(
            inner.config.health.clone(),
            inner.metrics.clone(),
            inner.pool.clone(),
            inner.aggregator.clone(),
            inner.sources.clone(),
            inner.supervisor.clone(),
            inner.alerts.clone(),
        );
        runtime.track(tokio::spawn(supervise(
            Arc::downgrade(inner),
            monitor,
            cancel,
        )));

        *slot = Some(runtime);
        inner.running.store(true, Ordering::SeqCst);
        info!(
            sources = inner.sources.len(),
            workers = inner.config.extractor.workers,
            aggregator = inner.aggregator.is_some(),
            endpoints = inner.pool.len(),
            "Pipeline started"
        );
        Ok(())
    }

    /// Cancel every task and wait for them to finish
    pub async fn stop(&self) {
        let Some(runtime) = self.inner.runtime.lock().await.take() else {
            return;
        };
        info!("Stopping pipeline...");
        runtime.cancel.cancel();
        drop(runtime.candidate_tx);

        for handle in runtime.tasks {
            let abort = handle.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("Task did not stop in time, aborting");
                abort.abort();
            }
        }

        self.inner.running.store(false, Ordering::SeqCst);
        info!("Pipeline stopped");
    }

    /// Operator restart: un-park degraded components and start afresh
    pub async fn restart(&self) -> Result<()> {
        self.inner.supervisor.reset_all();
        for status in &self.inner.sources {
            status.reset();
        }
        self.stop().await;
        self.start().await
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Fresh tokens, best opportunity first
    pub fn current_tokens(&self) -> Vec<TokenRecord> {
        let now = Utc::now();
        let window = self.inner.config.pipeline.freshness_window();
        self.inner
            .processor
            .store
            .ranked()
            .into_iter()
            .filter(|r| r.is_fresh(now, window))
            .collect()
    }

    /// Called with every stored or updated token
    pub fn on_update<L>(&self, listener: L)
    where
        L: TokenListener + 'static,
    {
        self.inner.processor.listeners.add(Arc::new(listener));
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.alerts.recent()
    }

    pub fn stats(&self) -> PipelineStats {
        let inner = &self.inner;
        let metrics = &inner.metrics;
        let store = &inner.processor.store;
        PipelineStats {
            running: self.is_running(),
            detected: metrics.detected(),
            processed: metrics.processed(),
            error_rate: metrics.error_rate(),
            avg_latency_ms: inner.pool.avg_latency_ms(),
            avg_processing_ms: metrics.avg_processing_ms(),
            duplicates: inner.dedup.duplicates(),
            dedup_size: inner.dedup.len(),
            in_flight: inner.dedup.in_flight(),
            tokens: store.len(),
            evicted: store.evicted(),
            synthetic_active: inner
                .aggregator
                .as_ref()
                .is_some_and(|a| a.synthetic_active()),
            aggregation_cycles: inner.aggregator.as_ref().map_or(0, |a| a.cycles()),
            alerts: inner.alerts.len(),
            metrics: metrics.snapshot(),
            endpoints: inner.pool.statuses(),
            providers: inner
                .aggregator
                .as_ref()
                .map(|a| a.provider_statuses())
                .unwrap_or_default(),
            sources: inner.sources.iter().map(|s| s.snapshot()).collect(),
            components: inner.supervisor.statuses(),
        }
    }
}

impl PipelineInner {
    fn status(&self, kind: SourceKind) -> Option<Arc<SourceStatus>> {
        self.sources.iter().find(|s| s.kind() == kind).cloned()
    }

    fn build_source(&self, kind: SourceKind) -> Arc<dyn EventSource> {
        let config = &self.config.sources;
        match kind {
            SourceKind::Subscription => Arc::new(SubscriptionSource::new()),
            SourceKind::Polling => Arc::new(PollingSource::new(&config.polling)),
            SourceKind::BlockScan => Arc::new(BlockScanSource::new(&config.block_scan)),
        }
    }

    /// (Re)start one source under a fresh child token
    fn spawn_source(&self, kind: SourceKind, runtime: &mut Runtime) {
        let Some(status) = self.status(kind) else {
            return;
        };
        let token = runtime.cancel.child_token();
        if let Some(previous) = runtime.sources.insert(kind, token.clone()) {
            previous.cancel();
        }

        let ctx = SourceContext {
            rpc: self.rpc.clone(),
            pool: self.pool.clone(),
            dedup: self.dedup.clone(),
            tx: runtime.candidate_tx.clone(),
            program_id: self.config.program.program_id.clone(),
            markers: self.config.program.creation_markers.clone(),
            status: status.clone(),
            cancel: token,
        };
        let source = self.build_source(kind);
        let config = self.config.sources.clone();
        let supervisor = self.supervisor.clone();
        let component = Component::Source(kind);
        supervisor.set_state(component, ComponentState::Running);

        let task = tokio::spawn(run_source(source, ctx, config));
        runtime.track(tokio::spawn(async move {
            match task.await {
                Ok(SourceExit::Disabled { .. }) | Ok(SourceExit::ChannelClosed) => {
                    supervisor.set_state(component, ComponentState::Stopped);
                }
                Ok(SourceExit::Cancelled) => {}
                Err(e) => {
                    error!(source = %kind, error = %e, "Event source task died");
                    status.mark_stopped();
                    supervisor.set_state(component, ComponentState::Stopped);
                }
            }
        }));
    }

    /// (Re)start the aggregation loop under a fresh child token
    fn spawn_aggregator(&self, runtime: &mut Runtime) {
        let Some(aggregator) = self.aggregator.clone() else {
            return;
        };
        let token = runtime.cancel.child_token();
        if let Some(previous) = runtime.aggregator.replace(token.clone()) {
            previous.cancel();
        }

        let supervisor = self.supervisor.clone();
        supervisor.set_state(Component::Aggregator, ComponentState::Running);
        let task = tokio::spawn(aggregate(
            aggregator,
            self.processor.clone(),
            self.metrics.clone(),
            token,
        ));
        runtime.track(tokio::spawn(async move {
            if let Err(e) = task.await {
                error!(error = %e, "Aggregator task died");
                supervisor.set_state(Component::Aggregator, ComponentState::Stopped);
            }
        }));
    }

    /// Carry out a restart the supervisor approved
    async fn restart_component(&self, component: Component) {
        let mut slot = self.runtime.lock().await;
        let Some(runtime) = slot.as_mut() else {
            return;
        };
        if runtime.cancel.is_cancelled() {
            return;
        }

        info!(component = %component, "Restarting component");
        match component {
            Component::Source(kind) => {
                if let Some(status) = self.status(kind) {
                    status.reset();
                }
                self.spawn_source(kind, runtime);
            }
            Component::Sources => {
                for status in &self.sources {
                    status.reset();
                    self.spawn_source(status.kind(), runtime);
                }
            }
            Component::Aggregator => self.spawn_aggregator(runtime),
        }
    }
}

fn enabled_sources(config: &Config) -> Vec<SourceKind> {
    let sources = &config.sources;
    [
        (SourceKind::Subscription, sources.subscription.enabled),
        (SourceKind::Polling, sources.polling.enabled),
        (SourceKind::BlockScan, sources.block_scan.enabled),
    ]
    .into_iter()
    .filter_map(|(kind, enabled)| enabled.then_some(kind))
    .collect()
}

/// Drop duplicate signatures and hand the rest to the workers
async fn dispatch(
    mut rx: mpsc::Receiver<CandidateReference>,
    work_tx: async_channel::Sender<CandidateReference>,
    dedup: Arc<Deduplicator>,
    metrics: Arc<PipelineMetrics>,
    cancel: CancellationToken,
) {
    loop {
        let candidate = tokio::select! {
            _ = cancel.cancelled() => break,
            candidate = rx.recv() => match candidate {
                Some(candidate) => candidate,
                None => break,
            },
        };

        if !dedup.check_and_mark(&candidate.signature) {
            trace!(signature = %candidate.signature, channel = %candidate.channel, "Duplicate candidate");
            continue;
        }
        metrics.record_detected();

        // Blocks while every worker is busy and the queue is full
        let signature = candidate.signature.clone();
        let sent = tokio::select! {
            _ = cancel.cancelled() => {
                dedup.complete(&signature);
                break;
            }
            sent = work_tx.send(candidate) => sent,
        };
        if sent.is_err() {
            dedup.complete(&signature);
            break;
        }
    }
    work_tx.close();
    debug!("Dispatcher stopped");
}

async fn work(
    id: usize,
    rx: async_channel::Receiver<CandidateReference>,
    inner: Arc<PipelineInner>,
    cancel: CancellationToken,
) {
    loop {
        let candidate = tokio::select! {
            _ = cancel.cancelled() => break,
            candidate = rx.recv() => match candidate {
                Ok(candidate) => candidate,
                Err(_) => break,
            },
        };

        let signature = candidate.signature.clone();
        tokio::select! {
            _ = cancel.cancelled() => {
                inner.dedup.complete(&signature);
                break;
            }
            _ = inner.processor.process_candidate(&inner.rpc, &inner.pool, &inner.dedup, candidate) => {}
        }
    }
    debug!(worker = id, "Worker stopped");
}

async fn aggregate(
    aggregator: Arc<Aggregator>,
    processor: Arc<Processor>,
    metrics: Arc<PipelineMetrics>,
    cancel: CancellationToken,
) {
    let period = Duration::from_millis(aggregator.config().interval_ms.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = tokio::select! {
            _ = cancel.cancelled() => break,
            report = aggregator.run_cycle(Utc::now()) => report,
        };

        if report.purge_synthetic {
            let purged = processor.store.purge_synthetic();
            info!(purged, "Providers recovered, synthetic records removed");
        }

        let count = report.records.len();
        let accepted = report
            .records
            .into_iter()
            .filter_map(|record| processor.accept(record))
            .count();
        metrics.record_aggregated(count);
        debug!(
            merged = count,
            accepted,
            synthetic = report.synthetic,
            "Aggregation cycle applied"
        );
    }
    debug!("Aggregator stopped");
}

async fn supervise(inner: Weak<PipelineInner>, monitor: HealthMonitor, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(monitor.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately, before anything had a chance to run
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for action in monitor.check() {
            let inner = inner.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(action.delay) => {}
                }
                if let Some(inner) = inner.upgrade() {
                    inner.restart_component(action.component).await;
                }
            });
        }
    }
    debug!("Health monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::provider::mock::{full_token, MockProvider};
    use crate::config::{EndpointConfig, HealthConfig, SourcesConfig};
    use crate::health::AlertLevel;
    use crate::program::PUMP_PROGRAM_ID_STR;
    use crate::rpc::mock::{creation_transaction, MockRpc, PUMP_LOG};
    use crate::rpc::{BlockSummary, BlockTransaction, SignatureInfo};
    use solana_sdk::pubkey::Pubkey;
    use tokio_test::assert_ok;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.rpc.endpoints = vec![EndpointConfig::new("https://a.example")];
        config.rpc.timeout_ms = 1000;
        config.sources = SourcesConfig {
            backoff_initial_ms: 1,
            backoff_max_ms: 10,
            ..Default::default()
        };
        config.sources.polling.interval_ms = 20;
        config.aggregator.enabled = false;
        config.health = HealthConfig {
            interval_ms: 60_000,
            ..Default::default()
        };
        config
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..150 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_same_signature_from_every_source_yields_one_record() {
        let rpc = Arc::new(MockRpc::new());
        let mint = Pubkey::new_unique().to_string();
        let creator = Pubkey::new_unique().to_string();
        rpc.add_transaction(creation_transaction(
            "sig1",
            &mint,
            &creator,
            2_000_000_000,
            Some(("MoonCoin", "MOON")),
        ));
        // Subscription reports it twice, polling and block scan once each
        rpc.push_log("sig1", &[PUMP_LOG]);
        rpc.push_log("sig1", &[PUMP_LOG]);
        rpc.signatures.lock().unwrap().push(SignatureInfo {
            signature: "sig1".into(),
            slot: 10,
            failed: false,
            block_time: None,
        });
        rpc.slots.lock().unwrap().push(12);
        rpc.blocks.lock().unwrap().insert(
            10,
            BlockSummary {
                slot: 10,
                block_time: None,
                transactions: vec![BlockTransaction {
                    signature: "sig1".into(),
                    account_keys: vec![PUMP_PROGRAM_ID_STR.to_string()],
                    failed: false,
                }],
            },
        );

        let pipeline = Pipeline::new(test_config(), rpc.clone()).unwrap();
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();
        pipeline.on_update(move |_: &TokenRecord| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_ok!(pipeline.start().await);
        assert!(pipeline.is_running());
        assert!(wait_for(|| !pipeline.current_tokens().is_empty()).await);
        // Let the remaining reports drain
        tokio::time::sleep(Duration::from_millis(200)).await;

        let tokens = pipeline.current_tokens();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].mint, mint);
        assert_eq!(tokens[0].symbol, "MOON");
        assert_eq!(rpc.get_transaction_calls.load(Ordering::SeqCst), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        let stats = pipeline.stats();
        assert_eq!(stats.detected, 1);
        assert_eq!(stats.tokens, 1);
        assert_eq!(stats.sources.len(), 3);

        pipeline.stop().await;
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_stale_creation_is_not_classified() {
        let rpc = Arc::new(MockRpc::new());
        let mint = Pubkey::new_unique().to_string();
        let mut tx = creation_transaction("old", &mint, &Pubkey::new_unique().to_string(), 1, None);
        tx.block_time = Some((Utc::now() - chrono::Duration::hours(3)).timestamp());
        rpc.add_transaction(tx);
        rpc.push_log("old", &[PUMP_LOG]);

        let mut config = test_config();
        config.sources.polling.enabled = false;
        config.sources.block_scan.enabled = false;
        let pipeline = Pipeline::new(config, rpc.clone()).unwrap();
        pipeline.start().await.unwrap();

        assert!(wait_for(|| pipeline.stats().processed == 1).await);
        assert!(pipeline.current_tokens().is_empty());
        assert_eq!(pipeline.stats().metrics.stale, 1);

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_everything_failing_degrades_without_crashing() {
        let rpc = Arc::new(MockRpc::failing());
        let mut config = test_config();
        config.sources.disable_after_failures = 2;
        config.aggregator.enabled = true;
        config.aggregator.interval_ms = 20;
        config.health = HealthConfig {
            interval_ms: 30,
            restart_backoff_initial_ms: 10,
            restart_backoff_max_ms: 20,
            max_restart_attempts: 2,
            ..Default::default()
        };
        let providers: Vec<Arc<dyn MarketDataProvider>> = vec![
            Arc::new(MockProvider::failing("pumpfun")),
            Arc::new(MockProvider::failing("dexscreener")),
        ];

        let pipeline = Pipeline::with_providers(config, rpc, providers).unwrap();
        pipeline.start().await.unwrap();

        let critical = wait_for(|| {
            pipeline
                .alerts()
                .iter()
                .any(|a| a.level == AlertLevel::Critical)
        })
        .await;
        assert!(critical);
        assert!(pipeline.is_running());

        // Synthetic records keep the consumer fed, flagged as such
        assert!(wait_for(|| !pipeline.current_tokens().is_empty()).await);
        assert!(pipeline.current_tokens().iter().all(|r| r.synthetic));
        assert!(pipeline.stats().synthetic_active);

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_provider_records_flow_into_store() {
        let rpc = Arc::new(MockRpc::new());
        let mut config = test_config();
        config.sources.subscription.enabled = false;
        config.sources.polling.enabled = false;
        config.sources.block_scan.enabled = false;
        config.aggregator.enabled = true;
        config.aggregator.interval_ms = 20;
        let mint = Pubkey::new_unique().to_string();
        let providers: Vec<Arc<dyn MarketDataProvider>> = vec![Arc::new(MockProvider::new(
            "pumpfun",
            vec![full_token(&mint, 25_000.0)],
        ))];

        let pipeline = Pipeline::with_providers(config, rpc, providers).unwrap();
        pipeline.start().await.unwrap();

        assert!(wait_for(|| !pipeline.current_tokens().is_empty()).await);
        let token = &pipeline.current_tokens()[0];
        assert_eq!(token.mint, mint);
        assert!(!token.synthetic);
        assert!(pipeline.stats().aggregation_cycles >= 1);

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let rpc = Arc::new(MockRpc::new());
        let pipeline = Pipeline::new(test_config(), rpc).unwrap();

        pipeline.start().await.unwrap();
        // Second start is a no-op
        pipeline.start().await.unwrap();
        pipeline.restart().await.unwrap();
        assert!(pipeline.is_running());

        pipeline.stop().await;
        pipeline.stop().await;
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.rpc.endpoints.clear();
        let result = Pipeline::new(config, Arc::new(MockRpc::new()));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
