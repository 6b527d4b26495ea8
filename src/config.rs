//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::program::{DEFAULT_CREATION_MARKERS, PUMP_PROGRAM_ID_STR};

// Re-export scoring config
pub use crate::scoring::{LiquidityStep, ScoringConfig, ScoringThresholds, ScoringWeights, TimingConfig};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub program: ProgramConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

/// A single interchangeable RPC endpoint
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EndpointConfig {
    pub url: String,
    /// Websocket url; derived from `url` when absent
    #[serde(default)]
    pub ws_url: Option<String>,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ws_url: None,
        }
    }

    /// Websocket address for subscriptions
    pub fn websocket_url(&self) -> String {
        if let Some(ws) = &self.ws_url {
            return ws.clone();
        }
        if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.url.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointConfig>,
    /// Bound on every network call
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_commitment")]
    pub commitment: String,
    /// EWMA smoothing factor for latency (0..1, higher = more reactive)
    #[serde(default = "default_latency_alpha")]
    pub latency_alpha: f64,
    /// Health points lost per consecutive failure
    #[serde(default = "default_failure_penalty")]
    pub failure_penalty: f64,
    /// Latency below this costs no health
    #[serde(default = "default_latency_baseline_ms")]
    pub latency_baseline_ms: f64,
    /// Endpoints below this health score count as unhealthy
    #[serde(default = "default_unhealthy_below")]
    pub unhealthy_below: f64,
    /// Cooldown applied when a 429 carries no retry hint
    #[serde(default = "default_rate_limit_cooldown_ms")]
    pub rate_limit_cooldown_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            timeout_ms: default_timeout_ms(),
            commitment: default_commitment(),
            latency_alpha: default_latency_alpha(),
            failure_penalty: default_failure_penalty(),
            latency_baseline_ms: default_latency_baseline_ms(),
            unhealthy_below: default_unhealthy_below(),
            rate_limit_cooldown_ms: default_rate_limit_cooldown_ms(),
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramConfig {
    /// Token-creation program to watch
    #[serde(default = "default_program_id")]
    pub program_id: String,
    /// Log lines that mark a creation instruction
    #[serde(default = "default_creation_markers")]
    pub creation_markers: Vec<String>,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            program_id: default_program_id(),
            creation_markers: default_creation_markers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    /// Capacity of the raw candidate channel shared by all sources
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Consecutive failures before a source disables itself
    #[serde(default = "default_disable_after_failures")]
    pub disable_after_failures: u32,
    #[serde(default)]
    pub subscription: SubscriptionSourceConfig,
    #[serde(default)]
    pub polling: PollingSourceConfig,
    #[serde(default)]
    pub block_scan: BlockScanSourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            disable_after_failures: default_disable_after_failures(),
            subscription: SubscriptionSourceConfig::default(),
            polling: PollingSourceConfig::default(),
            block_scan: BlockScanSourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for SubscriptionSourceConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Signatures fetched per poll
    #[serde(default = "default_signature_limit")]
    pub signature_limit: usize,
}

impl Default for PollingSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_poll_interval_ms(),
            signature_limit: default_signature_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockScanSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Skip ahead when the scanner falls further behind than this many slots
    #[serde(default = "default_max_slot_lag")]
    pub max_slot_lag: u64,
}

impl Default for BlockScanSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_slot_lag: default_max_slot_lag(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_max_size")]
    pub max_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_size: default_dedup_max_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    /// Concurrent extractions (respects endpoint rate limits)
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Kind of external market-data provider, selects the response normaliser
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    PumpFun,
    DexScreener,
    Generic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub url: String,
    /// Lower value = higher priority
    #[serde(default)]
    pub priority: u8,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_aggregator_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    /// Merged records below this data-quality score are dropped
    #[serde(default = "default_min_data_quality")]
    pub min_data_quality: f64,
    /// Source count at which the source component saturates
    #[serde(default = "default_max_counted_sources")]
    pub max_counted_sources: usize,
    /// Observations older than this earn no recency credit
    #[serde(default = "default_recency_window_secs")]
    pub recency_window_secs: u64,
    /// Emit flagged synthetic records when every provider fails
    #[serde(default = "default_true")]
    pub synthetic_fallback: bool,
    #[serde(default = "default_synthetic_count")]
    pub synthetic_count: usize,
    /// Provider health below this skips the provider for a cycle
    #[serde(default = "default_unhealthy_below")]
    pub unhealthy_below: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_aggregator_interval_ms(),
            providers: default_providers(),
            min_data_quality: default_min_data_quality(),
            max_counted_sources: default_max_counted_sources(),
            recency_window_secs: default_recency_window_secs(),
            synthetic_fallback: true,
            synthetic_count: default_synthetic_count(),
            unhealthy_below: default_unhealthy_below(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Tokens created longer ago than this are never classified
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,
    #[serde(default = "default_max_retained")]
    pub max_retained: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: default_freshness_window_secs(),
            max_retained: default_max_retained(),
        }
    }
}

impl PipelineConfig {
    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.freshness_window_secs as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
    /// Restart sources when nothing was detected for this long
    #[serde(default = "default_no_detection_secs")]
    pub no_detection_secs: u64,
    #[serde(default = "default_error_rate_warning")]
    pub error_rate_warning: f64,
    #[serde(default = "default_error_rate_critical")]
    pub error_rate_critical: f64,
    #[serde(default = "default_latency_warning_ms")]
    pub latency_warning_ms: f64,
    #[serde(default = "default_latency_critical_ms")]
    pub latency_critical_ms: f64,
    /// Consecutive restarts before a component is parked
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    #[serde(default = "default_restart_backoff_initial_ms")]
    pub restart_backoff_initial_ms: u64,
    #[serde(default = "default_restart_backoff_max_ms")]
    pub restart_backoff_max_ms: u64,
    /// Alerts kept for `Pipeline::alerts`
    #[serde(default = "default_alert_history")]
    pub alert_history: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_health_interval_ms(),
            no_detection_secs: default_no_detection_secs(),
            error_rate_warning: default_error_rate_warning(),
            error_rate_critical: default_error_rate_critical(),
            latency_warning_ms: default_latency_warning_ms(),
            latency_critical_ms: default_latency_critical_ms(),
            max_restart_attempts: default_max_restart_attempts(),
            restart_backoff_initial_ms: default_restart_backoff_initial_ms(),
            restart_backoff_max_ms: default_restart_backoff_max_ms(),
            alert_history: default_alert_history(),
        }
    }
}

// Default value functions
fn default_endpoints() -> Vec<EndpointConfig> {
    let url = std::env::var("RPC_ENDPOINT")
        .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into());
    let ws_url = std::env::var("RPC_WS_ENDPOINT").ok();
    vec![EndpointConfig { url, ws_url }]
}

fn default_timeout_ms() -> u64 {
    10000
}

fn default_commitment() -> String {
    "confirmed".into()
}

fn default_latency_alpha() -> f64 {
    0.3
}

fn default_failure_penalty() -> f64 {
    20.0
}

fn default_latency_baseline_ms() -> f64 {
    250.0
}

fn default_unhealthy_below() -> f64 {
    30.0
}

fn default_rate_limit_cooldown_ms() -> u64 {
    10000
}

fn default_program_id() -> String {
    PUMP_PROGRAM_ID_STR.to_string()
}

fn default_creation_markers() -> Vec<String> {
    DEFAULT_CREATION_MARKERS.iter().map(|m| m.to_string()).collect()
}

fn default_channel_capacity() -> usize {
    1000
}

fn default_backoff_initial_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30000
}

fn default_disable_after_failures() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_signature_limit() -> usize {
    25
}

fn default_max_slot_lag() -> u64 {
    32
}

fn default_dedup_max_size() -> usize {
    10000
}

fn default_workers() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    500
}

fn default_provider_timeout_ms() -> u64 {
    10000
}

fn default_aggregator_interval_ms() -> u64 {
    30000
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "pumpfun".into(),
            kind: ProviderKind::PumpFun,
            url: "https://frontend-api-v3.pump.fun/coins?offset=0&limit=50&sort=created_timestamp&order=DESC&includeNsfw=false".into(),
            priority: 0,
            enabled: true,
            timeout_ms: default_provider_timeout_ms(),
            api_key: None,
        },
        ProviderConfig {
            name: "dexscreener".into(),
            kind: ProviderKind::DexScreener,
            url: "https://api.dexscreener.com".into(),
            priority: 1,
            enabled: true,
            timeout_ms: default_provider_timeout_ms(),
            api_key: None,
        },
    ]
}

fn default_min_data_quality() -> f64 {
    70.0
}

fn default_max_counted_sources() -> usize {
    3
}

fn default_recency_window_secs() -> u64 {
    3600
}

fn default_synthetic_count() -> usize {
    5
}

fn default_freshness_window_secs() -> u64 {
    2 * 60 * 60
}

fn default_max_retained() -> usize {
    1000
}

fn default_health_interval_ms() -> u64 {
    15000
}

fn default_no_detection_secs() -> u64 {
    300
}

fn default_error_rate_warning() -> f64 {
    0.2
}

fn default_error_rate_critical() -> f64 {
    0.5
}

fn default_latency_warning_ms() -> f64 {
    3000.0
}

fn default_latency_critical_ms() -> f64 {
    8000.0
}

fn default_max_restart_attempts() -> u32 {
    5
}

fn default_restart_backoff_initial_ms() -> u64 {
    1000
}

fn default_restart_backoff_max_ms() -> u64 {
    60000
}

fn default_alert_history() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("pipeline.freshness_window_secs", default_freshness_window_secs() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix RADAR_)
            .add_source(
                config::Environment::with_prefix("RADAR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.rpc.endpoints.is_empty() {
            anyhow::bail!("At least one RPC endpoint is required");
        }

        for endpoint in &self.rpc.endpoints {
            url::Url::parse(&endpoint.url)
                .with_context(|| format!("Invalid endpoint url: {}", mask_url(&endpoint.url)))?;
        }

        if !(0.0..=1.0).contains(&self.rpc.latency_alpha) || self.rpc.latency_alpha == 0.0 {
            anyhow::bail!("latency_alpha must be in (0, 1]");
        }

        Pubkey::from_str(&self.program.program_id)
            .with_context(|| format!("Invalid program_id: {}", self.program.program_id))?;

        if self.program.creation_markers.is_empty() {
            anyhow::bail!("creation_markers cannot be empty");
        }

        if self.extractor.workers == 0 {
            anyhow::bail!("extractor.workers must be at least 1");
        }

        if self.dedup.max_size == 0 {
            anyhow::bail!("dedup.max_size must be positive");
        }

        if self.pipeline.max_retained == 0 {
            anyhow::bail!("pipeline.max_retained must be positive");
        }

        self.scoring.validate()?;

        for provider in &self.aggregator.providers {
            url::Url::parse(&provider.url)
                .with_context(|| format!("Invalid url for provider {}", provider.name))?;
        }

        if !(0.0..=100.0).contains(&self.aggregator.min_data_quality) {
            anyhow::bail!("min_data_quality must be between 0 and 100");
        }

        if self.health.error_rate_warning > self.health.error_rate_critical {
            anyhow::bail!("error_rate_warning cannot exceed error_rate_critical");
        }

        if self.health.latency_warning_ms > self.health.latency_critical_ms {
            anyhow::bail!("latency_warning_ms cannot exceed latency_critical_ms");
        }

        if !self.sources.subscription.enabled
            && !self.sources.polling.enabled
            && !self.sources.block_scan.enabled
        {
            tracing::warn!("All event sources are disabled - only the aggregator will feed tokens");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let endpoints: Vec<String> = self
            .rpc
            .endpoints
            .iter()
            .map(|e| mask_url(&e.url))
            .collect();
        let providers: Vec<String> = self
            .aggregator
            .providers
            .iter()
            .map(|p| {
                format!(
                    "{} ({:?}, priority {}, {}{})",
                    p.name,
                    p.kind,
                    p.priority,
                    if p.enabled { "enabled" } else { "disabled" },
                    if p.api_key.is_some() { ", api_key ***" } else { "" }
                )
            })
            .collect();

        format!(
            r#"Configuration:
  RPC:
    endpoints: {:?}
    timeout: {}ms
  Program:
    program_id: {}
    markers: {:?}
  Sources:
    subscription: {}
    polling: {} (every {}ms, {} signatures)
    block_scan: {}
    disable_after_failures: {}
  Dedup:
    max_size: {}
  Extractor:
    workers: {}
  Scoring:
    weights: {:?}
    thresholds: {:?}
  Aggregator:
    enabled: {}
    interval: {}ms
    providers: {:?}
    min_data_quality: {}
    synthetic_fallback: {}
  Pipeline:
    freshness_window: {}s
    max_retained: {}
  Health:
    interval: {}ms
    no_detection: {}s
    max_restart_attempts: {}
"#,
            endpoints,
            self.rpc.timeout_ms,
            self.program.program_id,
            self.program.creation_markers,
            self.sources.subscription.enabled,
            self.sources.polling.enabled,
            self.sources.polling.interval_ms,
            self.sources.polling.signature_limit,
            self.sources.block_scan.enabled,
            self.sources.disable_after_failures,
            self.dedup.max_size,
            self.extractor.workers,
            self.scoring.weights,
            self.scoring.thresholds,
            self.aggregator.enabled,
            self.aggregator.interval_ms,
            providers,
            self.aggregator.min_data_quality,
            self.aggregator.synthetic_fallback,
            self.pipeline.freshness_window_secs,
            self.pipeline.max_retained,
            self.health.interval_ms,
            self.health.no_detection_secs,
            self.health.max_restart_attempts,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
pub fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}
