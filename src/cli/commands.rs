//! CLI command implementations

use anyhow::Result;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::connect_async;
use tracing::{info, warn};

use crate::aggregator::build_providers;
use crate::config::Config;
use crate::endpoint::EndpointPool;
use crate::pipeline::{Pipeline, PipelineStats};
use crate::rpc::{ChainRpc, SolanaRpc};
use crate::token::{Classification, TokenRecord};

/// How often `start` logs pipeline stats
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Tokens listed in the shutdown summary
const SUMMARY_TOKENS: usize = 10;

/// Start the detection pipeline
pub async fn start(config: &Config, duration_secs: Option<u64>) -> Result<()> {
    info!("Starting pump.fun radar...");
    info!(
        "Endpoints: {}, workers: {}, freshness window: {}s",
        config.rpc.endpoints.len(),
        config.extractor.workers,
        config.pipeline.freshness_window_secs
    );

    let rpc: Arc<dyn ChainRpc> = Arc::new(SolanaRpc::new(&config.rpc)?);
    let pipeline = Pipeline::new(config.clone(), rpc)?;

    // Print each recommended mint once, not on every update
    let announced: DashSet<String> = DashSet::new();
    pipeline.on_update(move |record: &TokenRecord| {
        if record.classification == Classification::Recommended && announced.insert(record.mint.clone()) {
            println!("{}", format_token(record));
        }
    });

    pipeline.start().await?;

    let deadline = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = &mut deadline => {
                info!("Run duration elapsed, shutting down...");
                break;
            }
            _ = ticker.tick() => log_stats(&pipeline.stats()),
        }
    }

    pipeline.stop().await;
    print_summary(&pipeline.stats(), &pipeline.current_tokens());
    Ok(())
}

fn log_stats(stats: &PipelineStats) {
    info!(
        detected = stats.detected,
        processed = stats.processed,
        tokens = stats.tokens,
        duplicates = stats.duplicates,
        error_rate = format!("{:.1}%", stats.error_rate * 100.0),
        rpc_latency_ms = stats.avg_latency_ms as u64,
        synthetic = stats.synthetic_active,
        "Pipeline stats"
    );
    for source in &stats.sources {
        if source.disabled {
            warn!(source = %source.kind, failures = source.consecutive_failures, "Source disabled");
        }
    }
}

fn format_token(record: &TokenRecord) -> String {
    format!(
        "{:<44} {:<10} {:>5.1}  {:<6} {:<11}{}",
        record.mint,
        record.symbol,
        record.opportunity_score,
        record.risk_tier.to_string(),
        record.classification.to_string(),
        if record.synthetic { "  [synthetic]" } else { "" }
    )
}

fn print_summary(stats: &PipelineStats, tokens: &[TokenRecord]) {
    println!("\n=== RADAR SUMMARY ===\n");
    println!("Detected:    {}", stats.detected);
    println!("Processed:   {}", stats.processed);
    println!("Duplicates:  {}", stats.duplicates);
    println!("Error rate:  {:.1}%", stats.error_rate * 100.0);
    println!("Tokens held: {} ({} evicted)", stats.tokens, stats.evicted);
    println!("Alerts:      {}", stats.alerts);

    println!("\n=== TOP TOKENS ===\n");
    if tokens.is_empty() {
        println!("No fresh tokens.");
    }
    for record in tokens.iter().take(SUMMARY_TOKENS) {
        println!("{}", format_token(record));
    }
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Probe every endpoint and provider once
pub async fn check(config: &Config) -> Result<()> {
    println!("\n=== RADAR HEALTH CHECK ===\n");

    let mut all_healthy = true;
    let rpc = SolanaRpc::new(&config.rpc)?;
    let pool = EndpointPool::new(&config.rpc)?;

    for endpoint in pool.endpoints() {
        print!("RPC {}... ", endpoint.display_url());
        let started = Instant::now();
        match tokio::time::timeout(pool.timeout(), rpc.get_slot(endpoint)).await {
            Ok(Ok(slot)) => println!("OK (slot {}, {}ms)", slot, started.elapsed().as_millis()),
            Ok(Err(e)) => {
                println!("FAILED: {}", e);
                all_healthy = false;
            }
            Err(_) => {
                println!("FAILED: timed out after {}ms", pool.timeout().as_millis());
                all_healthy = false;
            }
        }

        if config.sources.subscription.enabled || config.sources.block_scan.enabled {
            print!("Websocket {}... ", endpoint.ws_url);
            match check_websocket(&endpoint.ws_url).await {
                Ok(latency) => println!("OK ({}ms)", latency),
                Err(e) => {
                    println!("FAILED: {}", e);
                    all_healthy = false;
                }
            }
        }
    }

    if config.aggregator.enabled {
        for provider in build_providers(&config.aggregator.providers) {
            print!("Provider {}... ", provider.name());
            let started = Instant::now();
            match tokio::time::timeout(provider.timeout(), provider.fetch()).await {
                Ok(Ok(tokens)) => println!(
                    "OK ({} tokens, {}ms)",
                    tokens.len(),
                    started.elapsed().as_millis()
                ),
                Ok(Err(e)) => {
                    println!("FAILED: {}", e);
                    all_healthy = false;
                }
                Err(_) => {
                    println!("FAILED: timed out");
                    all_healthy = false;
                }
            }
        }
    } else {
        println!("Aggregator... DISABLED");
    }

    println!();
    if all_healthy {
        println!("All endpoints and providers reachable!");
    } else {
        println!("Some checks failed. The pipeline degrades around them, see errors above.");
    }

    Ok(())
}

async fn check_websocket(ws_url: &str) -> Result<u128> {
    let url = url::Url::parse(ws_url).map_err(|e| anyhow::anyhow!("Invalid WebSocket URL: {}", e))?;
    let timeout = Duration::from_secs(5);
    let started = Instant::now();

    match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws, _))) => {
            drop(ws);
            Ok(started.elapsed().as_millis())
        }
        Ok(Err(e)) => Err(anyhow::anyhow!("WebSocket connection failed: {}", e)),
        Err(_) => Err(anyhow::anyhow!("Connection timed out after {}s", timeout.as_secs())),
    }
}
