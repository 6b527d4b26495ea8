//! Market-data provider abstraction
//!
//! A provider answers one GET with a JSON listing of recent tokens. Each
//! implementation normalises its own payload into [`ProviderToken`]s so
//! the aggregator only ever merges one shape.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{Error, Result};
use crate::token::{MarketObservation, Socials, TokenRecord};

use super::providers::{DexScreenerProvider, GenericProvider, PumpFunProvider};

/// Cooldown used when a 429 carries no usable Retry-After
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Longest Retry-After honoured from a provider
const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

/// A partial token record as reported by one provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderToken {
    pub mint: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub uri: Option<String>,
    pub creator: Option<String>,
    pub bonding_curve: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub market_cap_usd: Option<f64>,
    pub supply: Option<f64>,
    pub holder_count: Option<u32>,
    pub reply_count: Option<u32>,
    pub is_complete: Option<bool>,
    pub socials: Socials,
}

impl ProviderToken {
    /// Lift into a full record tagged with the provider's name
    pub fn into_record(self, provider: &str, observed_at: DateTime<Utc>) -> TokenRecord {
        let mut record = TokenRecord::new(self.mint, self.created_at.unwrap_or(observed_at));
        record.discovered_at = observed_at;

        if let (Some(name), Some(symbol)) = (non_blank(self.name), non_blank(self.symbol)) {
            record.name = name;
            record.symbol = symbol;
            record.metadata_verified = true;
        }
        record.description = self.description.unwrap_or_default();
        record.uri = non_blank(self.uri);
        record.creator = non_blank(self.creator);
        record.bonding_curve = non_blank(self.bonding_curve);
        record.reply_count = self.reply_count;
        record.socials = self.socials;
        record.is_complete = self.is_complete.unwrap_or(false);
        record.is_live = !record.is_complete;

        record.observe(
            provider,
            MarketObservation {
                market_cap_usd: self.market_cap_usd.filter(|v| v.is_finite() && *v >= 0.0),
                supply: self.supply.filter(|v| v.is_finite() && *v >= 0.0),
                holder_count: self.holder_count,
                observed_at,
            },
        );
        record
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// External market-data source queried by the aggregator
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Name used as the provenance tag on merged records
    fn name(&self) -> &str;

    /// Lower value = queried and trusted first
    fn priority(&self) -> u8;

    /// Upper bound for one `fetch`
    fn timeout(&self) -> Duration;

    /// Fetch and normalise the provider's current listing
    async fn fetch(&self) -> Result<Vec<ProviderToken>>;
}

/// Build the enabled providers from configuration
pub fn build_providers(configs: &[ProviderConfig]) -> Vec<Arc<dyn MarketDataProvider>> {
    configs
        .iter()
        .filter(|c| c.enabled)
        .map(|c| -> Arc<dyn MarketDataProvider> {
            match c.kind {
                ProviderKind::PumpFun => Arc::new(PumpFunProvider::new(c)),
                ProviderKind::DexScreener => Arc::new(DexScreenerProvider::new(c)),
                ProviderKind::Generic => Arc::new(GenericProvider::new(c)),
            }
        })
        .collect()
}

/// Shared HTTP client for one provider
pub(crate) fn http_client(config: &ProviderConfig) -> Client {
    Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .user_agent(concat!("pumpfun-radar/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// GET a JSON document, mapping HTTP failures onto the error taxonomy
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    provider: &str,
    url: &str,
    api_key: Option<&str>,
) -> Result<T> {
    let mut request = client.get(url).header(header::ACCEPT, "application/json");
    if let Some(key) = api_key {
        request = request.header("x-api-key", key);
    }

    let response = request.send().await.map_err(|e| Error::Provider {
        provider: provider.to_string(),
        reason: e.to_string(),
    })?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        return Err(Error::RateLimited {
            endpoint: provider.to_string(),
            retry_after,
        });
    }
    if !status.is_success() {
        return Err(Error::Provider {
            provider: provider.to_string(),
            reason: format!("HTTP {}", status),
        });
    }

    let body = response.bytes().await.map_err(|e| Error::Provider {
        provider: provider.to_string(),
        reason: e.to_string(),
    })?;
    debug!(provider, bytes = body.len(), "Provider response received");

    serde_json::from_slice(&body).map_err(|e| Error::ProviderPayload {
        provider: provider.to_string(),
        reason: e.to_string(),
    })
}

/// Cooldown for a 429, from its Retry-After seconds when usable
pub(crate) fn retry_after(header: Option<&str>) -> Duration {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
        .min(MAX_RETRY_AFTER)
}

/// Parse a timestamp given as unix seconds, unix millis or RFC 3339
pub(crate) fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            timestamp_from_unix(raw)
        }
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<i64>().ok().and_then(timestamp_from_unix)),
        _ => None,
    }
}

/// Unix seconds or millis, told apart by magnitude
pub(crate) fn timestamp_from_unix(raw: i64) -> Option<DateTime<Utc>> {
    if raw <= 0 {
        return None;
    }
    if raw > 10_000_000_000 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider returning a fixed listing, or failing on demand
    pub struct MockProvider {
        pub name: String,
        pub priority: u8,
        pub tokens: Mutex<Vec<ProviderToken>>,
        pub fail: AtomicBool,
        pub calls: AtomicUsize,
    }

    impl MockProvider {
        pub fn new(name: &str, tokens: Vec<ProviderToken>) -> Self {
            Self {
                name: name.to_string(),
                priority: 0,
                tokens: Mutex::new(tokens),
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(name: &str) -> Self {
            let provider = Self::new(name, Vec::new());
            provider.fail.store(true, Ordering::SeqCst);
            provider
        }
    }

    #[async_trait]
    impl MarketDataProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn fetch(&self) -> Result<Vec<ProviderToken>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Provider {
                    provider: self.name.clone(),
                    reason: "mock outage".into(),
                });
            }
            Ok(self.tokens.lock().unwrap().clone())
        }
    }

    /// A fully populated provider token
    pub fn full_token(mint: &str, market_cap: f64) -> ProviderToken {
        ProviderToken {
            mint: mint.to_string(),
            name: Some("Moon Coin".into()),
            symbol: Some("MOON".into()),
            description: Some("To the moon".into()),
            uri: Some("https://ipfs.io/ipfs/moon".into()),
            creator: Some("Creator111".into()),
            bonding_curve: Some("Curve111".into()),
            created_at: Some(Utc::now() - chrono::Duration::minutes(3)),
            market_cap_usd: Some(market_cap),
            supply: Some(1_000_000_000.0),
            holder_count: Some(25),
            reply_count: Some(3),
            is_complete: Some(false),
            socials: Socials {
                website: None,
                twitter: Some("https://x.com/moon".into()),
                telegram: None,
            },
        }
    }
}
