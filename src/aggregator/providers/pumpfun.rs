//! pump.fun frontend coin listing

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::aggregator::provider::{get_json, http_client, timestamp_from_unix, MarketDataProvider, ProviderToken};
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::token::Socials;

/// pump.fun mints use 6 decimals
const TOKEN_DECIMALS: i32 = 6;

#[derive(Debug, Clone, Deserialize)]
pub struct PumpCoin {
    pub mint: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub metadata_uri: Option<String>,
    pub twitter: Option<String>,
    pub telegram: Option<String>,
    pub website: Option<String>,
    pub bonding_curve: Option<String>,
    pub creator: Option<String>,
    /// Milliseconds since epoch
    pub created_timestamp: Option<i64>,
    pub complete: Option<bool>,
    pub usd_market_cap: Option<f64>,
    /// Raw supply in base units
    pub total_supply: Option<f64>,
    pub reply_count: Option<u32>,
}

impl From<PumpCoin> for ProviderToken {
    fn from(coin: PumpCoin) -> Self {
        ProviderToken {
            mint: coin.mint,
            name: coin.name,
            symbol: coin.symbol,
            description: coin.description,
            uri: coin.metadata_uri,
            creator: coin.creator,
            bonding_curve: coin.bonding_curve,
            created_at: coin.created_timestamp.and_then(timestamp_from_unix),
            market_cap_usd: coin.usd_market_cap,
            supply: coin.total_supply.map(|s| s / 10f64.powi(TOKEN_DECIMALS)),
            holder_count: None,
            reply_count: coin.reply_count,
            is_complete: coin.complete,
            socials: Socials {
                website: coin.website,
                twitter: coin.twitter,
                telegram: coin.telegram,
            },
        }
    }
}

pub struct PumpFunProvider {
    name: String,
    url: String,
    priority: u8,
    timeout: Duration,
    api_key: Option<String>,
    client: Client,
}

impl PumpFunProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            priority: config.priority,
            timeout: Duration::from_millis(config.timeout_ms),
            api_key: config.api_key.clone(),
            client: http_client(config),
        }
    }

    /// Normalise a coin listing, skipping entries without a mint
    pub fn normalise(coins: Vec<PumpCoin>) -> Vec<ProviderToken> {
        coins
            .into_iter()
            .filter(|c| !c.mint.trim().is_empty())
            .map(ProviderToken::from)
            .collect()
    }
}

#[async_trait]
impl MarketDataProvider for PumpFunProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self) -> Result<Vec<ProviderToken>> {
        let coins: Vec<PumpCoin> =
            get_json(&self.client, &self.name, &self.url, self.api_key.as_deref()).await?;
        Ok(Self::normalise(coins))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"[
        {
            "mint": "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin",
            "name": "Moon Coin",
            "symbol": "MOON",
            "description": "gm",
            "image_uri": "https://ipfs.io/ipfs/img",
            "metadata_uri": "https://ipfs.io/ipfs/meta",
            "twitter": "https://x.com/moon",
            "telegram": null,
            "bonding_curve": "Curve111",
            "creator": "Creator111",
            "created_timestamp": 1710338400000,
            "complete": false,
            "usd_market_cap": 6543.21,
            "total_supply": 1000000000000000,
            "reply_count": 7,
            "nsfw": false
        },
        { "mint": "" }
    ]"#;

    #[test]
    fn test_normalise_listing() {
        let coins: Vec<PumpCoin> = serde_json::from_str(LISTING).unwrap();
        let tokens = PumpFunProvider::normalise(coins);

        assert_eq!(tokens.len(), 1);
        let token = &tokens[0];
        assert_eq!(token.symbol.as_deref(), Some("MOON"));
        assert_eq!(token.market_cap_usd, Some(6543.21));
        assert_eq!(token.supply, Some(1_000_000_000.0));
        assert_eq!(token.reply_count, Some(7));
        assert_eq!(token.created_at.unwrap().timestamp(), 1_710_338_400);
        assert_eq!(token.socials.count(), 1);
        assert_eq!(token.is_complete, Some(false));
    }

    #[test]
    fn test_unexpected_shape_is_payload_error() {
        let result: std::result::Result<Vec<PumpCoin>, _> = serde_json::from_str(r#"{"error":"x"}"#);
        assert!(result.is_err());
    }
}
