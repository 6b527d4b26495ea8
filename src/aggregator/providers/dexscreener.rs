//! DexScreener token profiles and boosts with pair lookup

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

use crate::aggregator::provider::{get_json, http_client, timestamp_from_unix, MarketDataProvider, ProviderToken};
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::token::Socials;

const CHAIN_ID: &str = "solana";
/// Mints per pair lookup, the API's batch limit
const PAIR_BATCH: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileLink {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub label: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenProfile {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "tokenAddress")]
    pub token_address: String,
    pub description: Option<String>,
    #[serde(default)]
    pub links: Option<Vec<ProfileLink>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBoost {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "tokenAddress")]
    pub token_address: String,
    pub description: Option<String>,
    #[serde(default)]
    pub links: Option<Vec<ProfileLink>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseToken {
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexPair {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "dexId")]
    pub dex_id: String,
    #[serde(rename = "baseToken")]
    pub base_token: BaseToken,
    #[serde(rename = "marketCap")]
    pub market_cap: Option<f64>,
    pub fdv: Option<f64>,
    /// Milliseconds since epoch
    #[serde(rename = "pairCreatedAt")]
    pub pair_created_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPairsResponse {
    pub pairs: Option<Vec<DexPair>>,
}

/// Profile or boost data that seeds a lookup
#[derive(Debug, Clone, Default)]
struct Listing {
    description: Option<String>,
    socials: Socials,
}

fn socials_from_links(links: Option<&Vec<ProfileLink>>) -> Socials {
    let mut socials = Socials::default();
    for link in links.into_iter().flatten() {
        let kind = link
            .kind
            .as_deref()
            .or(link.label.as_deref())
            .unwrap_or_default()
            .to_lowercase();
        let slot = match kind.as_str() {
            "twitter" | "x" => &mut socials.twitter,
            "telegram" => &mut socials.telegram,
            "website" => &mut socials.website,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(link.url.clone());
        }
    }
    socials
}

/// Prefer pump.fun venues, then the first pair listed
fn preferred_pair(pairs: &[DexPair]) -> Option<&DexPair> {
    pairs
        .iter()
        .find(|p| p.dex_id == "pumpswap" || p.dex_id == "pumpfun")
        .or_else(|| pairs.first())
}

fn to_token(mint: &str, pair: &DexPair, listing: &Listing) -> ProviderToken {
    ProviderToken {
        mint: mint.to_string(),
        name: pair.base_token.name.clone(),
        symbol: pair.base_token.symbol.clone(),
        description: listing.description.clone(),
        created_at: pair.pair_created_at.and_then(timestamp_from_unix),
        market_cap_usd: pair.market_cap.or(pair.fdv),
        socials: listing.socials.clone(),
        ..Default::default()
    }
}

pub struct DexScreenerProvider {
    name: String,
    base_url: String,
    priority: u8,
    timeout: Duration,
    client: Client,
}

impl DexScreenerProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            priority: config.priority,
            timeout: Duration::from_millis(config.timeout_ms),
            client: http_client(config),
        }
    }

    async fn latest_profiles(&self) -> Result<Vec<TokenProfile>> {
        let url = format!("{}/token-profiles/latest/v1", self.base_url);
        get_json(&self.client, &self.name, &url, None).await
    }

    async fn top_boosts(&self) -> Result<Vec<TokenBoost>> {
        let url = format!("{}/token-boosts/top/v1", self.base_url);
        get_json(&self.client, &self.name, &url, None).await
    }

    async fn pairs(&self, mints: &[String]) -> Result<Vec<DexPair>> {
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, mints.join(","));
        let response: TokenPairsResponse = get_json(&self.client, &self.name, &url, None).await?;
        Ok(response.pairs.unwrap_or_default())
    }

    /// Solana mints to look up, profiles before boosts, first seen wins
    fn collect_listings(
        profiles: Vec<TokenProfile>,
        boosts: Vec<TokenBoost>,
    ) -> Vec<(String, Listing)> {
        let mut seen = HashSet::new();
        let profiles = profiles.into_iter().map(|p| {
            (p.chain_id, p.token_address, p.description, p.links)
        });
        let boosts = boosts.into_iter().map(|b| {
            (b.chain_id, b.token_address, b.description, b.links)
        });

        profiles
            .chain(boosts)
            .filter(|(chain, _, _, _)| chain == CHAIN_ID)
            .filter(|(_, mint, _, _)| seen.insert(mint.clone()))
            .map(|(_, mint, description, links)| {
                let listing = Listing {
                    description,
                    socials: socials_from_links(links.as_ref()),
                };
                (mint, listing)
            })
            .collect()
    }

    fn join_pairs(listings: &[(String, Listing)], pairs: Vec<DexPair>) -> Vec<ProviderToken> {
        let mut by_mint: HashMap<String, Vec<DexPair>> = HashMap::new();
        for pair in pairs.into_iter().filter(|p| p.chain_id == CHAIN_ID) {
            by_mint
                .entry(pair.base_token.address.clone())
                .or_default()
                .push(pair);
        }

        listings
            .iter()
            .filter_map(|(mint, listing)| {
                let pairs = by_mint.get(mint)?;
                preferred_pair(pairs).map(|pair| to_token(mint, pair, listing))
            })
            .collect()
    }
}

#[async_trait]
impl MarketDataProvider for DexScreenerProvider {
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
        let profiles = self.latest_profiles().await?;
        // Boosts are a bonus: a failure here does not fail the cycle
        let boosts = match self.top_boosts().await {
            Ok(boosts) => boosts,
            Err(e) => {
                warn!(provider = %self.name, error = %e, "Failed to fetch boosts");
                Vec::new()
            }
        };

        let listings = Self::collect_listings(profiles, boosts);
        debug!(provider = %self.name, mints = listings.len(), "Looking up DexScreener pairs");

        let mut tokens = Vec::with_capacity(listings.len());
        for chunk in listings.chunks(PAIR_BATCH) {
            let mints: Vec<String> = chunk.iter().map(|(m, _)| m.clone()).collect();
            let pairs = self.pairs(&mints).await?;
            tokens.extend(Self::join_pairs(chunk, pairs));
        }
        Ok(tokens)
    }
}
