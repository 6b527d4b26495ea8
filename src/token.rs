//! Canonical token record flowing through the pipeline
//!
//! A `TokenRecord` is created once per mint, either by the transaction
//! extractor or by the aggregator, and afterwards only grows: merging a
//! second report of the same mint fills gaps, unions provenance and
//! averages per-source market observations. The mint never changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Error, Result};

/// Source tag for records found by the log subscription
pub const SOURCE_SUBSCRIPTION: &str = "rpc:subscription";
/// Source tag for records found by signature polling
pub const SOURCE_POLLING: &str = "rpc:polling";
/// Source tag for records found by block scanning
pub const SOURCE_BLOCK_SCAN: &str = "rpc:block_scan";
/// Source tag for degraded-mode placeholder records
pub const SOURCE_SYNTHETIC: &str = "synthetic";

/// Risk tier derived from the opportunity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    #[default]
    High,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Low => write!(f, "low"),
            RiskTier::Medium => write!(f, "medium"),
            RiskTier::High => write!(f, "high"),
        }
    }
}

/// Output classification, ordered ignored < classified < recommended
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    #[default]
    Ignored,
    Classified,
    Recommended,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Ignored => write!(f, "ignored"),
            Classification::Classified => write!(f, "classified"),
            Classification::Recommended => write!(f, "recommended"),
        }
    }
}

/// Social links attached to a token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Socials {
    pub website: Option<String>,
    pub twitter: Option<String>,
    pub telegram: Option<String>,
}

impl Socials {
    pub fn count(&self) -> usize {
        [&self.website, &self.twitter, &self.telegram]
            .iter()
            .filter(|s| s.as_deref().is_some_and(|v| !v.trim().is_empty()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    fn merge(&mut self, other: &Socials) {
        prefer_optional(&mut self.website, &other.website);
        prefer_optional(&mut self.twitter, &other.twitter);
        prefer_optional(&mut self.telegram, &other.telegram);
    }
}

/// Market figures reported by one source at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketObservation {
    pub market_cap_usd: Option<f64>,
    pub supply: Option<f64>,
    pub holder_count: Option<u32>,
    pub observed_at: DateTime<Utc>,
}

/// The canonical unit of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Token mint address, immutable
    pub mint: String,
    /// Fee payer of the creation transaction
    pub creator: Option<String>,
    pub created_at: DateTime<Utc>,
    pub discovered_at: DateTime<Utc>,
    /// Creation transaction signature, when found on-chain
    pub signature: Option<String>,
    pub name: String,
    pub symbol: String,
    pub description: String,
    /// False while name/symbol are placeholders derived from the mint
    pub metadata_verified: bool,
    pub uri: Option<String>,
    pub bonding_curve: Option<String>,
    pub initial_liquidity_sol: Option<f64>,
    pub supply: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub holder_count: Option<u32>,
    pub is_live: bool,
    pub is_complete: bool,
    pub socials: Socials,
    pub reply_count: Option<u32>,
    /// Every source that contributed to this record
    pub data_sources: BTreeSet<String>,
    /// Latest market observation per source
    pub observations: BTreeMap<String, MarketObservation>,
    pub data_quality: f64,
    pub opportunity_score: f64,
    pub risk_tier: RiskTier,
    pub classification: Classification,
    /// Degraded-mode placeholder, never real market data
    pub synthetic: bool,
}

impl TokenRecord {
    /// Create an empty record for a mint
    pub fn new(mint: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let mint = mint.into();
        Self {
            name: placeholder_name(&mint),
            symbol: placeholder_symbol(&mint),
            mint,
            creator: None,
            created_at,
            discovered_at: Utc::now(),
            signature: None,
            description: String::new(),
            metadata_verified: false,
            uri: None,
            bonding_curve: None,
            initial_liquidity_sol: None,
            supply: None,
            market_cap_usd: None,
            holder_count: None,
            is_live: false,
            is_complete: false,
            socials: Socials::default(),
            reply_count: None,
            data_sources: BTreeSet::new(),
            observations: BTreeMap::new(),
            data_quality: 0.0,
            opportunity_score: 0.0,
            risk_tier: RiskTier::High,
            classification: Classification::Ignored,
            synthetic: false,
        }
    }

    /// Record a market observation from a source and refresh derived fields
    pub fn observe(&mut self, source: impl Into<String>, observation: MarketObservation) {
        let source = source.into();
        self.data_sources.insert(source.clone());
        self.observations.insert(source, observation);
        self.refresh_market_fields();
    }

    /// Age of the token at `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Check if the token is young enough to be classified
    pub fn is_fresh(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.age(now) <= window
    }

    /// Most recent observation time across sources
    pub fn last_observed(&self) -> Option<DateTime<Utc>> {
        self.observations.values().map(|o| o.observed_at).max()
    }

    /// Merge another report of the same mint into this record.
    ///
    /// Present fields never become absent, strings keep the verified or
    /// longer value, market figures are averaged across sources and the
    /// better data-quality score is kept.
    pub fn merge(&mut self, other: &TokenRecord) -> Result<()> {
        if self.mint != other.mint {
            return Err(Error::Internal(format!(
                "cannot merge {} into {}",
                other.mint, self.mint
            )));
        }

        if self.creator.is_none() {
            self.creator = other.creator.clone();
        }
        self.created_at = self.created_at.min(other.created_at);
        self.discovered_at = self.discovered_at.min(other.discovered_at);
        if self.signature.is_none() {
            self.signature = other.signature.clone();
        }

        // Verified metadata wins over placeholders, then the longer value
        match (self.metadata_verified, other.metadata_verified) {
            (false, true) => {
                self.name = other.name.clone();
                self.symbol = other.symbol.clone();
                prefer_string(&mut self.description, &other.description);
            }
            (true, false) => {
                prefer_string(&mut self.description, &other.description);
            }
            _ => {
                prefer_string(&mut self.name, &other.name);
                prefer_string(&mut self.symbol, &other.symbol);
                prefer_string(&mut self.description, &other.description);
            }
        }
        self.metadata_verified |= other.metadata_verified;

        prefer_optional(&mut self.uri, &other.uri);
        if self.bonding_curve.is_none() {
            self.bonding_curve = other.bonding_curve.clone();
        }
        if self.initial_liquidity_sol.is_none() {
            self.initial_liquidity_sol = other.initial_liquidity_sol;
        }

        self.is_live |= other.is_live;
        self.is_complete |= other.is_complete;
        self.socials.merge(&other.socials);
        self.reply_count = max_option(self.reply_count, other.reply_count);

        self.data_sources
            .extend(other.data_sources.iter().cloned());
        for (source, observation) in &other.observations {
            match self.observations.get(source) {
                Some(existing) if existing.observed_at > observation.observed_at => {}
                _ => {
                    self.observations.insert(source.clone(), observation.clone());
                }
            }
        }

        // Fields a source set directly, outside any observation
        if self.market_cap_usd.is_none() {
            self.market_cap_usd = other.market_cap_usd;
        }
        if self.supply.is_none() {
            self.supply = other.supply;
        }
        self.holder_count = max_option(self.holder_count, other.holder_count);

        self.synthetic |= other.synthetic;
        self.data_quality = self.data_quality.max(other.data_quality);
        self.refresh_market_fields();
        Ok(())
    }

    /// Recompute market fields from per-source observations
    fn refresh_market_fields(&mut self) {
        if let Some(avg) = average(self.observations.values().filter_map(|o| o.market_cap_usd)) {
            self.market_cap_usd = Some(avg);
        }
        if let Some(avg) = average(self.observations.values().filter_map(|o| o.supply)) {
            self.supply = Some(avg);
        }
        let observed_holders = self.observations.values().filter_map(|o| o.holder_count).max();
        self.holder_count = max_option(self.holder_count, observed_holders);
    }
}

/// Placeholder name for tokens whose metadata was not found
pub fn placeholder_name(mint: &str) -> String {
    format!("Token {}", mint.chars().take(8).collect::<String>())
}

/// Placeholder symbol for tokens whose metadata was not found
pub fn placeholder_symbol(mint: &str) -> String {
    mint.chars().take(4).collect::<String>().to_uppercase()
}

fn prefer_string(current: &mut String, candidate: &str) {
    let candidate = candidate.trim();
    if candidate.len() > current.trim().len() {
        *current = candidate.to_string();
    }
}

fn prefer_optional(current: &mut Option<String>, candidate: &Option<String>) {
    match (current.as_mut(), candidate) {
        (None, Some(c)) if !c.trim().is_empty() => *current = Some(c.trim().to_string()),
        (Some(cur), Some(c)) => prefer_string(cur, c),
        _ => {}
    }
}

fn max_option<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const MINT: &str = "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr";

    fn provider_record(source: &str, market_cap: f64) -> TokenRecord {
        let mut record = TokenRecord::new(MINT, Utc::now() - Duration::minutes(5));
        record.name = "Moon Coin".into();
        record.symbol = "MOON".into();
        record.metadata_verified = true;
        record.observe(
            source,
            MarketObservation {
                market_cap_usd: Some(market_cap),
                supply: Some(1_000_000_000.0),
                holder_count: Some(40),
                observed_at: Utc::now(),
            },
        );
        record
    }

    #[test]
    fn test_merge_averages_market_cap_across_providers() {
        let mut a = provider_record("pumpfun", 1000.0);
        let b = provider_record("dexscreener", 3000.0);

        a.merge(&b).unwrap();

        assert_eq!(a.market_cap_usd, Some(2000.0));
        assert!(a.data_sources.contains("pumpfun"));
        assert!(a.data_sources.contains("dexscreener"));
        assert_eq!(a.data_sources.len(), 2);
    }

    #[test]
    fn test_merge_keeps_provider_data_quality() {
        let mut chain = TokenRecord::new(MINT, Utc::now() - Duration::minutes(5));
        chain.signature = Some("sig1".into());
        let mut provider = provider_record("pumpfun", 2000.0);
        provider.data_quality = 86.0;

        chain.merge(&provider).unwrap();
        assert_eq!(chain.data_quality, 86.0);

        // A later chain report does not lower it again
        let later = TokenRecord::new(MINT, Utc::now());
        chain.merge(&later).unwrap();
        assert_eq!(chain.data_quality, 86.0);
    }

    #[test]
    fn test_merge_with_self_is_identity() {
        let mut record = provider_record("pumpfun", 1500.0);
        record.creator = Some("creator".into());
        record.socials.website = Some("https://moon.example".into());
        record.reply_count = Some(4);
        let snapshot = record.clone();

        record.merge(&snapshot).unwrap();

        assert_eq!(record, snapshot);
    }

    #[test]
    fn test_merge_rejects_different_mint() {
        let mut a = provider_record("pumpfun", 1000.0);
        let b = TokenRecord::new("OtherMint1111111111111111111111111111111111", Utc::now());
        assert!(a.merge(&b).is_err());
        assert_eq!(a.mint, MINT);
    }

    #[test]
    fn test_verified_metadata_replaces_placeholder() {
        let mut chain = TokenRecord::new(MINT, Utc::now());
        chain.creator = Some("creator".into());
        chain.initial_liquidity_sol = Some(2.5);
        chain.data_sources.insert(SOURCE_POLLING.into());
        assert_eq!(chain.symbol, "7GCI");

        let provider = provider_record("pumpfun", 1000.0);
        chain.merge(&provider).unwrap();

        assert_eq!(chain.name, "Moon Coin");
        assert_eq!(chain.symbol, "MOON");
        assert!(chain.metadata_verified);
        // Chain-only fields survive
        assert_eq!(chain.creator.as_deref(), Some("creator"));
        assert_eq!(chain.initial_liquidity_sol, Some(2.5));
    }

    #[test]
    fn test_merge_never_regresses_present_fields() {
        let mut rich = provider_record("pumpfun", 1000.0);
        rich.description = "A coin going to the moon".into();
        rich.socials.twitter = Some("https://x.com/moon".into());
        rich.reply_count = Some(12);

        let mut sparse = TokenRecord::new(MINT, Utc::now());
        sparse.metadata_verified = true;
        sparse.name = "Moon".into();
        sparse.symbol = "M".into();

        rich.merge(&sparse).unwrap();

        assert_eq!(rich.name, "Moon Coin");
        assert_eq!(rich.symbol, "MOON");
        assert_eq!(rich.description, "A coin going to the moon");
        assert!(rich.socials.twitter.is_some());
        assert_eq!(rich.reply_count, Some(12));
        assert_eq!(rich.market_cap_usd, Some(1000.0));
    }

    #[test]
    fn test_newer_observation_replaces_same_source() {
        let mut a = provider_record("pumpfun", 1000.0);
        let mut b = provider_record("pumpfun", 5000.0);
        b.observations.get_mut("pumpfun").unwrap().observed_at = Utc::now() + Duration::seconds(5);

        a.merge(&b).unwrap();
        assert_eq!(a.market_cap_usd, Some(5000.0));
    }

    #[test]
    fn test_freshness() {
        let now = Utc::now();
        let record = TokenRecord::new(MINT, now - Duration::hours(3));
        assert!(!record.is_fresh(now, Duration::hours(2)));
        assert!(record.is_fresh(now, Duration::hours(4)));
    }

    #[test]
    fn test_classification_ordering() {
        assert!(Classification::Recommended > Classification::Classified);
        assert!(Classification::Classified > Classification::Ignored);
    }

    #[test]
    fn test_socials_count() {
        let socials = Socials {
            website: Some("https://a.example".into()),
            twitter: Some("  ".into()),
            telegram: None,
        };
        assert_eq!(socials.count(), 1);
    }
}
