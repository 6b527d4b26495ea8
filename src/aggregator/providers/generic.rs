//! Generic JSON listing provider
//!
//! Accepts either a bare array or an object wrapping the array under one
//! of the usual keys, and reads each field under its common aliases.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::aggregator::provider::{get_json, http_client, parse_timestamp, MarketDataProvider, ProviderToken};
use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::token::Socials;

const LIST_KEYS: &[&str] = &["data", "tokens", "coins", "items", "results"];
const MINT_KEYS: &[&str] = &["mint", "address", "tokenAddress", "token_address", "mint_address"];
const NAME_KEYS: &[&str] = &["name", "tokenName", "token_name"];
const SYMBOL_KEYS: &[&str] = &["symbol", "ticker", "tokenSymbol"];
const DESCRIPTION_KEYS: &[&str] = &["description", "desc"];
const URI_KEYS: &[&str] = &["uri", "metadata_uri", "metadataUri"];
const CREATOR_KEYS: &[&str] = &["creator", "deployer", "dev"];
const CURVE_KEYS: &[&str] = &["bonding_curve", "bondingCurve"];
const CREATED_KEYS: &[&str] = &["created_at", "createdAt", "created_timestamp", "timestamp"];
const MARKET_CAP_KEYS: &[&str] = &["market_cap_usd", "usd_market_cap", "marketCap", "market_cap", "mc"];
const SUPPLY_KEYS: &[&str] = &["supply", "total_supply", "totalSupply"];
const HOLDER_KEYS: &[&str] = &["holders", "holder_count", "holderCount"];
const REPLY_KEYS: &[&str] = &["reply_count", "replies", "replyCount"];
const COMPLETE_KEYS: &[&str] = &["complete", "graduated", "is_complete"];

fn field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| object.get(*k))
        .find(|v| !v.is_null())
}

fn string_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match field(object, keys)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Numbers may arrive as JSON numbers or numeric strings
fn number_field(object: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    match field(object, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn normalise_entry(entry: &Value) -> Option<ProviderToken> {
    let object = entry.as_object()?;
    let mint = string_field(object, MINT_KEYS)?;

    Some(ProviderToken {
        mint,
        name: string_field(object, NAME_KEYS),
        symbol: string_field(object, SYMBOL_KEYS),
        description: string_field(object, DESCRIPTION_KEYS),
        uri: string_field(object, URI_KEYS),
        creator: string_field(object, CREATOR_KEYS),
        bonding_curve: string_field(object, CURVE_KEYS),
        created_at: field(object, CREATED_KEYS).and_then(parse_timestamp),
        market_cap_usd: number_field(object, MARKET_CAP_KEYS),
        supply: number_field(object, SUPPLY_KEYS),
        holder_count: number_field(object, HOLDER_KEYS).map(|n| n as u32),
        reply_count: number_field(object, REPLY_KEYS).map(|n| n as u32),
        is_complete: field(object, COMPLETE_KEYS).and_then(Value::as_bool),
        socials: Socials {
            website: string_field(object, &["website"]),
            twitter: string_field(object, &["twitter", "x"]),
            telegram: string_field(object, &["telegram"]),
        },
    })
}

pub struct GenericProvider {
    name: String,
    url: String,
    priority: u8,
    timeout: Duration,
    api_key: Option<String>,
    client: Client,
}

impl GenericProvider {
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

    /// Normalise a listing document; entries without a mint are skipped
    pub fn normalise(&self, document: &Value) -> Result<Vec<ProviderToken>> {
        let entries = match document {
            Value::Array(entries) => entries,
            Value::Object(object) => LIST_KEYS
                .iter()
                .find_map(|k| object.get(*k).and_then(Value::as_array))
                .ok_or_else(|| Error::ProviderPayload {
                    provider: self.name.clone(),
                    reason: "no token list in response".to_string(),
                })?,
            _ => {
                return Err(Error::ProviderPayload {
                    provider: self.name.clone(),
                    reason: "response is neither a list nor an object".to_string(),
                })
            }
        };
        Ok(entries.iter().filter_map(normalise_entry).collect())
    }
}

#[async_trait]
impl MarketDataProvider for GenericProvider {
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
        let document: Value =
            get_json(&self.client, &self.name, &self.url, self.api_key.as_deref()).await?;
        self.normalise(&document)
    }
}
