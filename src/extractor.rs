//! Transaction extractor
//!
//! Turns a [`CandidateReference`] into a [`TokenRecord`] by fetching the
//! full transaction and reading balances, account keys and logs.
//!
//! Not every candidate is a creation: polling and block scan report any
//! transaction touching the program. Those come back as `Ok(None)` and
//! are not counted as errors.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

use crate::config::ProgramConfig;
use crate::endpoint::EndpointPool;
use crate::error::{Error, Result};
use crate::program::{has_creation_marker, is_valid_address, lamports_to_sol, CreateEvent};
use crate::rpc::{ChainRpc, ParsedTransaction};
use crate::source::CandidateReference;
use crate::token::TokenRecord;

/// Endpoints tried for one transaction fetch
const FETCH_ATTEMPTS: usize = 2;

static NAME_PATTERN: OnceLock<Regex> = OnceLock::new();
static SYMBOL_PATTERN: OnceLock<Regex> = OnceLock::new();
static URI_PATTERN: OnceLock<Regex> = OnceLock::new();
static DESCRIPTION_PATTERN: OnceLock<Regex> = OnceLock::new();

fn name_pattern() -> &'static Regex {
    NAME_PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\bname["']?\s*[:=]\s*["']?([^,"'\n}]+)"#).expect("Invalid name regex")
    })
}

fn symbol_pattern() -> &'static Regex {
    SYMBOL_PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\bsymbol["']?\s*[:=]\s*["']?([^,"'\n}]+)"#).expect("Invalid symbol regex")
    })
}

fn uri_pattern() -> &'static Regex {
    URI_PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\buri["']?\s*[:=]\s*["']?([^\s,"'}]+)"#).expect("Invalid uri regex")
    })
}

fn description_pattern() -> &'static Regex {
    DESCRIPTION_PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\bdescription["']?\s*[:=]\s*["']?([^"'\n}]+)"#)
            .expect("Invalid description regex")
    })
}

/// Metadata found in a transaction's logs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub uri: Option<String>,
    pub description: Option<String>,
    pub bonding_curve: Option<String>,
}

impl LogMetadata {
    /// Decode the program's CreateEvent, falling back to plain-text log lines
    pub fn from_logs(logs: &[String]) -> Self {
        if let Some(event) = CreateEvent::from_logs(logs) {
            return Self {
                name: non_empty(&event.name),
                symbol: non_empty(&event.symbol),
                uri: non_empty(&event.uri),
                description: None,
                bonding_curve: Some(event.bonding_curve),
            };
        }

        let mut metadata = Self::default();
        for line in logs.iter().filter(|l| l.starts_with("Program log:")) {
            let capture = |re: &Regex| {
                re.captures(line)
                    .and_then(|c| c.get(1))
                    .and_then(|m| non_empty(m.as_str()))
            };
            metadata.name = metadata.name.or_else(|| capture(name_pattern()));
            metadata.symbol = metadata.symbol.or_else(|| capture(symbol_pattern()));
            metadata.uri = metadata.uri.or_else(|| capture(uri_pattern()));
            metadata.description = metadata
                .description
                .or_else(|| capture(description_pattern()));
        }
        metadata
    }

    fn is_complete(&self) -> bool {
        self.name.is_some() && self.symbol.is_some()
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim().trim_matches(char::from(0));
    (!s.is_empty()).then(|| s.to_string())
}

pub struct TransactionExtractor {
    markers: Vec<String>,
}

impl TransactionExtractor {
    pub fn new(config: &ProgramConfig) -> Self {
        Self {
            markers: config.creation_markers.clone(),
        }
    }

    /// Fetch the candidate's transaction through the pool and extract it.
    ///
    /// `Ok(None)` means the transaction is not a token creation.
    pub async fn fetch_and_extract(
        &self,
        rpc: &Arc<dyn ChainRpc>,
        pool: &EndpointPool,
        candidate: &CandidateReference,
    ) -> Result<Option<TokenRecord>> {
        let tx = pool
            .execute_with_failover(FETCH_ATTEMPTS, |endpoint| {
                let rpc = rpc.clone();
                let signature = candidate.signature.clone();
                async move { rpc.get_transaction(&endpoint, &signature).await }
            })
            .await?;
        self.extract(&tx, candidate)
    }

    /// Extract a token record from a fetched transaction
    pub fn extract(
        &self,
        tx: &ParsedTransaction,
        candidate: &CandidateReference,
    ) -> Result<Option<TokenRecord>> {
        if tx.failed {
            trace!(signature = %tx.signature, "Skipping failed transaction");
            return Ok(None);
        }
        if !has_creation_marker(&tx.log_messages, &self.markers) {
            trace!(signature = %tx.signature, "Not a creation transaction");
            return Ok(None);
        }

        // 1. New mint: present after, absent before
        let pre_mints: HashSet<&str> = tx
            .pre_token_balances
            .iter()
            .map(|b| b.mint.as_str())
            .collect();
        let mint = tx
            .post_token_balances
            .iter()
            .map(|b| b.mint.as_str())
            .find(|m| !pre_mints.contains(m))
            .ok_or_else(|| Error::MissingMint(tx.signature.clone()))?;
        if !is_valid_address(mint) {
            return Err(Error::MalformedTransaction {
                signature: tx.signature.clone(),
                reason: format!("invalid mint {}", mint),
            });
        }

        // 2. Creator = fee payer
        let creator = tx
            .account_keys
            .first()
            .cloned()
            .ok_or_else(|| Error::MalformedTransaction {
                signature: tx.signature.clone(),
                reason: "no account keys".to_string(),
            })?;

        // 3. Initial liquidity = what the fee payer spent
        let liquidity = match (tx.pre_balances.first(), tx.post_balances.first()) {
            (Some(pre), Some(post)) => Some(lamports_to_sol(pre.abs_diff(*post))),
            _ => None,
        };

        // 4. Bonding curve = owner of the largest non-creator holding
        let holder_curve = tx
            .post_token_balances
            .iter()
            .filter(|b| b.mint == mint)
            .filter(|b| b.owner.as_deref().is_some_and(|o| o != creator))
            .max_by(|a, b| a.amount.total_cmp(&b.amount))
            .and_then(|b| b.owner.clone());

        // 5. Metadata from logs, placeholders otherwise
        let metadata = LogMetadata::from_logs(&tx.log_messages);

        let created_at = block_time(tx).unwrap_or(candidate.discovered_at);

        let mut record = TokenRecord::new(mint, created_at);
        record.discovered_at = candidate.discovered_at;
        record.signature = Some(tx.signature.clone());
        record.creator = Some(creator);
        record.initial_liquidity_sol = liquidity;
        record.bonding_curve = holder_curve.or(metadata.bonding_curve.clone());
        record.is_live = true;
        record.data_sources.insert(candidate.channel.source_tag().to_string());

        if metadata.is_complete() {
            record.name = metadata.name.clone().unwrap_or_default();
            record.symbol = metadata.symbol.clone().unwrap_or_default();
            record.metadata_verified = true;
        }
        record.uri = metadata.uri;
        record.description = metadata.description.unwrap_or_default();

        debug!(
            mint = %record.mint,
            symbol = %record.symbol,
            verified = record.metadata_verified,
            liquidity_sol = ?record.initial_liquidity_sol,
            source = %candidate.channel,
            "Token extracted"
        );
        Ok(Some(record))
    }
}

/// Creation time of a transaction, if the node reported one
pub fn block_time(tx: &ParsedTransaction) -> Option<DateTime<Utc>> {
    tx.block_time.and_then(|t| Utc.timestamp_opt(t, 0).single())
}
