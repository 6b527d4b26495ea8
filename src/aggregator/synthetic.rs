//! Degraded-mode placeholder records
//!
//! Produced only when every provider failed in a cycle. Each record is
//! flagged `synthetic`, tagged with the `synthetic` source and carries no
//! verified metadata, so nothing downstream can mistake it for market data.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::token::{MarketObservation, TokenRecord, SOURCE_SYNTHETIC};

/// Deterministic, address-shaped mint for a synthetic record
fn synthetic_mint(seed: &str) -> String {
    let digest = Sha256::digest(format!("synthetic:{}", seed).as_bytes());
    bs58::encode(digest).into_string()
}

/// Build `count` synthetic records stamped at `now`
pub fn synthetic_records(count: usize, now: DateTime<Utc>) -> Vec<TokenRecord> {
    let mut rng = rand::thread_rng();
    let stamp = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp());

    (0..count)
        .map(|i| {
            let mint = synthetic_mint(&format!("{}:{}", stamp, i));
            let age_secs = rng.gen_range(30..900);
            let mut record = TokenRecord::new(mint, now - chrono::Duration::seconds(age_secs));
            record.discovered_at = now;
            record.description = "Synthetic placeholder while providers are unavailable".into();
            record.synthetic = true;
            record.observe(
                SOURCE_SYNTHETIC,
                MarketObservation {
                    market_cap_usd: Some(rng.gen_range(4_000.0..40_000.0)),
                    supply: Some(1_000_000_000.0),
                    holder_count: Some(rng.gen_range(1..50)),
                    observed_at: now,
                },
            );
            record
        })
        .collect()
}
