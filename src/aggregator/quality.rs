//! Data-quality score for merged provider records
//!
//! 0-100, built from three parts: how many sources agree on the mint,
//! how complete the record is, and how recent the latest observation is.

use chrono::{DateTime, Utc};

use crate::config::AggregatorConfig;
use crate::token::TokenRecord;

const SOURCE_POINTS: f64 = 30.0;
const COMPLETENESS_POINTS: f64 = 50.0;
const RECENCY_POINTS: f64 = 20.0;

#[derive(Debug, Clone)]
pub struct QualityPolicy {
    /// Source count at which the source component is full
    pub max_counted_sources: usize,
    pub recency_window: chrono::Duration,
}

impl From<&AggregatorConfig> for QualityPolicy {
    fn from(config: &AggregatorConfig) -> Self {
        Self {
            max_counted_sources: config.max_counted_sources.max(1),
            recency_window: chrono::Duration::seconds(config.recency_window_secs.max(1) as i64),
        }
    }
}

/// Fraction of the fields a complete record carries
pub fn completeness(record: &TokenRecord) -> f64 {
    let checks = [
        record.metadata_verified,
        !record.description.trim().is_empty(),
        record.uri.is_some(),
        record.creator.is_some(),
        record.bonding_curve.is_some(),
        record.market_cap_usd.is_some(),
        record.supply.is_some(),
        !record.socials.is_empty() || record.reply_count.is_some(),
    ];
    checks.iter().filter(|c| **c).count() as f64 / checks.len() as f64
}

pub fn data_quality(record: &TokenRecord, now: DateTime<Utc>, policy: &QualityPolicy) -> f64 {
    let sources = record.data_sources.len().min(policy.max_counted_sources) as f64
        / policy.max_counted_sources as f64;

    let recency = match record.last_observed() {
        Some(observed) => {
            let age = (now - observed).num_milliseconds().max(0) as f64;
            let window = policy.recency_window.num_milliseconds() as f64;
            (1.0 - age / window).clamp(0.0, 1.0)
        }
        None => 0.0,
    };

    SOURCE_POINTS * sources + COMPLETENESS_POINTS * completeness(record) + RECENCY_POINTS * recency
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::provider::mock::full_token;

    fn policy() -> QualityPolicy {
        QualityPolicy::from(&AggregatorConfig::default())
    }

    #[test]
    fn test_complete_fresh_single_source_passes_default_minimum() {
        let now = Utc::now();
        let record = full_token("Mint111", 1000.0).into_record("pumpfun", now);

        assert_eq!(completeness(&record), 1.0);
        let quality = data_quality(&record, now, &policy());
        assert!((quality - 80.0).abs() < 1e-9, "got {}", quality);
    }

    #[test]
    fn test_sparse_record_falls_below_minimum() {
        let now = Utc::now();
        let mut token = full_token("Mint111", 1000.0);
        token.description = None;
        token.uri = None;
        token.creator = None;
        let record = token.into_record("dexscreener", now);

        assert!(data_quality(&record, now, &policy()) < AggregatorConfig::default().min_data_quality);
    }

    #[test]
    fn test_more_sources_and_recency_raise_quality() {
        let now = Utc::now();
        let mut record = full_token("Mint111", 1000.0).into_record("pumpfun", now);
        let single = data_quality(&record, now, &policy());

        record
            .merge(&full_token("Mint111", 3000.0).into_record("dexscreener", now))
            .unwrap();
        assert!(data_quality(&record, now, &policy()) > single);

        let later = now + chrono::Duration::hours(2);
        assert!(data_quality(&record, later, &policy()) < single);
    }
}
