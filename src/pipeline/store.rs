//! Bounded store of classified tokens, one record per mint

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::token::TokenRecord;

/// Result of inserting or merging a record
#[derive(Debug, Clone)]
pub struct Upserted {
    pub record: TokenRecord,
    /// First record for this mint
    pub is_new: bool,
}

pub struct TokenStore {
    tokens: DashMap<String, TokenRecord>,
    max_retained: usize,
    evicted: AtomicU64,
}

impl TokenStore {
    pub fn new(max_retained: usize) -> Self {
        Self {
            tokens: DashMap::new(),
            max_retained: max_retained.max(1),
            evicted: AtomicU64::new(0),
        }
    }

    /// Insert or merge `record`, then let `rescore` update the result.
    ///
    /// Merge and rescore happen under the mint's entry lock, so two
    /// reports of the same mint never interleave.
    pub fn upsert<F>(&self, record: TokenRecord, rescore: F) -> Upserted
    where
        F: FnOnce(&mut TokenRecord),
    {
        let upserted = match self.tokens.entry(record.mint.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if let Err(e) = existing.merge(&record) {
                    warn!(mint = %record.mint, error = %e, "Merge rejected");
                }
                rescore(existing);
                Upserted {
                    record: existing.clone(),
                    is_new: false,
                }
            }
            Entry::Vacant(entry) => {
                let mut record = record;
                rescore(&mut record);
                Upserted {
                    record: entry.insert(record).clone(),
                    is_new: true,
                }
            }
        };

        self.evict_overflow();
        upserted
    }

    /// Drop lowest-scored records (oldest discovery first) above capacity
    fn evict_overflow(&self) {
        while self.tokens.len() > self.max_retained {
            let victim = self
                .tokens
                .iter()
                .min_by(|a, b| eviction_order(a.value(), b.value()))
                .map(|entry| entry.key().clone());
            let Some(mint) = victim else {
                break;
            };
            if self.tokens.remove(&mint).is_some() {
                self.evicted.fetch_add(1, Ordering::Relaxed);
                debug!(mint = %mint, "Evicted token from store");
            }
        }
    }

    pub fn get(&self, mint: &str) -> Option<TokenRecord> {
        self.tokens.get(mint).map(|r| r.clone())
    }

    /// Snapshot ranked by opportunity score, newest first on ties
    pub fn ranked(&self) -> Vec<TokenRecord> {
        let mut tokens: Vec<TokenRecord> = self.tokens.iter().map(|r| r.clone()).collect();
        tokens.sort_by(|a, b| {
            b.opportunity_score
                .total_cmp(&a.opportunity_score)
                .then_with(|| b.discovered_at.cmp(&a.discovered_at))
        });
        tokens
    }

    /// Remove every synthetic record, returning how many went
    pub fn purge_synthetic(&self) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, r| !r.synthetic);
        before - self.tokens.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.tokens.clear();
    }
}

fn eviction_order(a: &TokenRecord, b: &TokenRecord) -> CmpOrdering {
    a.opportunity_score
        .total_cmp(&b.opportunity_score)
        .then_with(|| a.discovered_at.cmp(&b.discovered_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(mint: &str, score: f64, discovered_secs_ago: i64) -> TokenRecord {
        let mut record = TokenRecord::new(mint, Utc::now());
        record.discovered_at = Utc::now() - Duration::seconds(discovered_secs_ago);
        record.opportunity_score = score;
        record
    }

    #[test]
    fn test_eviction_drops_lowest_then_oldest() {
        let store = TokenStore::new(2);
        store.upsert(record("a", 50.0, 10), |_| {});
        store.upsert(record("b", 50.0, 5), |_| {});
        store.upsert(record("c", 80.0, 1), |_| {});

        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
        assert_eq!(store.evicted(), 1);

        store.upsert(record("d", 10.0, 0), |_| {});
        assert!(store.get("d").is_none());
    }

    #[test]
    fn test_upsert_merges_and_rescores() {
        let store = TokenStore::new(10);
        let first = store.upsert(record("a", 0.0, 0), |r| r.opportunity_score = 40.0);
        assert!(first.is_new);

        let mut update = record("a", 0.0, 0);
        update.reply_count = Some(9);
        let second = store.upsert(update, |r| r.opportunity_score = 70.0);

        assert!(!second.is_new);
        assert_eq!(second.record.reply_count, Some(9));
        assert_eq!(store.get("a").unwrap().opportunity_score, 70.0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_chain_record_enriched_by_provider_keeps_quality() {
        let store = TokenStore::new(10);
        let mut chain = record("a", 0.0, 0);
        chain.signature = Some("sig1".into());
        store.upsert(chain, |_| {});

        let mut provider = record("a", 0.0, 0);
        provider.data_quality = 82.5;
        provider.data_sources.insert("pumpfun".into());
        let merged = store.upsert(provider, |_| {});

        assert_eq!(merged.record.data_quality, 82.5);
        assert_eq!(store.get("a").unwrap().data_quality, 82.5);
        assert_eq!(store.get("a").unwrap().signature.as_deref(), Some("sig1"));
    }

    #[test]
    fn test_ranked_order() {
        let store = TokenStore::new(10);
        store.upsert(record("low", 20.0, 0), |_| {});
        store.upsert(record("high", 90.0, 0), |_| {});
        store.upsert(record("mid", 60.0, 0), |_| {});

        let mints: Vec<String> = store.ranked().into_iter().map(|r| r.mint).collect();
        assert_eq!(mints, vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_purge_synthetic() {
        let store = TokenStore::new(10);
        let mut fake = record("fake", 50.0, 0);
        fake.synthetic = true;
        store.upsert(fake, |_| {});
        store.upsert(record("real", 50.0, 0), |_| {});

        assert_eq!(store.purge_synthetic(), 1);
        assert!(store.get("real").is_some());
        assert!(store.get("fake").is_none());
    }
}
