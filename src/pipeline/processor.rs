//! Per-candidate processing shared by the worker pool and the aggregator
//!
//! Both paths end the same way: freshness filter, merge into the store,
//! score against session history, notify listeners.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::listener::Listeners;
use super::store::TokenStore;
use crate::dedup::Deduplicator;
use crate::endpoint::EndpointPool;
use crate::error::ErrorClass;
use crate::extractor::TransactionExtractor;
use crate::health::{PipelineMetrics, ProcessOutcome};
use crate::rpc::ChainRpc;
use crate::scoring::{ScoringEngine, SessionHistory};
use crate::source::CandidateReference;
use crate::token::{Classification, TokenRecord};

pub struct Processor {
    pub(crate) extractor: TransactionExtractor,
    pub(crate) scoring: ScoringEngine,
    pub(crate) history: SessionHistory,
    pub(crate) store: Arc<TokenStore>,
    pub(crate) listeners: Arc<Listeners>,
    pub(crate) metrics: Arc<PipelineMetrics>,
    pub(crate) freshness: chrono::Duration,
}

impl Processor {
    /// Extract one candidate and feed the result through [`accept`](Self::accept)
    pub async fn process_candidate(
        &self,
        rpc: &Arc<dyn ChainRpc>,
        pool: &EndpointPool,
        dedup: &Deduplicator,
        candidate: CandidateReference,
    ) {
        let started = Instant::now();
        let outcome = match self.extractor.fetch_and_extract(rpc, pool, &candidate).await {
            Ok(Some(record)) => {
                self.accept(record);
                ProcessOutcome::Extracted
            }
            Ok(None) => ProcessOutcome::Skipped,
            Err(e) => {
                match e.class() {
                    ErrorClass::Structural => {
                        debug!(signature = %candidate.signature, error = %e, "Candidate dropped")
                    }
                    _ => warn!(signature = %candidate.signature, error = %e, "Extraction failed"),
                }
                ProcessOutcome::Failed(e.class())
            }
        };
        self.metrics.record_processed(started.elapsed(), outcome);
        dedup.complete(&candidate.signature);
    }

    /// Filter, merge, score and publish a record.
    ///
    /// Returns the stored record, or `None` when it was too old.
    pub fn accept(&self, record: TokenRecord) -> Option<TokenRecord> {
        if !record.is_fresh(Utc::now(), self.freshness) {
            self.metrics.record_stale();
            debug!(mint = %record.mint, created_at = %record.created_at, "Stale token ignored");
            return None;
        }

        let upserted = self.store.upsert(record, |merged| {
            let context = self.history.context_for(merged);
            self.scoring.apply(merged, &context);
        });
        let record = upserted.record;
        self.history.record(&record);

        if upserted.is_new {
            self.metrics.record_classification(record.classification);
            if record.classification == Classification::Recommended {
                info!(
                    mint = %record.mint,
                    symbol = %record.symbol,
                    score = record.opportunity_score,
                    risk = %record.risk_tier,
                    synthetic = record.synthetic,
                    "Recommended token"
                );
            }
        }

        self.listeners.notify(&record);
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgramConfig;
    use crate::scoring::ScoringConfig;

    fn processor(freshness_secs: i64) -> Processor {
        let scoring = ScoringConfig::default();
        Processor {
            extractor: TransactionExtractor::new(&ProgramConfig::default()),
            history: SessionHistory::new(scoring.recent_window, scoring.creator_success_market_cap_usd)
                .with_creator_window(scoring.creator_window),
            scoring: ScoringEngine::new(scoring),
            store: Arc::new(TokenStore::new(100)),
            listeners: Arc::new(Listeners::default()),
            metrics: Arc::new(PipelineMetrics::new()),
            freshness: chrono::Duration::seconds(freshness_secs),
        }
    }

    #[test]
    fn test_stale_tokens_never_stored() {
        let processor = processor(60);
        let old = TokenRecord::new("OldMint", Utc::now() - chrono::Duration::minutes(5));

        assert!(processor.accept(old).is_none());
        assert!(processor.store.is_empty());
        assert_eq!(processor.metrics.snapshot().stale, 1);
    }

    #[test]
    fn test_accepted_tokens_are_scored() {
        let processor = processor(3600);
        let mut record = TokenRecord::new("FreshMint", Utc::now());
        record.name = "MoonCoin".into();
        record.symbol = "MOON".into();
        record.metadata_verified = true;
        record.initial_liquidity_sol = Some(60.0);

        let stored = processor.accept(record).unwrap();
        assert!(stored.opportunity_score > 0.0);
        assert_eq!(
            processor.store.get("FreshMint").unwrap().opportunity_score,
            stored.opportunity_score
        );
    }
}
