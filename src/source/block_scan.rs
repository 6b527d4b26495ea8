//! Block-by-block scanning source
//!
//! Follows slot notifications and fetches each block with account-level
//! detail. Blocks trail the notified slot by a couple of slots so they
//! are available at the configured commitment.

use async_trait::async_trait;
use futures::StreamExt;
use std::time::Instant;
use tracing::{debug, warn};

use super::{EventSource, SourceContext, SourceKind};
use crate::config::BlockScanSourceConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};

/// Slots between a notification and the block we fetch for it
const CONFIRMATION_LAG: u64 = 2;

pub struct BlockScanSource {
    max_slot_lag: u64,
}

impl BlockScanSource {
    pub fn new(config: &BlockScanSourceConfig) -> Self {
        Self {
            max_slot_lag: config.max_slot_lag.max(1),
        }
    }

    /// Slots to scan after `last` when the tip reaches `target`
    fn slots_to_scan(&self, last: Option<u64>, target: u64) -> std::ops::RangeInclusive<u64> {
        match last {
            Some(last) if target <= last => 1..=0,
            Some(last) if target - last <= self.max_slot_lag => last + 1..=target,
            // First slot, or too far behind: jump to the tip
            _ => target..=target,
        }
    }

    async fn scan_slot(&self, ctx: &SourceContext, slot: u64) -> Result<()> {
        let (block, endpoint) = ctx
            .pool
            .execute(|endpoint: Endpoint| {
                let rpc = ctx.rpc.clone();
                async move {
                    let block = rpc.get_block(&endpoint, slot).await?;
                    Ok((block, endpoint))
                }
            })
            .await?;
        ctx.status.record_success();

        let Some(block) = block else {
            return Ok(());
        };

        for tx in block.transactions {
            if tx.failed || !tx.account_keys.iter().any(|k| *k == ctx.program_id) {
                continue;
            }
            ctx.emit(tx.signature, &endpoint).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventSource for BlockScanSource {
    fn kind(&self) -> SourceKind {
        SourceKind::BlockScan
    }

    async fn run_session(&self, ctx: &SourceContext) -> Result<()> {
        let (mut slots, endpoint) = ctx
            .pool
            .execute(|endpoint| {
                let rpc = ctx.rpc.clone();
                async move {
                    let stream = rpc.subscribe_slots(&endpoint).await?;
                    Ok((stream, endpoint))
                }
            })
            .await?;
        ctx.status.record_success();

        let connected_at = Instant::now();
        let mut last_scanned: Option<u64> = None;

        loop {
            let notified = tokio::select! {
                _ = ctx.cancel.cancelled() => return Ok(()),
                item = slots.next() => item,
            };
            let slot = match notified {
                Some(Ok(slot)) => slot,
                Some(Err(e)) => {
                    ctx.pool.report(&endpoint, connected_at.elapsed(), false);
                    return Err(e);
                }
                None => {
                    ctx.pool.report(&endpoint, connected_at.elapsed(), false);
                    return Err(Error::SubscriptionClosed(endpoint.display_url()));
                }
            };

            let target = slot.saturating_sub(CONFIRMATION_LAG);
            let range = self.slots_to_scan(last_scanned, target);
            if let Some(last) = last_scanned {
                if target > last + self.max_slot_lag {
                    warn!(behind = target - last, "Block scan fell behind, skipping ahead");
                }
            }

            for scan in range {
                if ctx.cancel.is_cancelled() {
                    return Ok(());
                }
                self.scan_slot(ctx, scan).await?;
                last_scanned = Some(scan);
            }
            debug!(slot = target, "Block scanned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::PUMP_PROGRAM_ID_STR;
    use crate::rpc::mock::MockRpc;
    use crate::rpc::{BlockSummary, BlockTransaction};
    use crate::source::tests::test_context;
    use std::sync::Arc;

    fn tx(signature: &str, keys: &[&str], failed: bool) -> BlockTransaction {
        BlockTransaction {
            signature: signature.to_string(),
            account_keys: keys.iter().map(|k| k.to_string()).collect(),
            failed,
        }
    }

    #[test]
    fn test_slots_to_scan() {
        let source = BlockScanSource::new(&BlockScanSourceConfig {
            enabled: true,
            max_slot_lag: 10,
        });
        assert_eq!(source.slots_to_scan(None, 100).collect::<Vec<_>>(), vec![100]);
        assert_eq!(
            source.slots_to_scan(Some(100), 103).collect::<Vec<_>>(),
            vec![101, 102, 103]
        );
        assert_eq!(source.slots_to_scan(Some(100), 100).count(), 0);
        assert_eq!(source.slots_to_scan(Some(100), 500).collect::<Vec<_>>(), vec![500]);
    }

    #[tokio::test]
    async fn test_emits_program_transactions_only() {
        let rpc = Arc::new(MockRpc::new());
        rpc.slots.lock().unwrap().push(12);
        rpc.blocks.lock().unwrap().insert(
            10,
            BlockSummary {
                slot: 10,
                block_time: None,
                transactions: vec![
                    tx("pump_ok", &["payer", PUMP_PROGRAM_ID_STR], false),
                    tx("pump_failed", &["payer", PUMP_PROGRAM_ID_STR], true),
                    tx("unrelated", &["payer", "Other111"], false),
                ],
            },
        );

        let (ctx, mut rx) = test_context(rpc, SourceKind::BlockScan);
        let session_ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            BlockScanSource::new(&BlockScanSourceConfig::default())
                .run_session(&session_ctx)
                .await
        });

        let candidate = rx.recv().await.unwrap();
        assert_eq!(candidate.signature, "pump_ok");
        assert_eq!(candidate.channel, SourceKind::BlockScan);

        ctx.cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
