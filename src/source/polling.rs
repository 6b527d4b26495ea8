//! Periodic signature polling source

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::{EventSource, SourceContext, SourceKind};
use crate::config::PollingSourceConfig;
use crate::error::Result;

/// Signatures remembered between polls so a quiet program is not
/// re-emitted every interval
const RECENT_CAPACITY: usize = 512;

pub struct PollingSource {
    interval: Duration,
    limit: usize,
}

impl PollingSource {
    pub fn new(config: &PollingSourceConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms.max(1)),
            limit: config.signature_limit.max(1),
        }
    }
}

#[async_trait]
impl EventSource for PollingSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Polling
    }

    async fn run_session(&self, ctx: &SourceContext) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut recent: VecDeque<String> = VecDeque::with_capacity(RECENT_CAPACITY);

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let (signatures, endpoint) = ctx
                .pool
                .execute(|endpoint| {
                    let rpc = ctx.rpc.clone();
                    let program_id = ctx.program_id.clone();
                    let limit = self.limit;
                    async move {
                        let signatures = rpc
                            .get_recent_signatures(&endpoint, &program_id, limit)
                            .await?;
                        Ok((signatures, endpoint))
                    }
                })
                .await?;
            ctx.status.record_success();

            // Oldest first, so downstream sees creation order
            let mut fresh = 0;
            for info in signatures.into_iter().rev() {
                if info.failed
                    || recent.contains(&info.signature)
                    || ctx.dedup.seen(&info.signature)
                {
                    continue;
                }
                if recent.len() == RECENT_CAPACITY {
                    recent.pop_front();
                }
                recent.push_back(info.signature.clone());
                ctx.emit(info.signature, &endpoint).await?;
                fresh += 1;
            }

            if fresh > 0 {
                debug!(fresh, endpoint = %endpoint.display_url(), "Polled new signatures");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockRpc;
    use crate::rpc::SignatureInfo;
    use crate::source::tests::test_context;
    use std::sync::Arc;

    fn info(signature: &str, failed: bool) -> SignatureInfo {
        SignatureInfo {
            signature: signature.to_string(),
            slot: 1,
            failed,
            block_time: None,
        }
    }

    #[tokio::test]
    async fn test_polls_emit_unseen_signatures_once() {
        let rpc = Arc::new(MockRpc::new());
        *rpc.signatures.lock().unwrap() = vec![
            info("newest", false),
            info("failed", true),
            info("already_seen", false),
            info("oldest", false),
        ];

        let (ctx, mut rx) = test_context(rpc, SourceKind::Polling);
        ctx.dedup.mark("already_seen");

        let source = PollingSource::new(&PollingSourceConfig {
            enabled: true,
            interval_ms: 10,
            signature_limit: 25,
        });
        let session_ctx = ctx.clone();
        let handle = tokio::spawn(async move { source.run_session(&session_ctx).await });

        assert_eq!(rx.recv().await.unwrap().signature, "oldest");
        assert_eq!(rx.recv().await.unwrap().signature, "newest");

        // Later polls return the same list and emit nothing new
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        ctx.cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_poll_failure_ends_session() {
        let (ctx, _rx) = test_context(Arc::new(MockRpc::failing()), SourceKind::Polling);
        let source = PollingSource::new(&PollingSourceConfig::default());
        assert!(source.run_session(&ctx).await.is_err());
    }
}
