//! Long-lived `logsSubscribe` source

use async_trait::async_trait;
use futures::StreamExt;
use std::time::Instant;
use tracing::{debug, info};

use super::{EventSource, SourceContext, SourceKind};
use crate::error::{Error, Result};
use crate::program::has_creation_marker;

/// Emits signatures whose log batch carries a creation marker
#[derive(Debug, Default)]
pub struct SubscriptionSource;

impl SubscriptionSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSource for SubscriptionSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Subscription
    }

    async fn run_session(&self, ctx: &SourceContext) -> Result<()> {
        let (mut stream, endpoint) = ctx
            .pool
            .execute(|endpoint| {
                let rpc = ctx.rpc.clone();
                let program_id = ctx.program_id.clone();
                async move {
                    let stream = rpc.subscribe_logs(&endpoint, &program_id).await?;
                    Ok((stream, endpoint))
                }
            })
            .await?;
        ctx.status.record_success();
        info!(endpoint = %endpoint.display_url(), "Listening for creation logs");

        let connected_at = Instant::now();
        loop {
            let batch = tokio::select! {
                _ = ctx.cancel.cancelled() => return Ok(()),
                item = stream.next() => item,
            };

            let batch = match batch {
                Some(Ok(batch)) => batch,
                Some(Err(e)) => {
                    ctx.pool.report(&endpoint, connected_at.elapsed(), false);
                    return Err(e);
                }
                None => {
                    ctx.pool.report(&endpoint, connected_at.elapsed(), false);
                    return Err(Error::SubscriptionClosed(endpoint.display_url()));
                }
            };
            ctx.status.record_success();

            if batch.failed || !has_creation_marker(&batch.logs, &ctx.markers) {
                continue;
            }

            debug!(signature = %batch.signature, slot = batch.slot, "Creation log received");
            ctx.emit(batch.signature, &endpoint).await?;
        }
    }
}
