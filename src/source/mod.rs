//! Event sources
//!
//! Three independent strategies discover creation transactions and push
//! [`CandidateReference`]s onto one bounded channel:
//! - `subscription`: `logsSubscribe` on the program, filtered by log markers
//! - `polling`: latest signatures for the program on an interval
//! - `block_scan`: every new slot's block, filtered by program account
//!
//! Each source runs under [`run_source`], which reconnects with
//! exponential backoff and disables the source after too many
//! consecutive failures instead of taking the pipeline down.

pub mod block_scan;
pub mod polling;
pub mod subscription;

pub use block_scan::BlockScanSource;
pub use polling::PollingSource;
pub use subscription::SubscriptionSource;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SourcesConfig;
use crate::dedup::Deduplicator;
use crate::endpoint::{Endpoint, EndpointPool};
use crate::error::{Error, Result};
use crate::rpc::ChainRpc;
use crate::token::{SOURCE_BLOCK_SCAN, SOURCE_POLLING, SOURCE_SUBSCRIPTION};

/// Discovery channel of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Subscription,
    Polling,
    BlockScan,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Subscription => "subscription",
            SourceKind::Polling => "polling",
            SourceKind::BlockScan => "block_scan",
        }
    }

    /// Provenance tag recorded on extracted tokens
    pub fn source_tag(&self) -> &'static str {
        match self {
            SourceKind::Subscription => SOURCE_SUBSCRIPTION,
            SourceKind::Polling => SOURCE_POLLING,
            SourceKind::BlockScan => SOURCE_BLOCK_SCAN,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transaction worth extracting
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateReference {
    pub signature: String,
    pub discovered_at: DateTime<Utc>,
    pub channel: SourceKind,
    /// Url of the endpoint that reported it
    pub endpoint: String,
}

/// Live counters of one source, shared with the health monitor
pub struct SourceStatus {
    kind: SourceKind,
    emitted: AtomicU64,
    errors: AtomicU64,
    consecutive_failures: AtomicU32,
    running: AtomicBool,
    disabled: AtomicBool,
    /// A call succeeded since the last reset
    progressed: AtomicBool,
    last_emit: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

/// Serializable view of a [`SourceStatus`]
#[derive(Debug, Clone, Serialize)]
pub struct SourceSnapshot {
    pub kind: SourceKind,
    pub emitted: u64,
    pub errors: u64,
    pub consecutive_failures: u32,
    pub running: bool,
    pub disabled: bool,
    pub last_emit: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SourceStatus {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            emitted: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            running: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            progressed: AtomicBool::new(false),
            last_emit: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// A call of this source succeeded
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.progressed.store(true, Ordering::Relaxed);
    }

    fn record_failure(&self, error: &Error) -> u32 {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.to_string());
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_emit(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        *self.last_emit.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// True once a call succeeded after the last [`reset`](Self::reset)
    pub fn has_progressed(&self) -> bool {
        self.progressed.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_started(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    /// The task driving this source died without going through `run_source`'s exit
    pub(crate) fn mark_stopped(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Clear the disabled flag before a restart
    pub fn reset(&self) {
        self.disabled.store(false, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.progressed.store(false, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            kind: self.kind,
            emitted: self.emitted.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures(),
            running: self.is_running(),
            disabled: self.is_disabled(),
            last_emit: *self.last_emit.lock().unwrap_or_else(|e| e.into_inner()),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

/// Everything a source needs to run one session
#[derive(Clone)]
pub struct SourceContext {
    pub rpc: Arc<dyn ChainRpc>,
    pub pool: Arc<EndpointPool>,
    pub dedup: Arc<Deduplicator>,
    pub tx: mpsc::Sender<CandidateReference>,
    pub program_id: String,
    pub markers: Vec<String>,
    pub status: Arc<SourceStatus>,
    pub cancel: CancellationToken,
}

impl SourceContext {
    /// Send a candidate downstream, waiting while the channel is full
    pub async fn emit(&self, signature: String, endpoint: &Endpoint) -> Result<()> {
        let candidate = CandidateReference {
            signature,
            discovered_at: Utc::now(),
            channel: self.status.kind(),
            endpoint: endpoint.display_url(),
        };
        self.tx
            .send(candidate)
            .await
            .map_err(|_| Error::ChannelClosed("candidates".to_string()))?;
        self.status.record_emit();
        Ok(())
    }
}

/// One discovery strategy
#[async_trait]
pub trait EventSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Run until the connection fails or the context is cancelled.
    ///
    /// Returns `Ok(())` only on cancellation.
    async fn run_session(&self, ctx: &SourceContext) -> Result<()>;
}

/// How a source task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceExit {
    Cancelled,
    Disabled { failures: u32 },
    ChannelClosed,
}

/// Drive a source with reconnect backoff until cancelled or disabled
pub async fn run_source(
    source: Arc<dyn EventSource>,
    ctx: SourceContext,
    config: SourcesConfig,
) -> SourceExit {
    let kind = source.kind();
    let mut backoff = ExponentialBackoff {
        initial_interval: Duration::from_millis(config.backoff_initial_ms),
        max_interval: Duration::from_millis(config.backoff_max_ms),
        max_elapsed_time: None,
        ..Default::default()
    };

    ctx.status.mark_started();
    info!(source = %kind, "Event source started");

    let exit = loop {
        if ctx.cancel.is_cancelled() {
            break SourceExit::Cancelled;
        }

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => break SourceExit::Cancelled,
            result = source.run_session(&ctx) => result,
        };

        let e = match result {
            Ok(()) => break SourceExit::Cancelled,
            Err(Error::ChannelClosed(_)) => break SourceExit::ChannelClosed,
            Err(e) => e,
        };

        // A session that made progress starts a fresh backoff sequence
        if ctx.status.consecutive_failures() == 0 {
            backoff.reset();
        }
        let failures = ctx.status.record_failure(&e);

        if failures >= config.disable_after_failures {
            ctx.status.disabled.store(true, Ordering::Relaxed);
            error!(
                source = %kind,
                failures,
                error = %e,
                "Event source disabled after consecutive failures"
            );
            break SourceExit::Disabled { failures };
        }

        let delay = backoff
            .next_backoff()
            .unwrap_or_else(|| Duration::from_millis(config.backoff_max_ms));
        warn!(
            source = %kind,
            failures,
            error = %e,
            retry_in_ms = delay.as_millis() as u64,
            "Event source session failed"
        );

        tokio::select! {
            _ = ctx.cancel.cancelled() => break SourceExit::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    };

    ctx.status.mark_stopped();
    debug!(source = %kind, exit = ?exit, "Event source stopped");
    exit
}
