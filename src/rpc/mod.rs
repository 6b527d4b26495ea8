//! Chain access
//!
//! The pipeline talks to the chain only through [`ChainRpc`]. Every
//! method takes the endpoint to use, so the pool stays in charge of
//! selection, timeouts and health.

pub mod solana;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::endpoint::Endpoint;
use crate::error::Result;

pub use solana::SolanaRpc;

/// One `logsSubscribe` notification
#[derive(Debug, Clone, PartialEq)]
pub struct LogBatch {
    pub signature: String,
    pub slot: u64,
    pub logs: Vec<String>,
    /// The transaction failed on-chain
    pub failed: bool,
}

/// Entry of a recent-signatures listing
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    pub failed: bool,
    pub block_time: Option<i64>,
}

/// Token balance entry of a transaction's status meta
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBalance {
    pub account_index: usize,
    pub mint: String,
    pub owner: Option<String>,
    /// Balance in UI units
    pub amount: f64,
}

/// The parts of a confirmed transaction the extractor reads
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTransaction {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    /// Account keys in message order, fee payer first
    pub account_keys: Vec<String>,
    /// Lamport balances, indexed like `account_keys`
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub pre_token_balances: Vec<TokenBalance>,
    pub post_token_balances: Vec<TokenBalance>,
    pub log_messages: Vec<String>,
    pub failed: bool,
}

/// Transaction listed in a block fetched with account-level detail
#[derive(Debug, Clone, PartialEq)]
pub struct BlockTransaction {
    pub signature: String,
    pub account_keys: Vec<String>,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockSummary {
    pub slot: u64,
    pub block_time: Option<i64>,
    pub transactions: Vec<BlockTransaction>,
}

/// Outbound chain interface
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Stream of log batches for transactions mentioning `program_id`
    async fn subscribe_logs(
        &self,
        endpoint: &Endpoint,
        program_id: &str,
    ) -> Result<BoxStream<'static, Result<LogBatch>>>;

    /// Stream of newly processed slots
    async fn subscribe_slots(&self, endpoint: &Endpoint) -> Result<BoxStream<'static, Result<u64>>>;

    /// Full transaction with status meta
    async fn get_transaction(&self, endpoint: &Endpoint, signature: &str)
        -> Result<ParsedTransaction>;

    /// Most recent signatures for `program_id`, newest first
    async fn get_recent_signatures(
        &self,
        endpoint: &Endpoint,
        program_id: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>>;

    /// Block at `slot` with account-level detail; `None` for skipped slots
    async fn get_block(&self, endpoint: &Endpoint, slot: u64) -> Result<Option<BlockSummary>>;

    /// Current slot, used by the connectivity check
    async fn get_slot(&self, endpoint: &Endpoint) -> Result<u64>;
}
