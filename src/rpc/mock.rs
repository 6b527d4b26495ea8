//! In-memory `ChainRpc` for tests

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{BlockSummary, ChainRpc, LogBatch, ParsedTransaction, SignatureInfo, TokenBalance};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};

pub const PUMP_LOG: &str = "Program log: Instruction: Create";

#[derive(Default)]
pub struct MockRpc {
    pub transactions: Mutex<HashMap<String, ParsedTransaction>>,
    pub signatures: Mutex<Vec<SignatureInfo>>,
    pub blocks: Mutex<HashMap<u64, BlockSummary>>,
    pub log_batches: Mutex<Vec<LogBatch>>,
    pub slots: Mutex<Vec<u64>>,
    /// Every call fails with a connection error
    pub fail_all: AtomicBool,
    pub get_transaction_calls: AtomicUsize,
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let mock = Self::default();
        mock.fail_all.store(true, Ordering::SeqCst);
        mock
    }

    pub fn add_transaction(&self, tx: ParsedTransaction) {
        self.transactions
            .lock()
            .unwrap()
            .insert(tx.signature.clone(), tx);
    }

    pub fn push_log(&self, signature: &str, logs: &[&str]) {
        self.log_batches.lock().unwrap().push(LogBatch {
            signature: signature.to_string(),
            slot: 1,
            logs: logs.iter().map(|l| l.to_string()).collect(),
            failed: false,
        });
    }

    fn check(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            Err(Error::RpcConnection("mock endpoint down".into()))
        } else {
            Ok(())
        }
    }
}

/// A pump.fun creation transaction with the given metadata in its logs
pub fn creation_transaction(
    signature: &str,
    mint: &str,
    creator: &str,
    spent_lamports: u64,
    metadata: Option<(&str, &str)>,
) -> ParsedTransaction {
    let bonding_curve = format!("Curve{}", &mint[..mint.len().min(8)]);
    let mut logs = vec![
        "Program 6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P invoke [1]".to_string(),
        PUMP_LOG.to_string(),
    ];
    if let Some((name, symbol)) = metadata {
        logs.push(format!(
            "Program log: name: {}, symbol: {}, uri: https://ipfs.io/ipfs/{}",
            name, symbol, symbol
        ));
    }

    ParsedTransaction {
        signature: signature.to_string(),
        slot: 42,
        block_time: Some(chrono::Utc::now().timestamp()),
        account_keys: vec![
            creator.to_string(),
            mint.to_string(),
            bonding_curve.clone(),
            "CreatorAta".to_string(),
            "CurveAta".to_string(),
        ],
        pre_balances: vec![100_000_000_000, 0, 0, 0, 0],
        post_balances: vec![100_000_000_000 - spent_lamports, 1_461_600, 1_231_920, 2_039_280, 2_039_280],
        pre_token_balances: vec![],
        post_token_balances: vec![
            TokenBalance {
                account_index: 3,
                mint: mint.to_string(),
                owner: Some(creator.to_string()),
                amount: 35_000_000.0,
            },
            TokenBalance {
                account_index: 4,
                mint: mint.to_string(),
                owner: Some(bonding_curve),
                amount: 965_000_000.0,
            },
        ],
        log_messages: logs,
        failed: false,
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn subscribe_logs(
        &self,
        _endpoint: &Endpoint,
        _program_id: &str,
    ) -> Result<BoxStream<'static, Result<LogBatch>>> {
        self.check()?;
        let batches: Vec<Result<LogBatch>> =
            self.log_batches.lock().unwrap().drain(..).map(Ok).collect();
        Ok(stream::iter(batches).chain(stream::pending()).boxed())
    }

    async fn subscribe_slots(&self, _endpoint: &Endpoint) -> Result<BoxStream<'static, Result<u64>>> {
        self.check()?;
        let slots: Vec<Result<u64>> = self.slots.lock().unwrap().drain(..).map(Ok).collect();
        Ok(stream::iter(slots).chain(stream::pending()).boxed())
    }

    async fn get_transaction(
        &self,
        _endpoint: &Endpoint,
        signature: &str,
    ) -> Result<ParsedTransaction> {
        self.get_transaction_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.transactions
            .lock()
            .unwrap()
            .get(signature)
            .cloned()
            .ok_or_else(|| Error::TransactionNotFound(signature.to_string()))
    }

    async fn get_recent_signatures(
        &self,
        _endpoint: &Endpoint,
        _program_id: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        self.check()?;
        Ok(self
            .signatures
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_block(&self, _endpoint: &Endpoint, slot: u64) -> Result<Option<BlockSummary>> {
        self.check()?;
        Ok(self.blocks.lock().unwrap().get(&slot).cloned())
    }

    async fn get_slot(&self, _endpoint: &Endpoint) -> Result<u64> {
        self.check()?;
        Ok(42)
    }
}
