//! Solana implementation of [`ChainRpc`]
//!
//! Request/response calls go through the nonblocking `RpcClient`;
//! subscriptions use a raw websocket with `logsSubscribe` /
//! `slotSubscribe` JSON-RPC messages.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use futures_util::SinkExt;
use serde::Deserialize;
use serde_json::json;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::{RpcBlockConfig, RpcTransactionConfig};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedTransaction, TransactionDetails, UiMessage, UiTransactionEncoding,
    UiTransactionTokenBalance,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};

use super::{BlockSummary, BlockTransaction, ChainRpc, LogBatch, ParsedTransaction, SignatureInfo, TokenBalance};
use crate::config::RpcConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct Notification<T> {
    params: NotificationParams<T>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct LogsResult {
    context: LogsContext,
    value: LogsValue,
}

#[derive(Debug, Deserialize)]
struct LogsContext {
    slot: u64,
}

#[derive(Debug, Deserialize)]
struct LogsValue {
    signature: String,
    #[serde(default)]
    logs: Vec<String>,
    #[serde(default)]
    err: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SlotResult {
    slot: u64,
}

/// Chain access over Solana JSON-RPC
pub struct SolanaRpc {
    clients: DashMap<usize, Arc<RpcClient>>,
    commitment: CommitmentConfig,
    commitment_label: String,
    timeout: Duration,
}

impl SolanaRpc {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let label = config.commitment.to_lowercase();
        let commitment = match label.as_str() {
            "processed" => CommitmentConfig::processed(),
            "confirmed" => CommitmentConfig::confirmed(),
            "finalized" => CommitmentConfig::finalized(),
            other => return Err(Error::Config(format!("invalid commitment: {}", other))),
        };
        Ok(Self {
            clients: DashMap::new(),
            commitment,
            commitment_label: label,
            timeout: config.timeout(),
        })
    }

    fn client(&self, endpoint: &Endpoint) -> Arc<RpcClient> {
        self.clients
            .entry(endpoint.id)
            .or_insert_with(|| {
                Arc::new(RpcClient::new_with_timeout_and_commitment(
                    endpoint.url.clone(),
                    self.timeout,
                    self.commitment,
                ))
            })
            .clone()
    }

    async fn subscribe(
        &self,
        endpoint: &Endpoint,
        request: serde_json::Value,
    ) -> Result<WsStream> {
        let (mut ws, _) = connect_async(endpoint.ws_url.as_str())
            .await
            .map_err(|e| Error::RpcConnection(format!("{}: {}", endpoint.display_url(), e)))?;
        ws.send(Message::Text(request.to_string()))
            .await
            .map_err(|e| Error::Subscription(e.to_string()))?;
        Ok(ws)
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Turn a websocket into a stream of parsed notifications.
///
/// The stream ends with an error item when the socket closes, so the
/// source sees the disconnect and reconnects through the pool.
fn notification_stream<T, F>(ws: WsStream, label: String, parse: F) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    F: Fn(&str) -> Option<Result<T>> + Send + 'static,
{
    stream::unfold(Some((ws, parse, label)), |state| async move {
        let (mut ws, parse, label) = state?;
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(item) = parse(&text) {
                        return Some((item, Some((ws, parse, label))));
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws.send(Message::Pong(data)).await {
                        return Some((Err(Error::Subscription(e.to_string())), None));
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Some((Err(Error::SubscriptionClosed(label)), None));
                }
                Some(Err(e)) => return Some((Err(Error::Subscription(e.to_string())), None)),
                Some(Ok(_)) => {}
            }
        }
    })
    .boxed()
}

/// Parse a websocket text frame from a `logsSubscribe` stream.
///
/// Subscription confirmations yield `None`; server errors yield an error.
pub fn parse_logs_message(text: &str) -> Option<Result<LogBatch>> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Some(Err(e.into())),
    };
    if let Some(err) = value.get("error") {
        return Some(Err(Error::Subscription(err.to_string())));
    }
    if value.get("method").and_then(|m| m.as_str()) != Some("logsNotification") {
        return None;
    }
    let notification: Notification<LogsResult> = match serde_json::from_value(value) {
        Ok(n) => n,
        Err(e) => return Some(Err(e.into())),
    };
    let result = notification.params.result;
    Some(Ok(LogBatch {
        signature: result.value.signature,
        slot: result.context.slot,
        logs: result.value.logs,
        failed: result.value.err.is_some_and(|e| !e.is_null()),
    }))
}

/// Parse a websocket text frame from a `slotSubscribe` stream
pub fn parse_slot_message(text: &str) -> Option<Result<u64>> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return Some(Err(e.into())),
    };
    if let Some(err) = value.get("error") {
        return Some(Err(Error::Subscription(err.to_string())));
    }
    if value.get("method").and_then(|m| m.as_str()) != Some("slotNotification") {
        return None;
    }
    match serde_json::from_value::<Notification<SlotResult>>(value) {
        Ok(n) => Some(Ok(n.params.result.slot)),
        Err(e) => Some(Err(e.into())),
    }
}

fn token_balances(balances: OptionSerializer<Vec<UiTransactionTokenBalance>>) -> Vec<TokenBalance> {
    Option::<Vec<UiTransactionTokenBalance>>::from(balances)
        .unwrap_or_default()
        .into_iter()
        .map(|b| TokenBalance {
            account_index: b.account_index as usize,
            amount: b
                .ui_token_amount
                .ui_amount
                .or_else(|| b.ui_token_amount.ui_amount_string.parse().ok())
                .unwrap_or(0.0),
            owner: Option::from(b.owner),
            mint: b.mint,
        })
        .collect()
}

fn account_keys(transaction: &EncodedTransaction) -> Option<Vec<String>> {
    match transaction {
        EncodedTransaction::Json(tx) => Some(match &tx.message {
            UiMessage::Parsed(message) => message
                .account_keys
                .iter()
                .map(|k| k.pubkey.clone())
                .collect(),
            UiMessage::Raw(message) => message.account_keys.clone(),
        }),
        EncodedTransaction::Accounts(list) => {
            Some(list.account_keys.iter().map(|k| k.pubkey.clone()).collect())
        }
        _ => None,
    }
}

/// Errors the node returns for slots without a block
fn is_skipped_slot(message: &str) -> bool {
    message.contains("was skipped")
        || message.contains("-32007")
        || message.contains("-32009")
        || message.contains("not available")
}

#[async_trait]
impl ChainRpc for SolanaRpc {
    async fn subscribe_logs(
        &self,
        endpoint: &Endpoint,
        program_id: &str,
    ) -> Result<BoxStream<'static, Result<LogBatch>>> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "logsSubscribe",
            "params": [
                { "mentions": [program_id] },
                { "commitment": self.commitment_label }
            ]
        });
        let ws = self.subscribe(endpoint, request).await?;
        info!(endpoint = %endpoint.display_url(), program = %program_id, "Logs subscription opened");
        Ok(notification_stream(
            ws,
            format!("logs@{}", endpoint.display_url()),
            parse_logs_message,
        ))
    }

    async fn subscribe_slots(&self, endpoint: &Endpoint) -> Result<BoxStream<'static, Result<u64>>> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "slotSubscribe"
        });
        let ws = self.subscribe(endpoint, request).await?;
        info!(endpoint = %endpoint.display_url(), "Slot subscription opened");
        Ok(notification_stream(
            ws,
            format!("slots@{}", endpoint.display_url()),
            parse_slot_message,
        ))
    }

    async fn get_transaction(
        &self,
        endpoint: &Endpoint,
        signature: &str,
    ) -> Result<ParsedTransaction> {
        let sig = Signature::from_str(signature).map_err(|e| Error::MalformedTransaction {
            signature: signature.to_string(),
            reason: e.to_string(),
        })?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };

        let response = match self.client(endpoint).get_transaction_with_config(&sig, config).await {
            Ok(tx) => tx,
            Err(e) => {
                let message = e.to_string();
                // The node answers `null` for unknown signatures
                if message.contains("invalid type: null") || message.contains("not found") {
                    return Err(Error::TransactionNotFound(signature.to_string()));
                }
                return Err(e.into());
            }
        };

        let malformed = |reason: &str| Error::MalformedTransaction {
            signature: signature.to_string(),
            reason: reason.to_string(),
        };
        let keys = account_keys(&response.transaction.transaction)
            .ok_or_else(|| malformed("unsupported transaction encoding"))?;
        let meta = response
            .transaction
            .meta
            .ok_or_else(|| malformed("missing status meta"))?;

        Ok(ParsedTransaction {
            signature: signature.to_string(),
            slot: response.slot,
            block_time: response.block_time,
            account_keys: keys,
            failed: meta.err.is_some(),
            pre_balances: meta.pre_balances,
            post_balances: meta.post_balances,
            pre_token_balances: token_balances(meta.pre_token_balances),
            post_token_balances: token_balances(meta.post_token_balances),
            log_messages: Option::<Vec<String>>::from(meta.log_messages).unwrap_or_default(),
        })
    }

    async fn get_recent_signatures(
        &self,
        endpoint: &Endpoint,
        program_id: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        let program = Pubkey::from_str(program_id)
            .map_err(|e| Error::Config(format!("invalid program id {}: {}", program_id, e)))?;
        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until: None,
            limit: Some(limit),
            commitment: Some(self.commitment),
        };

        let statuses = self
            .client(endpoint)
            .get_signatures_for_address_with_config(&program, config)
            .await?;

        Ok(statuses
            .into_iter()
            .map(|s| SignatureInfo {
                signature: s.signature,
                slot: s.slot,
                failed: s.err.is_some(),
                block_time: s.block_time,
            })
            .collect())
    }

    async fn get_block(&self, endpoint: &Endpoint, slot: u64) -> Result<Option<BlockSummary>> {
        let config = RpcBlockConfig {
            encoding: Some(UiTransactionEncoding::Json),
            transaction_details: Some(TransactionDetails::Accounts),
            rewards: Some(false),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };

        let block = match self.client(endpoint).get_block_with_config(slot, config).await {
            Ok(block) => block,
            Err(e) if is_skipped_slot(&e.to_string()) => {
                debug!(slot, "Slot has no block");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let transactions = block
            .transactions
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tx| {
                let failed = tx.meta.as_ref().is_some_and(|m| m.err.is_some());
                let signature = match &tx.transaction {
                    EncodedTransaction::Accounts(list) => list.signatures.first().cloned(),
                    EncodedTransaction::Json(ui) => ui.signatures.first().cloned(),
                    _ => None,
                }?;
                Some(BlockTransaction {
                    signature,
                    account_keys: account_keys(&tx.transaction)?,
                    failed,
                })
            })
            .collect();

        Ok(Some(BlockSummary {
            slot,
            block_time: block.block_time,
            transactions,
        }))
    }

    async fn get_slot(&self, endpoint: &Endpoint) -> Result<u64> {
        Ok(self.client(endpoint).get_slot().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_logs_notification() {
        let text = r#"{
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "result": {
                    "context": { "slot": 5208469 },
                    "value": {
                        "signature": "5h6xBEauJ3PK6SWCZ1PGjBvj8vDdWG3KpwATGy1ARAXFSDwt8GFXM7W5Ncn16wmqokgpiKRLuS83KUxyZyv2sUYv",
                        "err": null,
                        "logs": ["Program log: Instruction: Create"]
                    }
                },
                "subscription": 24040
            }
        }"#;

        let batch = parse_logs_message(text).unwrap().unwrap();
        assert_eq!(batch.slot, 5208469);
        assert!(!batch.failed);
        assert_eq!(batch.logs, vec!["Program log: Instruction: Create"]);
    }

    #[test]
    fn test_failed_transaction_flagged() {
        let text = r#"{"jsonrpc":"2.0","method":"logsNotification","params":{"result":{"context":{"slot":1},"value":{"signature":"abc","err":{"InstructionError":[0,"Custom"]},"logs":[]}},"subscription":1}}"#;
        let batch = parse_logs_message(text).unwrap().unwrap();
        assert!(batch.failed);
    }

    #[test]
    fn test_subscription_ack_is_skipped() {
        assert!(parse_logs_message(r#"{"jsonrpc":"2.0","result":24040,"id":1}"#).is_none());
        assert!(parse_slot_message(r#"{"jsonrpc":"2.0","result":7,"id":1}"#).is_none());
    }

    #[test]
    fn test_server_error_surfaces() {
        let text = r#"{"jsonrpc":"2.0","error":{"code":-32602,"message":"Invalid params"},"id":1}"#;
        assert!(matches!(parse_logs_message(text), Some(Err(Error::Subscription(_)))));
    }

    #[test]
    fn test_parse_slot_notification() {
        let text = r#"{"jsonrpc":"2.0","method":"slotNotification","params":{"result":{"parent":75,"root":44,"slot":76},"subscription":0}}"#;
        assert_eq!(parse_slot_message(text).unwrap().unwrap(), 76);
    }

    #[test]
    fn test_skipped_slot_detection() {
        assert!(is_skipped_slot(
            "RPC response error -32007: Slot 1234 was skipped, or missing due to ledger jump to recent snapshot"
        ));
        assert!(!is_skipped_slot("connection refused"));
    }
}
