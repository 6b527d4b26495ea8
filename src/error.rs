//! Error types for the radar pipeline

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the radar pipeline
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("Rate limited by {endpoint}, retry after {retry_after:?}")]
    RateLimited {
        endpoint: String,
        retry_after: Duration,
    },

    // Subscription errors
    #[error("Subscription failed: {0}")]
    Subscription(String),

    #[error("Subscription closed by {0}")]
    SubscriptionClosed(String),

    // Extraction errors
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Malformed transaction {signature}: {reason}")]
    MalformedTransaction { signature: String, reason: String },

    #[error("No new mint in transaction {0}")]
    MissingMint(String),

    // Provider errors
    #[error("Provider {provider} request failed: {reason}")]
    Provider { provider: String, reason: String },

    #[error("Provider {provider} returned an unparseable payload: {reason}")]
    ProviderPayload { provider: String, reason: String },

    #[error("All {0} providers failed")]
    AllProvidersFailed(usize),

    // Systemic errors
    #[error("No endpoints configured")]
    NoEndpoints,

    #[error("Source {source_name} disabled after {failures} consecutive failures")]
    SourceDisabled { source_name: String, failures: u32 },

    #[error("Component {0} is parked in degraded state")]
    ComponentDegraded(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Shutdown requested")]
    Shutdown,

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// How an error is handled by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Single call failure: retry with backoff, penalize health, never surface
    Transient,
    /// Bad input for one candidate/record: drop it and count
    Structural,
    /// Whole-component condition: alert, restart, park as degraded
    Systemic,
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Classify this error for retry and accounting decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Rpc(_)
            | Error::RpcTimeout(_)
            | Error::RpcConnection(_)
            | Error::RateLimited { .. }
            | Error::Subscription(_)
            | Error::SubscriptionClosed(_)
            | Error::Provider { .. }
            | Error::Io(_) => ErrorClass::Transient,

            Error::TransactionNotFound(_)
            | Error::MalformedTransaction { .. }
            | Error::MissingMint(_)
            | Error::ProviderPayload { .. }
            | Error::Serialization(_) => ErrorClass::Structural,

            Error::Config(_)
            | Error::AllProvidersFailed(_)
            | Error::NoEndpoints
            | Error::SourceDisabled { .. }
            | Error::ComponentDegraded(_)
            | Error::ChannelClosed(_)
            | Error::Shutdown
            | Error::Internal(_)
            | Error::Anyhow(_) => ErrorClass::Systemic,
        }
    }

    /// Retry-after hint carried by rate limit errors
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        let message = e.to_string();
        if message.contains("429") || message.to_lowercase().contains("too many requests") {
            return Error::RateLimited {
                endpoint: "rpc".to_string(),
                retry_after: Duration::from_secs(10),
            };
        }
        Error::Rpc(message)
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::RpcTimeout(0)
        } else if e.is_connect() {
            Error::RpcConnection(e.to_string())
        } else {
            Error::Rpc(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
