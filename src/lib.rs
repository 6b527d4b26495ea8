//! Pump.fun Radar Library
//!
//! Real-time detection of new pump.fun tokens. Three event sources watch
//! the chain, an extractor turns creation transactions into token records,
//! an aggregator merges external market data, and a scoring engine ranks
//! everything by opportunity and risk.

pub mod aggregator;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod endpoint;
pub mod error;
pub mod extractor;
pub mod health;
pub mod pipeline;
pub mod program;
pub mod rpc;
pub mod scoring;
pub mod source;
pub mod token;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineStats};
pub use token::TokenRecord;
