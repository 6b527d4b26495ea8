//! Pump.fun program constants and log markers
//!
//! # WARNING: These constants may change without notice
//! Pump.fun has historically modified their program behavior.
//! If detection goes quiet, check the program id and the log
//! markers below against a fresh creation transaction.

use base64::{engine::general_purpose::STANDARD, Engine};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Pump.fun program ID
pub const PUMP_PROGRAM_ID_STR: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

/// Lamports in one SOL
pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Log lines emitted by the creation instruction
pub const DEFAULT_CREATION_MARKERS: [&str; 2] = [
    "Program log: Instruction: Create",
    "Program log: Instruction: CreateV2",
];

lazy_static::lazy_static! {
    /// Pump.fun program ID as Pubkey
    pub static ref PUMP_PROGRAM_ID: Pubkey =
        Pubkey::from_str(PUMP_PROGRAM_ID_STR).expect("Invalid pump program ID");
}

/// Check whether a single log line carries a marker.
///
/// A marker matches when the line equals it or continues with a
/// non-identifier character, so "Instruction: Create" does not match
/// "Instruction: CreateIdempotent" from the associated token program.
pub fn marker_matches(line: &str, marker: &str) -> bool {
    let line = line.trim();
    match line.strip_prefix(marker) {
        Some(rest) => rest
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_')),
        None => false,
    }
}

/// Check whether any log line of a batch marks a creation instruction
pub fn has_creation_marker<S: AsRef<str>>(logs: &[S], markers: &[String]) -> bool {
    logs.iter()
        .any(|line| markers.iter().any(|m| marker_matches(line.as_ref(), m)))
}

/// Check whether a string is a plausible base58 account address
pub fn is_valid_address(address: &str) -> bool {
    Pubkey::from_str(address).is_ok()
}

/// Convert lamports to SOL
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL
}

/// Anchor discriminator: SHA-256("<namespace>:<name>")[0..8]
pub fn anchor_discriminator(namespace: &str, name: &str) -> [u8; 8] {
    use sha2::{Digest, Sha256};

    let preimage = format!("{}:{}", namespace, name);
    let hash = Sha256::digest(preimage.as_bytes());

    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&hash[..8]);
    discriminator
}

/// Anchor event emitted by the creation instruction
#[derive(Debug, Clone, PartialEq)]
pub struct CreateEvent {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub mint: String,
    pub bonding_curve: String,
    pub user: String,
}

impl CreateEvent {
    /// Parse event bytes (discriminator included)
    pub fn parse(data: &[u8]) -> Result<Self> {
        // Layout after the 8-byte discriminator:
        // - name, symbol, uri: String (4 bytes length + content)
        // - mint, bonding_curve, user: Pubkey (32 bytes each)
        if data.len() < 8 || data[..8] != anchor_discriminator("event", "CreateEvent") {
            return Err(Error::Serialization("not a CreateEvent".to_string()));
        }

        let mut offset = 8;
        let name = read_string(data, &mut offset)?;
        let symbol = read_string(data, &mut offset)?;
        let uri = read_string(data, &mut offset)?;
        let mint = read_pubkey(data, &mut offset)?;
        let bonding_curve = read_pubkey(data, &mut offset)?;
        let user = read_pubkey(data, &mut offset)?;

        Ok(Self {
            name,
            symbol,
            uri,
            mint,
            bonding_curve,
            user,
        })
    }

    /// Find and decode the event among a transaction's log lines
    pub fn from_logs<S: AsRef<str>>(logs: &[S]) -> Option<Self> {
        logs.iter()
            .filter_map(|line| line.as_ref().trim().strip_prefix("Program data: "))
            .filter_map(|payload| STANDARD.decode(payload).ok())
            .find_map(|bytes| Self::parse(&bytes).ok())
    }
}

fn read_string(data: &[u8], offset: &mut usize) -> Result<String> {
    if *offset + 4 > data.len() {
        return Err(Error::Serialization("string length out of bounds".to_string()));
    }

    let len = u32::from_le_bytes(
        data[*offset..*offset + 4]
            .try_into()
            .map_err(|_| Error::Serialization("invalid string length".to_string()))?,
    ) as usize;

    *offset += 4;

    if *offset + len > data.len() {
        return Err(Error::Serialization("string content out of bounds".to_string()));
    }

    let s = String::from_utf8(data[*offset..*offset + len].to_vec())
        .map_err(|_| Error::Serialization("invalid UTF-8 in string".to_string()))?;

    *offset += len;
    Ok(s)
}

fn read_pubkey(data: &[u8], offset: &mut usize) -> Result<String> {
    let bytes = data
        .get(*offset..*offset + 32)
        .ok_or_else(|| Error::Serialization("pubkey out of bounds".to_string()))?;
    let key = Pubkey::try_from(bytes)
        .map_err(|_| Error::Serialization("invalid pubkey".to_string()))?;
    *offset += 32;
    Ok(key.to_string())
}
