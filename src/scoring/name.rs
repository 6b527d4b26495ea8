//! Name and symbol quality
//!
//! Hot-path checks on metadata only, no network calls.

use regex::Regex;
use std::sync::OnceLock;

use super::context::ScoringContext;
use crate::token::TokenRecord;

/// Name length window
pub const NAME_LEN: (usize, usize) = (3, 20);
/// Symbol length window
pub const SYMBOL_LEN: (usize, usize) = (3, 6);

/// Score given to records still carrying placeholder metadata
const UNVERIFIED_SCORE: f64 = 20.0;
/// Share of the combined metadata score taken by the name
const NAME_SHARE: f64 = 0.6;

static SCAM_KEYWORDS: OnceLock<Regex> = OnceLock::new();
static SUSPICIOUS_CHARS: OnceLock<Regex> = OnceLock::new();

fn scam_keywords() -> &'static Regex {
    SCAM_KEYWORDS.get_or_init(|| {
        Regex::new(r"(?i)(scam|rug|honeypot|free\s*money|100+x|1000+x|guaranteed|send.*sol|airdrop.*claim)")
            .expect("Invalid scam keywords regex")
    })
}

fn suspicious_chars() -> &'static Regex {
    SUSPICIOUS_CHARS.get_or_init(|| {
        // Zero-width and non-breaking spaces used for lookalike names
        Regex::new(r"[\x{200B}-\x{200D}\x{FEFF}\x{00A0}]").expect("Invalid suspicious chars regex")
    })
}

/// Combined name/symbol score for a record
pub fn metadata_score(record: &TokenRecord, context: &ScoringContext) -> f64 {
    if !record.metadata_verified {
        return UNVERIFIED_SCORE;
    }
    let name = name_score(&record.name, context.name_seen);
    let symbol = symbol_score(&record.symbol, context.symbol_seen);
    NAME_SHARE * name + (1.0 - NAME_SHARE) * symbol
}

/// Quality of a token name in [0, 100]
pub fn name_score(name: &str, seen_before: usize) -> f64 {
    let name = name.trim();
    if name.is_empty() || suspicious_chars().is_match(name) {
        return 0.0;
    }

    let mut score: f64 = 100.0;
    let len = name.chars().count();

    if scam_keywords().is_match(name) {
        score -= 60.0;
    }
    if len < NAME_LEN.0 || len > NAME_LEN.1 {
        score -= 30.0;
    }
    if ratio(name, |c| c.is_ascii_digit()) > 0.3 {
        score -= 20.0;
    }
    if ratio(name, |c| !c.is_alphanumeric() && !c.is_whitespace()) > 0.2 {
        score -= 20.0;
    }
    if seen_before > 0 {
        // Copycats of a name already launched this session
        score -= (15.0 * seen_before as f64 + 15.0).min(50.0);
    }

    score.clamp(0.0, 100.0)
}

/// Quality of a token symbol in [0, 100]
pub fn symbol_score(symbol: &str, seen_before: usize) -> f64 {
    let symbol = symbol.trim();
    if symbol.is_empty() || suspicious_chars().is_match(symbol) {
        return 0.0;
    }

    let mut score: f64 = 100.0;
    let len = symbol.chars().count();

    if scam_keywords().is_match(symbol) {
        score -= 60.0;
    }
    if len < SYMBOL_LEN.0 || len > SYMBOL_LEN.1 {
        score -= 30.0;
    }
    if symbol.chars().any(|c| c.is_alphabetic() && !c.is_uppercase()) {
        score -= 15.0;
    }
    if symbol.chars().any(|c| c.is_ascii_digit()) {
        score -= 20.0;
    }
    if symbol.chars().any(|c| !c.is_alphanumeric()) {
        score -= 20.0;
    }
    if seen_before > 0 {
        score -= (10.0 * seen_before as f64 + 15.0).min(40.0);
    }

    score.clamp(0.0, 100.0)
}

fn ratio(s: &str, pred: impl Fn(char) -> bool) -> f64 {
    let total = s.chars().count();
    if total == 0 {
        return 0.0;
    }
    s.chars().filter(|c| pred(*c)).count() as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_clean_name_scores_full() {
        assert_eq!(name_score("MoonCoin", 0), 100.0);
        assert_eq!(name_score("Doge Killer", 0), 100.0);
    }

    #[test]
    fn test_name_length_bounds() {
        assert!(name_score("AB", 0) < 100.0);
        assert!(name_score("An Extremely Long Token Name", 0) < 100.0);
        assert_eq!(name_score("ABC", 0), 100.0);
    }

    #[test]
    fn test_scam_keywords_penalized() {
        assert!(name_score("Guaranteed 1000x", 0) <= 40.0);
        assert!(name_score("Rug Pull Coin", 0) <= 40.0);
    }

    #[test]
    fn test_digit_and_punctuation_heavy_names() {
        assert!(name_score("X1234567", 0) <= 80.0);
        assert!(name_score("$$$!!!ok", 0) <= 80.0);
        assert_eq!(name_score("", 0), 0.0);
        assert_eq!(name_score("Moon\u{200B}Coin", 0), 0.0);
    }

    #[test]
    fn test_repeated_name_penalized() {
        let fresh = name_score("MoonCoin", 0);
        let copy = name_score("MoonCoin", 1);
        let many = name_score("MoonCoin", 10);
        assert!(copy < fresh);
        assert!(many <= copy);
        assert_eq!(many, 50.0);
    }

    #[test]
    fn test_symbol_rules() {
        assert_eq!(symbol_score("MOON", 0), 100.0);
        assert_eq!(symbol_score("moon", 0), 85.0);
        assert!(symbol_score("MOON2", 0) < 100.0);
        assert!(symbol_score("MO", 0) < 100.0);
        assert!(symbol_score("MOONCOIN", 0) < 100.0);
        assert!(symbol_score("M-N", 0) < 100.0);
    }

    #[test]
    fn test_unverified_metadata_scores_low() {
        let record = TokenRecord::new("7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr", Utc::now());
        assert_eq!(
            metadata_score(&record, &ScoringContext::default()),
            UNVERIFIED_SCORE
        );
    }
}
