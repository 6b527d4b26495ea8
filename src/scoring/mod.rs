//! Multi-factor opportunity scoring
//!
//! `ScoringEngine::score` is a pure function of a record and an immutable
//! [`ScoringContext`] snapshot. Five sub-scores in [0, 100] are combined
//! with configurable weights, normalised over the signals that are
//! actually present, then mapped to a risk tier and a classification.

pub mod context;
pub mod name;
pub mod timing;

pub use context::{CreatorTrack, ScoringContext, SessionHistory};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::token::{Classification, RiskTier, TokenRecord};

/// Weight of each signal in the combined score
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ScoringWeights {
    #[serde(default = "default_liquidity_weight")]
    pub liquidity: f64,
    #[serde(default = "default_timing_weight")]
    pub timing: f64,
    #[serde(default = "default_name_weight")]
    pub name: f64,
    #[serde(default = "default_creator_weight")]
    pub creator: f64,
    #[serde(default = "default_social_weight")]
    pub social: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            liquidity: default_liquidity_weight(),
            timing: default_timing_weight(),
            name: default_name_weight(),
            creator: default_creator_weight(),
            social: default_social_weight(),
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.liquidity + self.timing + self.name + self.creator + self.social
    }
}

/// Cut-offs for risk tiers and classification
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ScoringThresholds {
    /// Score at or above this = low risk
    #[serde(default = "default_low_risk_min")]
    pub low_risk_min: f64,
    /// Score at or above this = medium risk, below = high
    #[serde(default = "default_medium_risk_min")]
    pub medium_risk_min: f64,
    /// Score at or above this (and not high risk) = recommended
    #[serde(default = "default_recommended_min")]
    pub recommended_min: f64,
    /// Score at or above this = classified
    #[serde(default = "default_classified_min")]
    pub classified_min: f64,
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self {
            low_risk_min: default_low_risk_min(),
            medium_risk_min: default_medium_risk_min(),
            recommended_min: default_recommended_min(),
            classified_min: default_classified_min(),
        }
    }
}

/// One step of the liquidity step function
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LiquidityStep {
    /// Liquidity in SOL at or above which `score` applies
    pub min_sol: f64,
    pub score: f64,
}

impl LiquidityStep {
    fn new(min_sol: f64, score: f64) -> Self {
        Self { min_sol, score }
    }
}

/// Hour-of-day / day-of-week activity windows (UTC)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimingConfig {
    /// First hour of the most active window
    #[serde(default = "default_active_start_hour")]
    pub active_start_hour: u32,
    /// Last hour (inclusive) of the most active window
    #[serde(default = "default_active_end_hour")]
    pub active_end_hour: u32,
    /// First hour of the warm-up window preceding the active one
    #[serde(default = "default_shoulder_start_hour")]
    pub shoulder_start_hour: u32,
    #[serde(default = "default_active_score")]
    pub active_score: f64,
    #[serde(default = "default_shoulder_score")]
    pub shoulder_score: f64,
    #[serde(default = "default_off_hours_score")]
    pub off_hours_score: f64,
    /// Multiplier applied on Saturday and Sunday
    #[serde(default = "default_weekend_factor")]
    pub weekend_factor: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            active_start_hour: default_active_start_hour(),
            active_end_hour: default_active_end_hour(),
            shoulder_start_hour: default_shoulder_start_hour(),
            active_score: default_active_score(),
            shoulder_score: default_shoulder_score(),
            off_hours_score: default_off_hours_score(),
            weekend_factor: default_weekend_factor(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default)]
    pub thresholds: ScoringThresholds,
    #[serde(default = "default_liquidity_steps")]
    pub liquidity_steps: Vec<LiquidityStep>,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Market cap at which a creator's earlier token counts as a success
    #[serde(default = "default_creator_success_market_cap_usd")]
    pub creator_success_market_cap_usd: f64,
    /// Names/symbols remembered for the uniqueness check
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
    /// Creator launches remembered for the track-record signal
    #[serde(default = "default_creator_window")]
    pub creator_window: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            thresholds: ScoringThresholds::default(),
            liquidity_steps: default_liquidity_steps(),
            timing: TimingConfig::default(),
            creator_success_market_cap_usd: default_creator_success_market_cap_usd(),
            recent_window: default_recent_window(),
            creator_window: default_creator_window(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        for (name, value) in [
            ("liquidity", w.liquidity),
            ("timing", w.timing),
            ("name", w.name),
            ("creator", w.creator),
            ("social", w.social),
        ] {
            if value < 0.0 || !value.is_finite() {
                anyhow::bail!("scoring weight {} must be non-negative, got {}", name, value);
            }
        }
        if w.sum() <= 0.0 {
            anyhow::bail!("scoring weights must have a positive sum");
        }

        let t = &self.thresholds;
        for value in [t.low_risk_min, t.medium_risk_min, t.recommended_min, t.classified_min] {
            if !(0.0..=100.0).contains(&value) {
                anyhow::bail!("scoring thresholds must be within 0..=100, got {}", value);
            }
        }
        if t.medium_risk_min > t.low_risk_min {
            anyhow::bail!("medium_risk_min cannot exceed low_risk_min");
        }
        if t.classified_min > t.recommended_min {
            anyhow::bail!("classified_min cannot exceed recommended_min");
        }

        if self
            .liquidity_steps
            .iter()
            .any(|s| s.min_sol < 0.0 || !(0.0..=100.0).contains(&s.score))
        {
            anyhow::bail!("liquidity steps need min_sol >= 0 and score within 0..=100");
        }

        let timing = &self.timing;
        if timing.active_start_hour > 23
            || timing.active_end_hour > 23
            || timing.shoulder_start_hour > 23
        {
            anyhow::bail!("timing hours must be within 0..=23");
        }

        Ok(())
    }
}

/// Per-signal sub-scores; `None` marks an absent signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub liquidity: Option<f64>,
    pub timing: f64,
    pub name: f64,
    pub creator: f64,
    pub social: Option<f64>,
}

/// Result of scoring one record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreOutcome {
    pub opportunity: f64,
    pub risk_tier: RiskTier,
    pub classification: Classification,
    pub breakdown: ScoreBreakdown,
}

/// The scoring engine
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

impl ScoringEngine {
    pub fn new(mut config: ScoringConfig) -> Self {
        // Highest step first so the first match wins
        config
            .liquidity_steps
            .sort_by(|a, b| b.min_sol.total_cmp(&a.min_sol));
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a record against a history snapshot
    pub fn score(&self, record: &TokenRecord, context: &ScoringContext) -> ScoreOutcome {
        let breakdown = ScoreBreakdown {
            liquidity: record.initial_liquidity_sol.map(|sol| self.liquidity_score(sol)),
            timing: timing::timing_score(record.created_at, &self.config.timing),
            name: name::metadata_score(record, context),
            creator: creator_score(context.creator.as_ref()),
            social: social_score(record),
        };

        let opportunity = self.combine(&breakdown);
        let risk_tier = risk_tier(opportunity, &self.config.thresholds);
        let classification = classify(opportunity, risk_tier, &self.config.thresholds);

        ScoreOutcome {
            opportunity,
            risk_tier,
            classification,
            breakdown,
        }
    }

    /// Score a record and write the outcome into its score fields
    pub fn apply(&self, record: &mut TokenRecord, context: &ScoringContext) -> ScoreOutcome {
        let outcome = self.score(record, context);
        record.opportunity_score = outcome.opportunity;
        record.risk_tier = outcome.risk_tier;
        record.classification = outcome.classification;
        outcome
    }

    /// Saturating step function of initial liquidity
    pub fn liquidity_score(&self, sol: f64) -> f64 {
        if sol <= 0.0 || !sol.is_finite() {
            return 0.0;
        }
        self.config
            .liquidity_steps
            .iter()
            .find(|step| sol >= step.min_sol)
            .map_or(0.0, |step| step.score)
    }

    fn combine(&self, breakdown: &ScoreBreakdown) -> f64 {
        let w = &self.config.weights;
        let signals = [
            (breakdown.liquidity, w.liquidity),
            (Some(breakdown.timing), w.timing),
            (Some(breakdown.name), w.name),
            (Some(breakdown.creator), w.creator),
            (breakdown.social, w.social),
        ];

        let (weighted, total_weight) = signals
            .iter()
            .filter_map(|(score, weight)| score.map(|s| (s * weight, *weight)))
            .fold((0.0, 0.0), |(ws, tw), (s, w)| (ws + s, tw + w));

        if total_weight <= 0.0 {
            return 0.0;
        }
        (weighted / total_weight).clamp(0.0, 100.0)
    }
}

/// Risk tier for an opportunity score
pub fn risk_tier(score: f64, thresholds: &ScoringThresholds) -> RiskTier {
    if score >= thresholds.low_risk_min {
        RiskTier::Low
    } else if score >= thresholds.medium_risk_min {
        RiskTier::Medium
    } else {
        RiskTier::High
    }
}

/// Classification for an opportunity score and its tier
pub fn classify(score: f64, tier: RiskTier, thresholds: &ScoringThresholds) -> Classification {
    if score >= thresholds.recommended_min && tier != RiskTier::High {
        Classification::Recommended
    } else if score >= thresholds.classified_min {
        Classification::Classified
    } else {
        Classification::Ignored
    }
}

/// 50 without history, otherwise the share of earlier tokens that succeeded
fn creator_score(track: Option<&CreatorTrack>) -> f64 {
    match track {
        Some(track) if track.launches > 0 => {
            100.0 * track.successes as f64 / track.launches as f64
        }
        _ => 50.0,
    }
}

/// Links and community activity; absent when the record carries neither
fn social_score(record: &TokenRecord) -> Option<f64> {
    let links = record.socials.count();
    if links == 0 && record.reply_count.is_none() {
        return None;
    }
    let link_score = links as f64 * 25.0;
    let reply_score = record.reply_count.map_or(0.0, |r| r.min(50) as f64 / 50.0 * 25.0);
    Some((link_score + reply_score).min(100.0))
}

// Default value functions
fn default_liquidity_weight() -> f64 {
    0.25
}

fn default_timing_weight() -> f64 {
    0.15
}

fn default_name_weight() -> f64 {
    0.25
}

fn default_creator_weight() -> f64 {
    0.25
}

fn default_social_weight() -> f64 {
    0.10
}

fn default_low_risk_min() -> f64 {
    75.0
}

fn default_medium_risk_min() -> f64 {
    41.0
}

fn default_recommended_min() -> f64 {
    85.0
}

fn default_classified_min() -> f64 {
    65.0
}

fn default_liquidity_steps() -> Vec<LiquidityStep> {
    vec![
        LiquidityStep::new(50.0, 100.0),
        LiquidityStep::new(20.0, 80.0),
        LiquidityStep::new(10.0, 65.0),
        LiquidityStep::new(5.0, 50.0),
        LiquidityStep::new(1.0, 30.0),
        LiquidityStep::new(0.0, 15.0),
    ]
}

fn default_active_start_hour() -> u32 {
    13
}

fn default_active_end_hour() -> u32 {
    23
}

fn default_shoulder_start_hour() -> u32 {
    9
}

fn default_active_score() -> f64 {
    100.0
}

fn default_shoulder_score() -> f64 {
    70.0
}

fn default_off_hours_score() -> f64 {
    40.0
}

fn default_weekend_factor() -> f64 {
    0.8
}

fn default_creator_success_market_cap_usd() -> f64 {
    50_000.0
}

fn default_recent_window() -> usize {
    500
}

fn default_creator_window() -> usize {
    10_000
}
