use crate::feed::normalize_text;
use crate::models::{LeagueTier, RiskLevel, ValueAssessment};

/// Second divisions: liquid enough to bet, soft enough to misprice.
const TIER1_KEYWORDS: &[&str] = &[
    "championship",
    "2 bundesliga",
    "segunda",
    "serie b",
    "ligue 2",
    "eerste divisie",
    "second division",
    "division 2",
];

const TIER2_KEYWORDS: &[&str] = &[
    "league one",
    "league two",
    "3 liga",
    "serie c",
    "national",
    "third division",
    "primera rfef",
];

/// Data quality below which a record is flagged as a risk.
const LOW_QUALITY: f64 = 0.5;
/// Odds above which a selection is treated as a long shot.
const LONG_ODDS: f64 = 4.0;

/// Keyword-based league tier. Tier 1 is the most attractive.
pub fn classify_league(league: &str) -> LeagueTier {
    let name = normalize_text(league);
    let has = |keywords: &[&str]| keywords.iter().any(|k| name.contains(k));
    if has(TIER1_KEYWORDS) {
        LeagueTier::Tier1
    } else if has(TIER2_KEYWORDS) {
        LeagueTier::Tier2
    } else {
        LeagueTier::Tier3
    }
}

fn tier_bonus(tier: LeagueTier) -> f64 {
    match tier {
        LeagueTier::Tier1 => 15.0,
        LeagueTier::Tier2 => 10.0,
        LeagueTier::Tier3 => 5.0,
    }
}

fn assessment_bonus(assessment: ValueAssessment) -> f64 {
    match assessment {
        ValueAssessment::StrongValue => 20.0,
        ValueAssessment::ModerateValue => 10.0,
        ValueAssessment::NoValue => 0.0,
    }
}

fn time_bonus(hours_to_start: f64) -> f64 {
    if hours_to_start < 2.0 {
        10.0
    } else if hours_to_start < 6.0 {
        5.0
    } else {
        0.0
    }
}

/// Everything the priority score is computed from.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs {
    /// Absolute edge as a fraction (0.05 = five points).
    pub edge: f64,
    pub confidence: f64,
    pub value_assessment: ValueAssessment,
    pub league_tier: LeagueTier,
    pub risk_factor_count: usize,
    pub hours_to_start: f64,
}

/// Ranking score, higher is better, floored at zero.
///
/// `min(edge% × 10, 50) + confidence × 30 + assessment + tier + time
///  − min(risk_factors × 5, 20)`
pub fn priority_score(inputs: &ScoreInputs) -> f64 {
    let edge_component = (inputs.edge * 100.0 * 10.0).min(50.0);
    let confidence_component = inputs.confidence.clamp(0.0, 1.0) * 30.0;
    let risk_penalty = (inputs.risk_factor_count as f64 * 5.0).min(20.0);

    let score = edge_component
        + confidence_component
        + assessment_bonus(inputs.value_assessment)
        + tier_bonus(inputs.league_tier)
        + time_bonus(inputs.hours_to_start)
        - risk_penalty;
    score.max(0.0)
}

/// Risk flags the engine can see for itself, added to any external ones.
pub fn derived_risk_factors(data_quality: f64, bookmakers: usize, odds: f64) -> Vec<String> {
    let mut factors = Vec::new();
    if data_quality < LOW_QUALITY {
        factors.push(format!("low data quality ({:.2})", data_quality));
    }
    if bookmakers <= 1 {
        factors.push("single bookmaker price".to_string());
    }
    if odds > LONG_ODDS {
        factors.push(format!("long odds ({:.2})", odds));
    }
    factors
}

pub fn classify_risk(confidence: f64, risk_factor_count: usize, odds: f64) -> RiskLevel {
    if confidence < 0.6 || risk_factor_count >= 3 || odds > LONG_ODDS {
        RiskLevel::High
    } else if confidence >= 0.75 && risk_factor_count <= 1 && odds <= 2.5 {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    }
}
