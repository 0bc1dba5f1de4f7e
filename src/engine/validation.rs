//! Second-opinion gate for high-stakes opportunities.
//!
//! ```text
//! NotNeeded ──trigger──▶ validated ──quality──▶ AcceptedFull     ×1.0  (≥ 80)
//!                                              AcceptedReduced  ×0.75 (≥ 70)
//!                                              AcceptedMinimal  ×0.5  (≥ 50)
//!                                              Rejected         ×0
//! ```
//!
//! A premium second opinion adds 5 quality points and 0.1 to the multiplier
//! (capped at 1.0). A rejection stays at zero.

use chrono::{DateTime, Utc};

use crate::engine::kelly::implied_probability;
use crate::models::{
    Opportunity, ProbabilityJudgment, ValidationReport, ValidationState, ValueAssessment,
};

const PREMIUM_QUALITY_BONUS: f64 = 5.0;
const PREMIUM_MULTIPLIER_BONUS: f64 = 0.1;

/// When a second opinion is required.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationThresholds {
    /// Stake amount, in bankroll currency.
    pub high_stake: f64,
    pub high_edge: f64,
    pub critical_confidence: f64,
    /// Kick-off closer than this many hours forces a check.
    pub imminent_hours: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        ValidationThresholds {
            high_stake: 100.0,
            high_edge: 0.10,
            critical_confidence: 0.85,
            imminent_hours: 1.0,
        }
    }
}

/// Whether `opp` has to go through the gate. Arbitrage sets never do: their
/// edge is a price fact, not an estimate a second opinion could move.
pub fn needs_validation(
    opp: &Opportunity,
    thresholds: &ValidationThresholds,
    now: DateTime<Utc>,
) -> bool {
    if opp.is_arbitrage() || opp.stake_amount <= 0.0 {
        return false;
    }
    let hours_to_start = (opp.start_time - now).num_seconds() as f64 / 3600.0;
    opp.stake_amount >= thresholds.high_stake
        || opp.edge >= thresholds.high_edge
        || opp.confidence >= thresholds.critical_confidence
        || hours_to_start < thresholds.imminent_hours
}

fn assessment_value(assessment: ValueAssessment) -> f64 {
    match assessment {
        ValueAssessment::StrongValue => 1.0,
        ValueAssessment::ModerateValue => 0.6,
        ValueAssessment::NoValue => 0.0,
    }
}

/// `1 - |e2 - e1| / |e1|`, clamped to [0, 1].
fn edge_consistency(preliminary: f64, second: f64) -> f64 {
    let scale = preliminary.abs().max(1e-9);
    (1.0 - (second - preliminary).abs() / scale).clamp(0.0, 1.0)
}

/// Composite quality in [0, 100], before any premium bonus.
pub fn quality_score(preliminary_edge: f64, odds: f64, second: &ProbabilityJudgment) -> f64 {
    let second_edge = second.probability - implied_probability(odds);
    let risk_inverse = (1.0 - 0.2 * second.risk_factors.len() as f64).max(0.0);
    30.0 * edge_consistency(preliminary_edge, second_edge)
        + 25.0 * second.confidence.clamp(0.0, 1.0)
        + 25.0 * risk_inverse
        + 20.0 * assessment_value(second.value_assessment)
}

/// Map a quality score to a terminal state and stake multiplier.
pub fn verdict(quality: f64, premium: bool) -> (ValidationState, f64, f64) {
    let quality = if premium {
        (quality + PREMIUM_QUALITY_BONUS).min(100.0)
    } else {
        quality
    };
    let (state, multiplier) = if quality >= 80.0 {
        (ValidationState::AcceptedFull, 1.0)
    } else if quality >= 70.0 {
        (ValidationState::AcceptedReduced, 0.75)
    } else if quality >= 50.0 {
        (ValidationState::AcceptedMinimal, 0.5)
    } else {
        (ValidationState::Rejected, 0.0)
    };
    let multiplier = if premium && state != ValidationState::Rejected {
        (multiplier + PREMIUM_MULTIPLIER_BONUS).min(1.0)
    } else {
        multiplier
    };
    (state, quality, multiplier)
}

/// Report for an opportunity that did not trip any trigger.
pub fn not_needed() -> ValidationReport {
    ValidationReport {
        state: ValidationState::NotNeeded,
        quality_score: None,
        stake_multiplier: 1.0,
        second_opinion: None,
        premium: false,
    }
}

/// Judge `opp` against its second opinion.
pub fn evaluate(opp: &Opportunity, second: &ProbabilityJudgment) -> ValidationReport {
    let raw = quality_score(opp.edge, opp.odds, second);
    let (state, quality, stake_multiplier) = verdict(raw, second.premium);
    ValidationReport {
        state,
        quality_score: Some(quality),
        stake_multiplier,
        second_opinion: Some(second.provenance),
        premium: second.premium,
    }
}
