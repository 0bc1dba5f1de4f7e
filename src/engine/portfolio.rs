//! Greedy, risk-capped portfolio selection.
//!
//! Candidates are walked once in rank order. Each is accepted only if the
//! running totals stay within every cap after adding it; otherwise it is
//! skipped and the walk continues. Nothing is re-ordered.
//!
//! Caps, all as fractions of bankroll:
//! - total stake ≤ `max_total_risk_fraction`
//! - stake per sport ≤ `max_per_category_fraction`
//! - correlated exposure `sqrt(Σᵢ Σⱼ wᵢ wⱼ ρᵢⱼ)` ≤ `max_correlated_fraction`

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Opportunity, PortfolioConstraints, PortfolioRiskSummary, RiskLevel};

/// Slack for float accumulation when comparing against a cap.
const CAP_TOLERANCE: f64 = 1e-12;

/// Pairwise correlation assumed between two opportunities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPolicy {
    pub same_match: f64,
    pub same_league: f64,
    pub same_sport: f64,
}

impl Default for CorrelationPolicy {
    /// Same sport is fully correlated; different sports are independent.
    fn default() -> Self {
        CorrelationPolicy {
            same_match: 1.0,
            same_league: 1.0,
            same_sport: 1.0,
        }
    }
}

impl CorrelationPolicy {
    pub fn between(&self, a: &Opportunity, b: &Opportunity) -> f64 {
        if a.match_id == b.match_id {
            self.same_match
        } else if a.sport == b.sport && !a.league.is_empty() && a.league == b.league {
            self.same_league
        } else if a.sport == b.sport {
            self.same_sport
        } else {
            0.0
        }
    }

    /// `sqrt(wᵀ R w)` over the stake fractions of `opps`.
    pub fn effective_exposure(&self, opps: &[&Opportunity]) -> f64 {
        let mut variance = 0.0f64;
        for (i, a) in opps.iter().enumerate() {
            for (j, b) in opps.iter().enumerate() {
                let rho = if i == j { 1.0 } else { self.between(a, b) };
                variance += a.stake_fraction * b.stake_fraction * rho;
            }
        }
        variance.max(0.0).sqrt()
    }
}

/// Ranking key for the candidate list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    #[default]
    Priority,
    Roi,
}

impl FromStr for RankBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "priority" | "priority_score" => Ok(RankBy::Priority),
            "roi" | "expected_roi" => Ok(RankBy::Roi),
            other => Err(format!("unknown ranking '{}', expected priority or roi", other)),
        }
    }
}

/// Sort descending by the chosen key; ties break on id so runs are stable.
pub fn rank(opportunities: &mut [Opportunity], by: RankBy) {
    let key = |o: &Opportunity| match by {
        RankBy::Priority => o.priority_score,
        RankBy::Roi => o.expected_roi,
    };
    opportunities.sort_by(|a, b| {
        key(b)
            .partial_cmp(&key(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn summary_risk_level(total_risk: f64) -> RiskLevel {
    if total_risk < 0.05 {
        RiskLevel::Low
    } else if total_risk < 0.10 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Walk `ranked` in order and keep what fits.
pub fn select(
    ranked: Vec<Opportunity>,
    constraints: &PortfolioConstraints,
    policy: &CorrelationPolicy,
) -> (Vec<Opportunity>, PortfolioRiskSummary) {
    let candidate_sports: BTreeSet<String> = ranked.iter().map(|o| o.sport.clone()).collect();

    let mut accepted: Vec<Opportunity> = Vec::new();
    let mut total_risk = 0.0f64;
    let mut sport_exposure: BTreeMap<String, f64> = BTreeMap::new();
    let mut skipped = 0usize;

    for candidate in ranked {
        if accepted.len() >= constraints.max_opportunities_count {
            break;
        }
        let w = candidate.stake_fraction;
        if w <= 0.0 {
            skipped += 1;
            continue;
        }

        let new_total = total_risk + w;
        if new_total > constraints.max_total_risk_fraction + CAP_TOLERANCE {
            debug!(
                "Skipping {}: total risk {:.4} > cap {:.4}",
                candidate.id, new_total, constraints.max_total_risk_fraction
            );
            skipped += 1;
            continue;
        }

        let new_sport = sport_exposure.get(&candidate.sport).copied().unwrap_or(0.0) + w;
        if new_sport > constraints.max_per_category_fraction + CAP_TOLERANCE {
            debug!(
                "Skipping {}: {} exposure {:.4} > cap {:.4}",
                candidate.id, candidate.sport, new_sport, constraints.max_per_category_fraction
            );
            skipped += 1;
            continue;
        }

        let mut with_candidate: Vec<&Opportunity> = accepted.iter().collect();
        with_candidate.push(&candidate);
        let correlated = policy.effective_exposure(&with_candidate);
        if correlated > constraints.max_correlated_fraction + CAP_TOLERANCE {
            debug!(
                "Skipping {}: correlated exposure {:.4} > cap {:.4}",
                candidate.id, correlated, constraints.max_correlated_fraction
            );
            skipped += 1;
            continue;
        }

        total_risk = new_total;
        sport_exposure.insert(candidate.sport.clone(), new_sport);
        accepted.push(candidate);
    }

    let selected_sports = sport_exposure.len();
    let diversification_score = if candidate_sports.is_empty() {
        0.0
    } else {
        selected_sports as f64 / candidate_sports.len() as f64
    };
    let summary = PortfolioRiskSummary {
        total_risk,
        total_stake: accepted.iter().map(|o| o.stake_amount).sum(),
        diversification_score,
        risk_level: summary_risk_level(total_risk),
        sport_exposure,
        selected: accepted.len(),
        skipped,
    };
    (accepted, summary)
}
