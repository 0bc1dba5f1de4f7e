//! One screening pass: merge → estimate/blend → size → score → validate →
//! select.
//!
//! Everything up to validation is a pure function of the merged records and
//! the judgments on file. Validation fans out one second-opinion request per
//! triggering opportunity and waits for all of them before selection runs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info};

use super::arbitrage::{self, best_prices};
use super::blend::blend;
use super::estimate::{ConsensusModel, ProbabilityModel, StatisticalEstimate};
use super::kelly::{self, implied_probability, size_stake, SizingConfig};
use super::portfolio::{rank, select, CorrelationPolicy, RankBy};
use super::scoring::{
    classify_league, classify_risk, derived_risk_factors, priority_score, ScoreInputs,
};
use super::validation::{evaluate, needs_validation, not_needed, ValidationThresholds};
use crate::analysis::{SecondOpinionDesk, UsageSnapshot};
use crate::feed::{merge_fragments, MergeStats};
use crate::models::{
    ArbitrageSet, MatchFragment, MatchRecord, Opportunity, OpportunityKind,
    PortfolioConstraints, PortfolioRiskSummary, ProbabilityJudgment, Provenance,
    ValueAssessment,
};

/// External judgments keyed by selection key.
pub type Judgments = HashMap<String, ProbabilityJudgment>;

/// `<match_id>/<market>/<outcome>`
pub fn selection_key(match_id: &str, market: &str, outcome: &str) -> String {
    format!("{}/{}/{}", match_id, market, outcome)
}

/// Everything a pass needs; read-only for its duration.
#[derive(Debug, Clone)]
pub struct ScreeningConfig {
    pub sizing: SizingConfig,
    pub constraints: PortfolioConstraints,
    pub correlation: CorrelationPolicy,
    pub thresholds: ValidationThresholds,
    pub min_edge: f64,
    pub min_confidence: f64,
    pub rank_by: RankBy,
    pub opportunity_ttl: Duration,
    pub arbitrage_ttl: Duration,
}

/// Output of one pass.
#[derive(Debug, Clone, Serialize)]
pub struct ScreeningReport {
    pub generated_at: DateTime<Utc>,
    /// Accepted opportunities, in rank order.
    pub opportunities: Vec<Opportunity>,
    pub risk_summary: PortfolioRiskSummary,
    pub usage: UsageSnapshot,
    pub merge_stats: MergeStats,
    pub candidate_count: usize,
    /// Below the edge/confidence thresholds or without a stake.
    pub filtered_count: usize,
    /// Zeroed by the validation gate.
    pub rejected_count: usize,
}

/// An opportunity with the statistical estimate it was built from, kept for
/// the validation fallback.
struct Candidate {
    opportunity: Opportunity,
    statistical: StatisticalEstimate,
}

pub struct ScreeningEngine {
    config: ScreeningConfig,
    model: Arc<dyn ProbabilityModel>,
}

impl ScreeningEngine {
    pub fn new(config: ScreeningConfig) -> Self {
        Self::with_model(config, Arc::new(ConsensusModel))
    }

    pub fn with_model(config: ScreeningConfig, model: Arc<dyn ProbabilityModel>) -> Self {
        ScreeningEngine { config, model }
    }

    fn expiry(&self, record: &MatchRecord, ttl: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
        record.start_time.min(now + ttl)
    }

    fn value_candidate(
        &self,
        record: &MatchRecord,
        market: &str,
        outcome: &str,
        bookmaker: &str,
        odds: f64,
        judgments: &Judgments,
        now: DateTime<Utc>,
    ) -> Candidate {
        let id = selection_key(&record.match_id, market, outcome);
        let statistical = self.model.estimate(record, market, outcome);
        let judgment = judgments.get(&id);
        let blended = blend(&statistical, judgment);

        let edge = blended.edge(odds);
        let sizing = size_stake(blended.probability, odds, &self.config.sizing);

        let mut risk_factors =
            derived_risk_factors(record.data_quality, statistical.bookmakers, odds);
        if let Some(j) = judgment {
            risk_factors.extend(j.risk_factors.iter().cloned());
        }
        let value_assessment = judgment
            .map(|j| j.value_assessment)
            .unwrap_or_else(|| ValueAssessment::from_edge(edge));
        let league_tier = classify_league(&record.league);
        let hours_to_start = record.hours_to_start(now);

        let priority = priority_score(&ScoreInputs {
            edge,
            confidence: blended.confidence,
            value_assessment,
            league_tier,
            risk_factor_count: risk_factors.len(),
            hours_to_start,
        });

        let mut reasoning = vec![
            format!(
                "{} {} @ {:.2} ({}): model {:.1}% vs implied {:.1}%, edge {:+.2} pts",
                market,
                outcome,
                odds,
                bookmaker,
                blended.probability * 100.0,
                sizing.implied_probability * 100.0,
                edge * 100.0
            ),
            format!(
                "Kelly {:.2}% full, staking {:.2}% of bankroll ({:.2})",
                sizing.full_kelly * 100.0,
                sizing.stake_fraction * 100.0,
                sizing.stake_amount
            ),
            format!("League {:?}, kick-off in {:.1}h", league_tier, hours_to_start),
        ];
        if judgment.is_none() {
            reasoning.push(format!(
                "Statistical estimate only ({} bookmaker(s), {})",
                statistical.bookmakers,
                self.model.name()
            ));
        } else if let Some(j) = judgment.filter(|j| !j.reasoning.is_empty()) {
            reasoning.push(format!("Analyst: {}", j.reasoning));
        }

        let opportunity = Opportunity {
            id,
            match_id: record.match_id.clone(),
            sport: record.sport.clone(),
            league: record.league.clone(),
            event_name: record.event_name(),
            start_time: record.start_time,
            kind: OpportunityKind::Value {
                market: market.to_string(),
                outcome: outcome.to_string(),
                bookmaker: bookmaker.to_string(),
            },
            odds,
            probability: blended.probability,
            edge,
            relative_edge: kelly::edge(blended.probability, odds),
            confidence: blended.confidence,
            full_kelly: sizing.full_kelly,
            stake_fraction: sizing.stake_fraction,
            stake_amount: sizing.stake_amount,
            potential_profit: sizing.potential_profit,
            expected_roi: sizing.expected_roi,
            priority_score: priority,
            risk_level: classify_risk(blended.confidence, risk_factors.len(), odds),
            risk_factors,
            value_assessment,
            league_tier,
            reasoning,
            expires_at: self.expiry(record, self.config.opportunity_ttl, now),
            validation: None,
        };
        Candidate {
            opportunity,
            statistical,
        }
    }

    fn arbitrage_candidate(
        &self,
        record: &MatchRecord,
        set: ArbitrageSet,
        now: DateTime<Utc>,
    ) -> Candidate {
        let stake_fraction = self.config.sizing.max_risk_per_bet;
        // Combined odds of the whole set: payout per unit staked.
        let effective_odds = if set.total_stake > 0.0 {
            set.guaranteed_payout / set.total_stake
        } else {
            1.0 / (1.0 - set.margin)
        };
        let league_tier = classify_league(&record.league);
        let hours_to_start = record.hours_to_start(now);
        let value_assessment = ValueAssessment::from_edge(set.margin);
        let priority = priority_score(&ScoreInputs {
            edge: set.margin,
            confidence: 1.0,
            value_assessment,
            league_tier,
            risk_factor_count: 0,
            hours_to_start,
        });

        let legs = set
            .legs
            .iter()
            .map(|l| format!("{} @ {:.2} ({}) stake {:.2}", l.outcome, l.odds, l.bookmaker, l.stake))
            .collect::<Vec<_>>()
            .join(", ");
        let reasoning = vec![
            format!(
                "Arbitrage on {}: margin {:.2}%, guaranteed profit {:.2}%",
                set.market,
                set.margin * 100.0,
                set.profit_pct
            ),
            legs,
            "Prices may move before every leg is placed".to_string(),
        ];

        let opportunity = Opportunity {
            id: selection_key(&record.match_id, &set.market, "arbitrage"),
            match_id: record.match_id.clone(),
            sport: record.sport.clone(),
            league: record.league.clone(),
            event_name: record.event_name(),
            start_time: record.start_time,
            odds: effective_odds,
            probability: 1.0,
            edge: set.margin,
            relative_edge: effective_odds - 1.0,
            confidence: 1.0,
            full_kelly: 0.0,
            stake_fraction,
            stake_amount: set.total_stake,
            potential_profit: set.guaranteed_payout - set.total_stake,
            expected_roi: set.profit_pct * stake_fraction,
            priority_score: priority,
            risk_level: classify_risk(1.0, 0, effective_odds),
            risk_factors: Vec::new(),
            value_assessment,
            league_tier,
            reasoning,
            expires_at: self.expiry(record, self.config.arbitrage_ttl, now),
            validation: None,
            kind: OpportunityKind::Arbitrage(set),
        };
        Candidate {
            statistical: StatisticalEstimate {
                probability: 1.0,
                confidence: 1.0,
                bookmakers: 0,
            },
            opportunity,
        }
    }

    /// Every value selection and arbitrage set across upcoming records.
    fn candidates(
        &self,
        records: &[MatchRecord],
        judgments: &Judgments,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        let mut out = Vec::new();
        for record in records {
            if record.start_time <= now {
                debug!("Skipping {}: already started", record.match_id);
                continue;
            }
            for market in record.markets.keys() {
                for (outcome, bookmaker, odds) in best_prices(record, market) {
                    out.push(self.value_candidate(
                        record, market, &outcome, &bookmaker, odds, judgments, now,
                    ));
                }
                if let Some(set) = arbitrage::detect(record, market, self.config.sizing.max_stake())
                {
                    out.push(self.arbitrage_candidate(record, set, now));
                }
            }
        }
        out
    }

    fn passes_filters(&self, opp: &Opportunity) -> bool {
        opp.stake_amount > 0.0
            && opp.edge > 0.0
            && opp.confidence >= self.config.min_confidence
            && (opp.is_arbitrage() || opp.edge >= self.config.min_edge)
    }

    /// Second opinion used when the provider is absent or fails.
    fn fallback_judgment(candidate: &Candidate) -> ProbabilityJudgment {
        let opp = &candidate.opportunity;
        let stat_edge = candidate.statistical.probability - implied_probability(opp.odds);
        ProbabilityJudgment {
            probability: candidate.statistical.probability,
            confidence: candidate.statistical.confidence,
            risk_factors: opp.risk_factors.clone(),
            value_assessment: ValueAssessment::from_edge(stat_edge),
            reasoning: "statistical estimate".to_string(),
            cost: 0.0,
            provenance: Provenance::Statistical,
            premium: false,
        }
    }

    /// Run one pass over `fragments`.
    pub async fn run(
        &self,
        fragments: Vec<MatchFragment>,
        judgments: &Judgments,
        desk: Option<&SecondOpinionDesk>,
        now: DateTime<Utc>,
    ) -> ScreeningReport {
        let (records, merge_stats) = merge_fragments(fragments);
        info!(
            "Merged {} fragment(s) into {} record(s) ({} dropped, {} bad quote(s))",
            merge_stats.fragments_in,
            merge_stats.records_out,
            merge_stats.dropped_fragments,
            merge_stats.dropped_odds
        );

        let candidates = self.candidates(&records, judgments, now);
        let candidate_count = candidates.len();
        let (kept, dropped): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|c| self.passes_filters(&c.opportunity));
        let filtered_count = dropped.len();

        let thresholds = &self.config.thresholds;
        let validations = kept.into_iter().map(|candidate| async move {
            if !needs_validation(&candidate.opportunity, thresholds, now) {
                return candidate.opportunity.apply_validation(not_needed());
            }
            let fallback = Self::fallback_judgment(&candidate);
            let second = match desk {
                Some(desk) => desk.second_opinion(&candidate.opportunity, fallback).await,
                None => fallback,
            };
            let report = evaluate(&candidate.opportunity, &second);
            debug!(
                "Validated {}: {:?} (quality {:?})",
                candidate.opportunity.id, report.state, report.quality_score
            );
            candidate.opportunity.apply_validation(report)
        });
        let (mut accepted, rejected): (Vec<_>, Vec<_>) = join_all(validations)
            .await
            .into_iter()
            .partition(|o| o.stake_amount > 0.0);

        rank(&mut accepted, self.config.rank_by);
        let (opportunities, risk_summary) =
            select(accepted, &self.config.constraints, &self.config.correlation);

        info!(
            "Screening: {} candidate(s), {} filtered, {} rejected by validation, {} selected, total risk {:.2}%",
            candidate_count,
            filtered_count,
            rejected.len(),
            opportunities.len(),
            risk_summary.total_risk * 100.0
        );

        ScreeningReport {
            generated_at: now,
            opportunities,
            risk_summary,
            usage: desk.map(SecondOpinionDesk::usage).unwrap_or_default(),
            merge_stats,
            candidate_count,
            filtered_count,
            rejected_count: rejected.len(),
        }
    }
}
