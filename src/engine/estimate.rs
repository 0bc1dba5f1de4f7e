//! Statistical probability estimates.
//!
//! The engine does not predict matches from first principles; it needs a
//! baseline probability per selection to measure prices against. The default
//! [`ConsensusModel`] takes the margin-free price consensus of every
//! bookmaker quoting the full market, then nudges it with season form when
//! both sides have played enough matches for their record to mean anything.
//!
//! Any other estimator (ELO, ratings feed, ...) plugs in through
//! [`ProbabilityModel`].

use std::collections::BTreeMap;

use crate::models::{MatchRecord, TeamStats};

/// Matches a side must have played before its record moves the estimate.
pub const MIN_FORM_SAMPLE: u32 = 5;
/// Form rating assumed when the sample is too small.
const NEUTRAL_FORM: f64 = 0.5;
/// Probability shifted per unit of form-rating difference.
const FORM_WEIGHT: f64 = 0.10;
/// Cross-book standard deviation at which agreement counts as zero.
const DISAGREEMENT_SCALE: f64 = 0.05;
/// Bookmaker count at which coverage saturates.
const FULL_COVERAGE_BOOKS: usize = 5;

/// Baseline probability for one selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatisticalEstimate {
    pub probability: f64,
    /// Confidence in [0, 1]; zero for the neutral fallback.
    pub confidence: f64,
    /// Bookmakers that contributed to the consensus.
    pub bookmakers: usize,
}

impl StatisticalEstimate {
    /// Returned when there is nothing to estimate from: uniform over the
    /// market's outcomes, with no confidence.
    pub fn neutral(outcomes: usize) -> Self {
        let probability = if outcomes >= 2 {
            1.0 / outcomes as f64
        } else {
            0.5
        };
        StatisticalEstimate {
            probability,
            confidence: 0.0,
            bookmakers: 0,
        }
    }
}

/// Source of the statistical side of the blend.
pub trait ProbabilityModel: Send + Sync {
    fn estimate(&self, record: &MatchRecord, market: &str, outcome: &str) -> StatisticalEstimate;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Margin-free bookmaker consensus with a form adjustment.
#[derive(Debug, Clone, Default)]
pub struct ConsensusModel;

/// Points-per-match style rating in [0, 1]; draws count half.
fn form_rating(stats: Option<&TeamStats>) -> f64 {
    match stats {
        Some(s) if s.played >= MIN_FORM_SAMPLE => {
            ((s.wins as f64 + 0.5 * s.draws as f64) / s.played as f64).clamp(0.0, 1.0)
        }
        _ => NEUTRAL_FORM,
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64).sqrt()
}

impl ConsensusModel {
    /// Per-bookmaker fair probabilities for every outcome, from books that
    /// quote the whole market.
    fn fair_samples(record: &MatchRecord, market: &str) -> BTreeMap<String, Vec<f64>> {
        let outcomes = record.market_outcomes(market);
        let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        if outcomes.len() < 2 {
            return samples;
        }
        let Some(book) = record.markets.get(market) else {
            return samples;
        };
        for quotes in book.values() {
            let prices: Option<Vec<f64>> =
                outcomes.iter().map(|o| quotes.get(o).copied()).collect();
            let Some(prices) = prices else {
                continue;
            };
            let overround: f64 = prices.iter().map(|p| 1.0 / p).sum();
            if overround <= 0.0 || !overround.is_finite() {
                continue;
            }
            for (outcome, price) in outcomes.iter().zip(prices) {
                samples
                    .entry(outcome.clone())
                    .or_default()
                    .push((1.0 / price) / overround);
            }
        }
        samples
    }

    /// Move probability mass between the two sides according to form.
    /// Draw mass is untouched and no probability leaves [0, 1].
    fn apply_form(record: &MatchRecord, probs: &mut BTreeMap<String, f64>) {
        let side = |target: &str| {
            probs
                .keys()
                .find(|o| record.participant_for_outcome(o) == Some(target))
                .cloned()
        };
        let (Some(home_key), Some(away_key)) = (side(&record.home), side(&record.away)) else {
            return;
        };
        let home_rating = form_rating(record.stats.get(&record.home));
        let away_rating = form_rating(record.stats.get(&record.away));
        let p_home = probs[&home_key];
        let p_away = probs[&away_key];
        let shift = (FORM_WEIGHT * (home_rating - away_rating)).clamp(-p_home, p_away);
        probs.insert(home_key, p_home + shift);
        probs.insert(away_key, p_away - shift);
    }
}

impl ProbabilityModel for ConsensusModel {
    fn name(&self) -> &str {
        "consensus"
    }

    fn estimate(&self, record: &MatchRecord, market: &str, outcome: &str) -> StatisticalEstimate {
        let outcomes = record.market_outcomes(market);
        let samples = Self::fair_samples(record, market);
        let Some(own) = samples.get(outcome) else {
            return StatisticalEstimate::neutral(outcomes.len());
        };

        let mut probs: BTreeMap<String, f64> =
            samples.iter().map(|(o, xs)| (o.clone(), mean(xs))).collect();
        Self::apply_form(record, &mut probs);

        let bookmakers = own.len();
        let coverage = bookmakers.min(FULL_COVERAGE_BOOKS) as f64 / FULL_COVERAGE_BOOKS as f64;
        let agreement = 1.0 - (std_dev(own) / DISAGREEMENT_SCALE).min(1.0);
        let confidence = (0.4 * coverage + 0.3 * agreement + 0.3 * record.data_quality)
            .clamp(0.0, 1.0);

        StatisticalEstimate {
            probability: probs[outcome].clamp(0.0, 1.0),
            confidence,
            bookmakers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketOdds;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn record(books: &[(&str, &[(&str, f64)])]) -> MatchRecord {
        let mut markets = MarketOdds::new();
        let book = markets.entry("h2h".to_string()).or_default();
        for (name, quotes) in books {
            book.insert(
                name.to_string(),
                quotes.iter().map(|(o, p)| (o.to_string(), *p)).collect(),
            );
        }
        MatchRecord {
            match_id: "m".into(),
            sport: "soccer".into(),
            league: "Championship".into(),
            home: "Leeds".into(),
            away: "Hull".into(),
            start_time: Utc::now(),
            last_updated: None,
            markets,
            stats: BTreeMap::new(),
            sources: vec!["s".into()],
            data_quality: 1.0,
        }
    }

    #[test]
    fn consensus_removes_bookmaker_margin() {
        let r = record(&[("b1", &[("home", 1.9), ("away", 1.9)])]);
        let model = ConsensusModel;
        let home = model.estimate(&r, "h2h", "home");
        let away = model.estimate(&r, "h2h", "away");
        assert_relative_eq!(home.probability, 0.5, epsilon = 1e-9);
        assert_relative_eq!(home.probability + away.probability, 1.0, epsilon = 1e-9);
        assert_eq!(home.bookmakers, 1);
    }

    #[test]
    fn three_way_market_sums_to_one() {
        let r = record(&[
            ("b1", &[("home", 2.1), ("draw", 3.4), ("away", 3.6)]),
            ("b2", &[("home", 2.2), ("draw", 3.3), ("away", 3.4)]),
        ]);
        let model = ConsensusModel;
        let total: f64 = ["home", "draw", "away"]
            .iter()
            .map(|o| model.estimate(&r, "h2h", o).probability)
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn incomplete_books_fall_back_to_neutral() {
        let r = record(&[("b1", &[("home", 2.0)]), ("b2", &[("away", 2.0)])]);
        let est = ConsensusModel.estimate(&r, "h2h", "home");
        assert_eq!(est, StatisticalEstimate::neutral(2));
        assert_eq!(est.confidence, 0.0);
        assert_relative_eq!(est.probability, 0.5);
    }

    #[test]
    fn unknown_market_is_neutral() {
        let r = record(&[("b1", &[("home", 2.0), ("away", 2.0)])]);
        let est = ConsensusModel.estimate(&r, "totals", "over");
        assert_eq!(est.confidence, 0.0);
    }

    #[test]
    fn agreeing_books_raise_confidence() {
        let one = record(&[("b1", &[("home", 2.0), ("away", 2.0)])]);
        let many = record(&[
            ("b1", &[("home", 2.0), ("away", 2.0)]),
            ("b2", &[("home", 2.02), ("away", 1.98)]),
            ("b3", &[("home", 1.98), ("away", 2.02)]),
            ("b4", &[("home", 2.0), ("away", 2.0)]),
        ]);
        let a = ConsensusModel.estimate(&one, "h2h", "home");
        let b = ConsensusModel.estimate(&many, "h2h", "home");
        assert!(b.confidence > a.confidence);
    }

    #[test]
    fn form_shifts_mass_only_with_enough_matches() {
        let mut r = record(&[("b1", &[("home", 2.0), ("draw", 4.0), ("away", 4.0)])]);
        let base = ConsensusModel.estimate(&r, "h2h", "home").probability;

        r.stats.insert("Leeds".into(), TeamStats { played: 3, wins: 3, draws: 0, losses: 0 });
        r.stats.insert("Hull".into(), TeamStats { played: 3, wins: 0, draws: 0, losses: 3 });
        let small_sample = ConsensusModel.estimate(&r, "h2h", "home").probability;
        assert_relative_eq!(small_sample, base, epsilon = 1e-12);

        r.stats.insert("Leeds".into(), TeamStats { played: 10, wins: 8, draws: 2, losses: 0 });
        r.stats.insert("Hull".into(), TeamStats { played: 10, wins: 2, draws: 2, losses: 6 });
        let home = ConsensusModel.estimate(&r, "h2h", "home").probability;
        let draw = ConsensusModel.estimate(&r, "h2h", "draw").probability;
        let away = ConsensusModel.estimate(&r, "h2h", "away").probability;
        assert!(home > base);
        assert_relative_eq!(draw, 0.25, epsilon = 1e-9);
        assert_relative_eq!(home + draw + away, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn form_rating_defaults_to_neutral() {
        assert_eq!(form_rating(None), NEUTRAL_FORM);
        let s = TeamStats { played: 4, wins: 4, draws: 0, losses: 0 };
        assert_eq!(form_rating(Some(&s)), NEUTRAL_FORM);
    }
}
