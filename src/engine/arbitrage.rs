//! Cross-bookmaker arbitrage detection.
//!
//! For each market the best price per outcome is taken across bookmakers.
//! When the inverse prices sum to less than one, staking every outcome in
//! proportion to its inverse price returns the same payout whichever outcome
//! wins, and that payout exceeds the total stake.

use tracing::debug;

use crate::models::{ArbitrageLeg, ArbitrageSet, MatchRecord, MIN_ODDS};

/// Best quote per outcome: `(outcome, bookmaker, odds)`, outcome-sorted.
/// Ties keep the bookmaker that sorts first.
pub fn best_prices(record: &MatchRecord, market: &str) -> Vec<(String, String, f64)> {
    let Some(book) = record.markets.get(market) else {
        return Vec::new();
    };
    record
        .market_outcomes(market)
        .into_iter()
        .filter_map(|outcome| {
            book.iter()
                .filter_map(|(bookmaker, quotes)| {
                    quotes
                        .get(&outcome)
                        .filter(|odds| odds.is_finite() && **odds >= MIN_ODDS)
                        .map(|odds| (bookmaker, *odds))
                })
                .fold(None::<(&String, f64)>, |best, (bookmaker, odds)| match best {
                    Some((_, best_odds)) if best_odds >= odds => best,
                    _ => Some((bookmaker, odds)),
                })
                .map(|(bookmaker, odds)| (outcome, bookmaker.clone(), odds))
        })
        .collect()
}

/// `1 - Σ 1/odds`; positive means an arbitrage exists.
pub fn margin(odds: &[f64]) -> f64 {
    1.0 - odds.iter().map(|o| 1.0 / o).sum::<f64>()
}

/// Guaranteed profit, as a percentage of total stake, for a given margin.
pub fn profit_pct(margin: f64) -> f64 {
    if margin >= 1.0 {
        return 0.0;
    }
    margin / (1.0 - margin) * 100.0
}

/// Whether some bookmaker prices every outcome seen for the market, so the
/// outcome set is known to be the full market.
fn market_is_attested(record: &MatchRecord, market: &str, outcomes: &[String]) -> bool {
    record.markets.get(market).is_some_and(|book| {
        book.values().any(|quotes| {
            outcomes.iter().all(|o| {
                quotes
                    .get(o)
                    .is_some_and(|odds| odds.is_finite() && *odds >= MIN_ODDS)
            })
        })
    })
}

/// Arbitrage for one market, staked with `total_stake`. `None` when fewer
/// than two outcomes are priced, no bookmaker quotes the full market, the
/// best prices all come from one bookmaker, or they leave no margin.
pub fn detect(record: &MatchRecord, market: &str, total_stake: f64) -> Option<ArbitrageSet> {
    let prices = best_prices(record, market);
    if prices.len() < 2 {
        return None;
    }
    let outcomes = record.market_outcomes(market);
    if prices.len() != outcomes.len() || !market_is_attested(record, market, &outcomes) {
        return None;
    }
    let first_book = &prices[0].1;
    if prices.iter().all(|(_, b, _)| b == first_book) {
        return None;
    }
    let odds: Vec<f64> = prices.iter().map(|(_, _, o)| *o).collect();
    let margin = margin(&odds);
    if margin <= 0.0 {
        return None;
    }
    let inverse_sum: f64 = odds.iter().map(|o| 1.0 / o).sum();
    let total_stake = total_stake.max(0.0);

    let legs: Vec<ArbitrageLeg> = prices
        .into_iter()
        .map(|(outcome, bookmaker, odds)| {
            let stake_share = (1.0 / odds) / inverse_sum;
            ArbitrageLeg {
                outcome,
                bookmaker,
                odds,
                stake_share,
                stake: total_stake * stake_share,
            }
        })
        .collect();

    debug!(
        "Arbitrage on {} {}: margin {:.4} across {} legs",
        record.match_id,
        market,
        margin,
        legs.len()
    );

    Some(ArbitrageSet {
        market: market.to_string(),
        legs,
        margin,
        profit_pct: profit_pct(margin),
        total_stake,
        guaranteed_payout: total_stake / inverse_sum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketOdds;
    use approx::assert_relative_eq;
    use chrono::Utc;
    use std::collections::BTreeMap;

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
            match_id: "soccer:a:b:2026-10-17".into(),
            sport: "soccer".into(),
            league: "Serie B".into(),
            home: "A".into(),
            away: "B".into(),
            start_time: Utc::now(),
            last_updated: None,
            markets,
            stats: BTreeMap::new(),
            sources: vec![],
            data_quality: 1.0,
        }
    }

    #[test]
    fn overround_market_has_no_arbitrage() {
        // 1/2.10 + 1/3.40 + 1/4.00 ≈ 1.020
        let r = record(&[("b1", &[("home", 2.10), ("draw", 3.40), ("away", 4.00)])]);
        assert!(detect(&r, "h2h", 100.0).is_none());
    }

    #[test]
    fn best_prices_across_books_form_an_arbitrage() {
        let r = record(&[
            ("b1", &[("home", 2.10), ("draw", 3.40), ("away", 4.00)]),
            ("b2", &[("home", 2.30), ("draw", 3.60), ("away", 3.50)]),
            ("b3", &[("home", 1.90), ("draw", 3.80), ("away", 4.40)]),
        ]);
        let set = detect(&r, "h2h", 100.0).expect("arbitrage expected");
        assert!(set.margin > 0.0);
        assert_eq!(set.legs.len(), 3);

        let by_outcome: BTreeMap<_, _> =
            set.legs.iter().map(|l| (l.outcome.as_str(), l)).collect();
        assert_eq!(by_outcome["home"].bookmaker, "b2");
        assert_eq!(by_outcome["draw"].bookmaker, "b3");
        assert_eq!(by_outcome["away"].bookmaker, "b3");

        let stake_total: f64 = set.legs.iter().map(|l| l.stake).sum();
        assert_relative_eq!(stake_total, 100.0, epsilon = 1e-9);
        for leg in &set.legs {
            assert_relative_eq!(leg.stake * leg.odds, set.guaranteed_payout, epsilon = 1e-9);
        }
        assert!(set.guaranteed_payout > set.total_stake);
        assert_relative_eq!(
            set.guaranteed_payout / set.total_stake - 1.0,
            set.profit_pct / 100.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn single_outcome_is_not_an_arbitrage() {
        let r = record(&[("b1", &[("home", 50.0)])]);
        assert!(detect(&r, "h2h", 100.0).is_none());
        assert!(detect(&r, "missing", 100.0).is_none());
    }

    #[test]
    fn tied_prices_keep_first_bookmaker() {
        let r = record(&[
            ("alpha", &[("home", 2.2), ("away", 2.2)]),
            ("beta", &[("home", 2.2), ("away", 2.2)]),
        ]);
        let prices = best_prices(&r, "h2h");
        assert!(prices.iter().all(|(_, b, _)| b == "alpha"));
        assert_relative_eq!(
            margin(&prices.iter().map(|(_, _, o)| *o).collect::<Vec<_>>()),
            1.0 - 2.0 / 2.2,
            epsilon = 1e-12
        );
    }

    #[test]
    fn single_bookmaker_is_never_an_arbitrage() {
        let r = record(&[("b1", &[("home", 2.5), ("away", 3.0)])]);
        assert!(detect(&r, "h2h", 100.0).is_none());

        let r = record(&[
            ("alpha", &[("home", 2.2), ("away", 2.2)]),
            ("beta", &[("home", 2.1), ("away", 2.1)]),
        ]);
        assert!(detect(&r, "h2h", 100.0).is_none());
    }

    #[test]
    fn outcomes_must_be_covered_by_a_full_market_quote() {
        // No book prices all of home/draw/away.
        let r = record(&[
            ("b1", &[("home", 2.5), ("draw", 4.0)]),
            ("b2", &[("away", 3.0), ("draw", 3.0)]),
        ]);
        assert!(detect(&r, "h2h", 100.0).is_none());

        // b2 attests the three-way market; b1 only adds a better home price.
        let r = record(&[
            ("b1", &[("home", 2.5), ("away", 3.0)]),
            ("b2", &[("home", 2.0), ("draw", 3.9), ("away", 4.0)]),
        ]);
        let set = detect(&r, "h2h", 100.0).expect("cross-book three-way arbitrage");
        assert_eq!(set.legs.len(), 3);
        let books: std::collections::BTreeSet<_> =
            set.legs.iter().map(|l| l.bookmaker.as_str()).collect();
        assert_eq!(books.len(), 2);
    }

    #[test]
    fn profit_pct_formula() {
        assert_relative_eq!(profit_pct(0.05), 0.05 / 0.95 * 100.0, epsilon = 1e-12);
        assert_eq!(profit_pct(1.0), 0.0);
    }
}
