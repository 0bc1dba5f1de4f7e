/// Kelly Criterion stake sizing for decimal-odds bets.
///
/// The Kelly formula sizes a bet to maximise the expected logarithm of wealth,
/// which balances risk and reward optimally over the long run.
///
/// Standard formula:
///   f* = (b·p − q) / b
/// where
///   b  = net odds received on the bet (decimal odds − 1)
///   p  = estimated probability of winning
///   q  = 1 − p  (probability of losing)
///
/// We apply a *fractional* Kelly multiplier (0 < multiplier ≤ 1) to reduce
/// variance at the cost of slightly lower expected growth, then hard-cap the
/// result at the per-bet risk limit.
use crate::models::MIN_ODDS;

/// Bankroll and caps the sizer works against. Read-only during a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingConfig {
    /// Fractional Kelly multiplier (0.0–1.0).
    pub kelly_fraction: f64,
    /// Largest fraction of bankroll a single bet may take.
    pub max_risk_per_bet: f64,
    pub bankroll: f64,
}

impl SizingConfig {
    /// Largest stake, in currency, any single bet may carry.
    pub fn max_stake(&self) -> f64 {
        self.max_risk_per_bet * self.bankroll
    }
}

/// Full sizing breakdown for one bet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StakeSizing {
    pub implied_probability: f64,
    /// Unscaled Kelly fraction, floored at zero.
    pub full_kelly: f64,
    /// Fraction of bankroll after the Kelly multiplier and per-bet cap.
    pub stake_fraction: f64,
    pub stake_amount: f64,
    /// Net profit if the bet wins.
    pub potential_profit: f64,
    /// Expected return on bankroll, in percent.
    pub expected_roi: f64,
}

/// Bookmaker-implied probability of decimal odds.
pub fn implied_probability(odds: f64) -> f64 {
    if odds <= 0.0 || !odds.is_finite() {
        return 0.0;
    }
    1.0 / odds
}

/// Relative edge (expected profit per unit staked).
///
/// Edge = win_prob × odds − 1
///
/// Positive edge means the bookmaker is underpricing the true probability.
pub fn edge(win_prob: f64, odds: f64) -> f64 {
    if odds <= 0.0 {
        return 0.0;
    }
    win_prob * odds - 1.0
}

/// Unscaled Kelly fraction. Returns `0.0` when expected value is
/// non-positive, when the price is at or below the minimum usable odds, or
/// when the probability is zero.
pub fn full_kelly(win_prob: f64, odds: f64) -> f64 {
    let p = if win_prob.is_nan() { 0.0 } else { win_prob.clamp(0.0, 1.0) };
    if !odds.is_finite() || odds <= MIN_ODDS || p <= 0.0 {
        return 0.0;
    }

    // Net odds per unit staked (e.g. odds=2.5 → b=1.5, meaning 1.5x profit)
    let b = odds - 1.0;
    let q = 1.0 - p;

    let f = (b * p - q) / b;

    if f <= 0.0 {
        return 0.0; // no edge
    }
    f.min(1.0)
}

/// Expected return on bankroll in percent for a given stake fraction.
pub fn expected_roi(win_prob: f64, odds: f64, stake_fraction: f64) -> f64 {
    ((odds - 1.0) * win_prob - (1.0 - win_prob)) * stake_fraction * 100.0
}

/// Size one bet: fractional Kelly, capped at `max_risk_per_bet`.
pub fn size_stake(win_prob: f64, odds: f64, config: &SizingConfig) -> StakeSizing {
    let kelly = full_kelly(win_prob, odds);
    let stake_fraction = (kelly * config.kelly_fraction)
        .min(config.max_risk_per_bet)
        .max(0.0);
    let stake_amount = stake_fraction * config.bankroll;
    let potential_profit = if odds > 1.0 {
        stake_amount * (odds - 1.0)
    } else {
        0.0
    };
    StakeSizing {
        implied_probability: implied_probability(odds),
        full_kelly: kelly,
        stake_fraction,
        stake_amount,
        potential_profit,
        expected_roi: expected_roi(win_prob, odds, stake_fraction),
    }
}
