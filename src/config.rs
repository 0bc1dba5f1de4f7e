use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::analysis::DeskConfig;
use crate::engine::{CorrelationPolicy, RankBy, ScreeningConfig, SizingConfig, ValidationThresholds};
use crate::models::PortfolioConstraints;

/// Sports value-bet and arbitrage screener
#[derive(Parser, Debug, Clone)]
#[command(name = "value-screener", version, about)]
pub struct Config {
    /// JSON array of match/odds fragments
    #[arg(long, env = "FRAGMENTS_PATH", default_value = "fragments.json")]
    pub fragments_path: PathBuf,

    /// JSON object of external judgments keyed by "<match_id>/<market>/<outcome>"
    #[arg(long, env = "JUDGMENTS_PATH")]
    pub judgments_path: Option<PathBuf>,

    /// Write the report here instead of stdout
    #[arg(long, env = "OUTPUT_PATH")]
    pub output_path: Option<PathBuf>,

    /// Bankroll stakes are sized against
    #[arg(long, env = "BANKROLL", default_value = "1000.0")]
    pub bankroll: f64,

    /// Fractional Kelly multiplier (0.0–1.0)
    #[arg(long, env = "KELLY_FRACTION", default_value = "0.25")]
    pub kelly_fraction: f64,

    /// Largest fraction of bankroll on a single bet
    #[arg(long, env = "MAX_RISK_PER_BET", default_value = "0.05")]
    pub max_risk_per_bet: f64,

    /// Largest fraction of bankroll across the whole portfolio
    #[arg(long, env = "MAX_PORTFOLIO_RISK", default_value = "0.20")]
    pub max_portfolio_risk: f64,

    /// Share of the portfolio cap one sport may use
    #[arg(long, env = "MAX_SPORT_CONCENTRATION", default_value = "0.5")]
    pub max_sport_concentration: f64,

    /// Share of the portfolio cap correlated exposure may use
    #[arg(long, env = "MAX_CORRELATION", default_value = "0.7")]
    pub max_correlation: f64,

    /// Most opportunities in one portfolio
    #[arg(long, env = "MAX_OPPORTUNITIES", default_value = "10")]
    pub max_opportunities: usize,

    /// Minimum absolute edge for a value bet (e.g. 0.02 = 2 points)
    #[arg(long, env = "MIN_EDGE", default_value = "0.02")]
    pub min_edge_threshold: f64,

    /// Minimum blended confidence
    #[arg(long, env = "MIN_CONFIDENCE", default_value = "0.55")]
    pub min_confidence_threshold: f64,

    /// Ranking key: priority or roi
    #[arg(long, env = "RANK_BY", default_value = "priority")]
    pub rank_by: RankBy,

    /// Correlation assumed between bets on the same match
    #[arg(long, env = "CORRELATION_SAME_MATCH", default_value = "1.0")]
    pub correlation_same_match: f64,

    /// Correlation assumed between bets in the same league
    #[arg(long, env = "CORRELATION_SAME_LEAGUE", default_value = "1.0")]
    pub correlation_same_league: f64,

    /// Correlation assumed between bets in the same sport
    #[arg(long, env = "CORRELATION_SAME_SPORT", default_value = "1.0")]
    pub correlation_same_sport: f64,

    /// Value-bet lifetime in minutes
    #[arg(long, env = "OPPORTUNITY_TTL_MINS", default_value = "30")]
    pub opportunity_ttl_mins: i64,

    /// Arbitrage lifetime in minutes
    #[arg(long, env = "ARBITRAGE_TTL_MINS", default_value = "5")]
    pub arbitrage_ttl_mins: i64,

    /// Stake (currency) at which a second opinion is required
    #[arg(long, env = "HIGH_STAKE_THRESHOLD", default_value = "100.0")]
    pub high_stake_threshold: f64,

    /// Edge at which a second opinion is required
    #[arg(long, env = "HIGH_EDGE_THRESHOLD", default_value = "0.10")]
    pub high_edge_threshold: f64,

    /// Confidence at which a second opinion is required
    #[arg(long, env = "CRITICAL_CONFIDENCE", default_value = "0.85")]
    pub critical_confidence_threshold: f64,

    /// Second-opinion endpoint; validation falls back to statistics without it
    #[arg(long, env = "JUDGE_URL")]
    pub judge_url: Option<String>,

    /// Bearer token for the second-opinion endpoint
    #[arg(long, env = "JUDGE_API_KEY")]
    pub judge_api_key: Option<String>,

    /// Request the premium analysis tier
    #[arg(long, env = "JUDGE_PREMIUM", default_value = "false")]
    pub judge_premium: bool,

    /// Per-request timeout in seconds
    #[arg(long, env = "JUDGE_TIMEOUT_SECS", default_value = "20")]
    pub judge_timeout_secs: u64,

    #[arg(long, env = "JUDGE_RPM", default_value = "30")]
    pub judge_requests_per_minute: u32,

    #[arg(long, env = "JUDGE_TPM", default_value = "40000")]
    pub judge_tokens_per_minute: u32,

    /// Retries after a rate-limit response
    #[arg(long, env = "JUDGE_MAX_RETRIES", default_value = "3")]
    pub judge_max_retries: u32,

    /// Base backoff delay in milliseconds, doubled per retry
    #[arg(long, env = "JUDGE_BACKOFF_MS", default_value = "500")]
    pub judge_backoff_ms: u64,

    /// Judgment cache lifetime in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "3600")]
    pub cache_ttl_secs: u64,

    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value = "10000")]
    pub cache_max_entries: usize,
}

fn check_fraction(name: &str, value: f64) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{} must be between 0.0 and 1.0 (got {})", name, value);
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_fraction("kelly_fraction", self.kelly_fraction)?;
        check_fraction("max_risk_per_bet", self.max_risk_per_bet)?;
        check_fraction("max_portfolio_risk", self.max_portfolio_risk)?;
        check_fraction("max_sport_concentration", self.max_sport_concentration)?;
        check_fraction("max_correlation", self.max_correlation)?;
        check_fraction("min_confidence_threshold", self.min_confidence_threshold)?;
        check_fraction("correlation_same_match", self.correlation_same_match)?;
        check_fraction("correlation_same_league", self.correlation_same_league)?;
        check_fraction("correlation_same_sport", self.correlation_same_sport)?;
        check_fraction("critical_confidence_threshold", self.critical_confidence_threshold)?;

        if !self.bankroll.is_finite() || self.bankroll <= 0.0 {
            anyhow::bail!("bankroll must be positive (got {})", self.bankroll);
        }
        if !self.min_edge_threshold.is_finite() || self.min_edge_threshold < 0.0 {
            anyhow::bail!("min_edge_threshold must be non-negative");
        }
        if self.high_stake_threshold < 0.0 || self.high_edge_threshold < 0.0 {
            anyhow::bail!("high_stake_threshold and high_edge_threshold must be non-negative");
        }
        if self.max_opportunities == 0 {
            anyhow::bail!("max_opportunities must be at least 1");
        }
        if self.opportunity_ttl_mins <= 0 || self.arbitrage_ttl_mins <= 0 {
            anyhow::bail!("opportunity_ttl_mins and arbitrage_ttl_mins must be positive");
        }
        if self.judge_requests_per_minute == 0 {
            anyhow::bail!("judge_requests_per_minute must be at least 1");
        }
        if self.judge_tokens_per_minute == 0 {
            anyhow::bail!("judge_tokens_per_minute must be at least 1");
        }
        if self.cache_max_entries == 0 {
            anyhow::bail!("cache_max_entries must be at least 1");
        }
        if let Some(raw) = &self.judge_url {
            let url = url::Url::parse(raw)
                .map_err(|e| anyhow::anyhow!("judge_url is not a valid URL: {}", e))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("judge_url must use http or https (got {})", url.scheme());
            }
        }
        Ok(())
    }

    pub fn sizing(&self) -> SizingConfig {
        SizingConfig {
            kelly_fraction: self.kelly_fraction,
            max_risk_per_bet: self.max_risk_per_bet,
            bankroll: self.bankroll,
        }
    }

    pub fn constraints(&self) -> PortfolioConstraints {
        PortfolioConstraints {
            max_total_risk_fraction: self.max_portfolio_risk,
            max_per_category_fraction: self.max_portfolio_risk * self.max_sport_concentration,
            max_correlated_fraction: self.max_portfolio_risk * self.max_correlation,
            max_opportunities_count: self.max_opportunities,
        }
    }

    pub fn correlation(&self) -> CorrelationPolicy {
        CorrelationPolicy {
            same_match: self.correlation_same_match,
            same_league: self.correlation_same_league,
            same_sport: self.correlation_same_sport,
        }
    }

    pub fn thresholds(&self) -> ValidationThresholds {
        ValidationThresholds {
            high_stake: self.high_stake_threshold,
            high_edge: self.high_edge_threshold,
            critical_confidence: self.critical_confidence_threshold,
            ..ValidationThresholds::default()
        }
    }

    pub fn screening(&self) -> ScreeningConfig {
        ScreeningConfig {
            sizing: self.sizing(),
            constraints: self.constraints(),
            correlation: self.correlation(),
            thresholds: self.thresholds(),
            min_edge: self.min_edge_threshold,
            min_confidence: self.min_confidence_threshold,
            rank_by: self.rank_by,
            opportunity_ttl: chrono::Duration::minutes(self.opportunity_ttl_mins),
            arbitrage_ttl: chrono::Duration::minutes(self.arbitrage_ttl_mins),
        }
    }

    pub fn desk(&self) -> DeskConfig {
        DeskConfig {
            premium: self.judge_premium,
            request_timeout: Duration::from_secs(self.judge_timeout_secs),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            cache_max_entries: self.cache_max_entries,
            requests_per_minute: self.judge_requests_per_minute,
            tokens_per_minute: self.judge_tokens_per_minute,
            max_retries: self.judge_max_retries,
            backoff_base: Duration::from_millis(self.judge_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["value-screener"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).expect("arguments should parse")
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = parse(&[]);
        config.validate().expect("defaults must validate");
        let constraints = config.constraints();
        assert_relative_eq!(constraints.max_per_category_fraction, 0.10, epsilon = 1e-12);
        assert_relative_eq!(constraints.max_correlated_fraction, 0.14, epsilon = 1e-12);
        assert_eq!(config.rank_by, RankBy::Priority);
        assert_relative_eq!(config.sizing().max_stake(), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_errors_name_the_field() {
        let err = parse(&["--kelly-fraction", "1.5"]).validate().unwrap_err();
        assert!(err.to_string().contains("kelly_fraction"));

        let err = parse(&["--bankroll=-10"]).validate().unwrap_err();
        assert!(err.to_string().contains("bankroll"));

        let err = parse(&["--max-opportunities", "0"]).validate().unwrap_err();
        assert!(err.to_string().contains("max_opportunities"));

        let err = parse(&["--judge-url", "ftp://example.com"]).validate().unwrap_err();
        assert!(err.to_string().contains("judge_url"));
    }

    #[test]
    fn test_rank_by_parses() {
        assert_eq!(parse(&["--rank-by", "roi"]).rank_by, RankBy::Roi);
        assert!(Config::try_parse_from(["value-screener", "--rank-by", "volume"]).is_err());
    }
}
