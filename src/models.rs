use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Lowest decimal price a bookmaker quote may carry and still be usable.
pub const MIN_ODDS: f64 = 1.01;

/// bookmaker → outcome → decimal odds
pub type OddsBook = BTreeMap<String, BTreeMap<String, f64>>;

/// market → bookmaker → outcome → decimal odds
pub type MarketOdds = BTreeMap<String, OddsBook>;

/// Season record for one participant, as reported by a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamStats {
    #[serde(default)]
    pub played: u32,
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub draws: u32,
    #[serde(default)]
    pub losses: u32,
}

/// A partial match/odds record as delivered by one source.
///
/// Odds stay untyped (`serde_json::Value`) until the merger sanitises them so
/// that a single non-numeric quote only drops that quote, not the fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFragment {
    /// One source name (`"source"`) or several (`"sources"`).
    #[serde(default, alias = "source", deserialize_with = "one_or_many")]
    pub sources: Vec<String>,
    #[serde(default)]
    pub match_id: Option<String>,
    #[serde(default)]
    pub sport: String,
    #[serde(default)]
    pub league: String,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub away: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub markets: BTreeMap<String, BTreeMap<String, BTreeMap<String, Value>>>,
    #[serde(default)]
    pub stats: BTreeMap<String, TeamStats>,
    #[serde(default)]
    pub data_quality: Option<f64>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Canonical, merged record for one fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub sport: String,
    pub league: String,
    pub home: String,
    pub away: String,
    pub start_time: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
    pub markets: MarketOdds,
    pub stats: BTreeMap<String, TeamStats>,
    pub sources: Vec<String>,
    /// Data-quality score in [0, 1].
    pub data_quality: f64,
}

impl MatchRecord {
    pub fn event_name(&self) -> String {
        format!("{} vs {}", self.home, self.away)
    }

    /// Hours until kick-off; negative once the match has started.
    pub fn hours_to_start(&self, now: DateTime<Utc>) -> f64 {
        (self.start_time - now).num_seconds() as f64 / 3600.0
    }

    /// Map an outcome label onto the participant it backs, if any.
    /// `home`/`1` → home side, `away`/`2` → away side, a participant's own
    /// name → that participant. Draws and unknown labels return `None`.
    pub fn participant_for_outcome(&self, outcome: &str) -> Option<&str> {
        match outcome.trim().to_lowercase().as_str() {
            "home" | "1" => Some(&self.home),
            "away" | "2" => Some(&self.away),
            other if other == self.home.to_lowercase() => Some(&self.home),
            other if other == self.away.to_lowercase() => Some(&self.away),
            _ => None,
        }
    }

    /// All outcome labels quoted for a market across bookmakers.
    pub fn market_outcomes(&self, market: &str) -> Vec<String> {
        let mut outcomes: Vec<String> = self
            .markets
            .get(market)
            .map(|book| book.values().flat_map(|o| o.keys().cloned()).collect())
            .unwrap_or_default();
        outcomes.sort();
        outcomes.dedup();
        outcomes
    }
}

impl From<MatchRecord> for MatchFragment {
    fn from(record: MatchRecord) -> Self {
        let markets = record
            .markets
            .into_iter()
            .map(|(market, book)| {
                let book = book
                    .into_iter()
                    .map(|(bookmaker, outcomes)| {
                        let outcomes = outcomes
                            .into_iter()
                            .map(|(outcome, odds)| (outcome, Value::from(odds)))
                            .collect();
                        (bookmaker, outcomes)
                    })
                    .collect();
                (market, book)
            })
            .collect();
        MatchFragment {
            sources: record.sources,
            match_id: Some(record.match_id),
            sport: record.sport,
            league: record.league,
            home: Some(record.home),
            away: Some(record.away),
            start_time: record.start_time,
            last_updated: record.last_updated,
            markets,
            stats: record.stats,
            data_quality: Some(record.data_quality),
        }
    }
}

/// Where a probability judgment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Statistical,
    Ai,
}

/// Categorical favourability of a price relative to an estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueAssessment {
    StrongValue,
    ModerateValue,
    #[default]
    NoValue,
}

impl ValueAssessment {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(|c: char| c == ' ' || c == '-', "_").as_str() {
            "strong_value" | "strong" => Some(Self::StrongValue),
            "moderate_value" | "moderate" => Some(Self::ModerateValue),
            "no_value" | "none" | "no" => Some(Self::NoValue),
            _ => None,
        }
    }

    /// Assessment implied by an absolute edge when no external one exists.
    pub fn from_edge(edge: f64) -> Self {
        if edge >= 0.08 {
            Self::StrongValue
        } else if edge >= 0.03 {
            Self::ModerateValue
        } else {
            Self::NoValue
        }
    }
}

/// A probability estimate for one selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityJudgment {
    pub probability: f64,
    pub confidence: f64,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub value_assessment: ValueAssessment,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub cost: f64,
    pub provenance: Provenance,
    /// Produced by the more expensive analysis tier.
    #[serde(default)]
    pub premium: bool,
}

/// Numeric JSON value, or a string holding one. Non-finite values are rejected.
pub(crate) fn lenient_f64(v: &Value) -> Option<f64> {
    let x = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    x.is_finite().then_some(x)
}

impl ProbabilityJudgment {
    /// Parse an externally produced judgment. Returns `None` when any of
    /// `probability`, `confidence`, `risk_factors`, `value_assessment`,
    /// `reasoning` or `cost` is missing or mistyped, or the assessment is not
    /// a known label. Only `provenance` and `premium` are optional.
    /// Out-of-range numbers are clamped.
    pub fn from_value(v: &Value) -> Option<Self> {
        let probability = lenient_f64(v.get("probability")?)?.clamp(0.0, 1.0);
        let confidence = lenient_f64(v.get("confidence")?)?.clamp(0.0, 1.0);
        let risk_factors = v
            .get("risk_factors")?
            .as_array()?
            .iter()
            .map(|f| f.as_str().map(str::to_string))
            .collect::<Option<Vec<String>>>()?;
        let value_assessment = ValueAssessment::parse(v.get("value_assessment")?.as_str()?)?;
        let reasoning = v.get("reasoning")?.as_str()?.to_string();
        let cost = lenient_f64(v.get("cost")?)?.max(0.0);
        let provenance = match v.get("provenance").and_then(Value::as_str) {
            Some("statistical") => Provenance::Statistical,
            _ => Provenance::Ai,
        };
        let premium = v.get("premium").and_then(Value::as_bool).unwrap_or(false);
        Some(ProbabilityJudgment {
            probability,
            confidence,
            risk_factors,
            value_assessment,
            reasoning,
            cost,
            provenance,
            premium,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeagueTier {
    Tier1,
    Tier2,
    Tier3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One bet of an arbitrage set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageLeg {
    pub outcome: String,
    pub bookmaker: String,
    pub odds: f64,
    /// Share of the total stake placed on this leg.
    pub stake_share: f64,
    pub stake: f64,
}

/// Best-price combination covering every outcome of one market with a
/// guaranteed profit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageSet {
    pub market: String,
    pub legs: Vec<ArbitrageLeg>,
    /// `1 - Σ 1/odds`
    pub margin: f64,
    /// Guaranteed profit as a percentage of total stake.
    pub profit_pct: f64,
    pub total_stake: f64,
    /// Payout returned whichever outcome wins.
    pub guaranteed_payout: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpportunityKind {
    Value {
        market: String,
        outcome: String,
        bookmaker: String,
    },
    Arbitrage(ArbitrageSet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    NotNeeded,
    AcceptedFull,
    AcceptedReduced,
    AcceptedMinimal,
    Rejected,
}

/// Verdict of the second-opinion gate for one opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub state: ValidationState,
    /// Composite quality score in [0, 100]; `None` when not validated.
    pub quality_score: Option<f64>,
    /// Multiplier applied to the stake, in [0, 1].
    pub stake_multiplier: f64,
    /// Provenance of the judgment that was used as second opinion.
    pub second_opinion: Option<Provenance>,
    pub premium: bool,
}

/// A sized, scored betting opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    /// Selection key: `<match_id>/<market>/<outcome>` (outcome is `arbitrage`
    /// for arbitrage sets).
    pub id: String,
    pub match_id: String,
    pub sport: String,
    pub league: String,
    pub event_name: String,
    pub start_time: DateTime<Utc>,
    pub kind: OpportunityKind,
    /// Decimal odds taken (for arbitrage, the combined effective odds).
    pub odds: f64,
    pub probability: f64,
    /// `probability - 1/odds`, or the arbitrage margin.
    pub edge: f64,
    /// `probability * odds - 1`
    pub relative_edge: f64,
    pub confidence: f64,
    pub full_kelly: f64,
    pub stake_fraction: f64,
    pub stake_amount: f64,
    pub potential_profit: f64,
    pub expected_roi: f64,
    pub priority_score: f64,
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<String>,
    pub value_assessment: ValueAssessment,
    pub league_tier: LeagueTier,
    pub reasoning: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub validation: Option<ValidationReport>,
}

impl Opportunity {
    pub fn is_arbitrage(&self) -> bool {
        matches!(self.kind, OpportunityKind::Arbitrage(_))
    }

    /// Apply the gate's verdict. This is the only post-construction change an
    /// opportunity accepts; a second call leaves the value untouched.
    pub fn apply_validation(mut self, report: ValidationReport) -> Self {
        if self.validation.is_some() {
            return self;
        }
        let m = report.stake_multiplier.clamp(0.0, 1.0);
        if m < 1.0 {
            self.stake_fraction *= m;
            self.stake_amount *= m;
            self.potential_profit *= m;
            self.expected_roi *= m;
            if let OpportunityKind::Arbitrage(set) = &mut self.kind {
                set.total_stake *= m;
                set.guaranteed_payout *= m;
                for leg in &mut set.legs {
                    leg.stake *= m;
                }
            }
        }
        self.reasoning.push(match report.quality_score {
            Some(q) => format!(
                "Validation {:?}: quality {:.1}, stake x{:.2}",
                report.state, q, m
            ),
            None => "Validation not required".to_string(),
        });
        self.validation = Some(report);
        self
    }
}

/// Global and per-category exposure caps for one selection pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConstraints {
    pub max_total_risk_fraction: f64,
    pub max_per_category_fraction: f64,
    pub max_correlated_fraction: f64,
    pub max_opportunities_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRiskSummary {
    /// Sum of accepted stake fractions.
    pub total_risk: f64,
    pub total_stake: f64,
    /// Distinct sports selected / distinct sports among candidates.
    pub diversification_score: f64,
    pub risk_level: RiskLevel,
    pub sport_exposure: BTreeMap<String, f64>,
    pub selected: usize,
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn judgment_parses_and_clamps() {
        let j = ProbabilityJudgment::from_value(&json!({
            "probability": 1.4,
            "confidence": "0.7",
            "risk_factors": ["injury", "weather"],
            "value_assessment": "Strong Value",
            "reasoning": "form",
            "cost": 0.02,
            "premium": true
        }))
        .expect("judgment should parse");
        assert_relative_eq!(j.probability, 1.0);
        assert_relative_eq!(j.confidence, 0.7);
        assert_eq!(j.risk_factors, vec!["injury", "weather"]);
        assert_eq!(j.value_assessment, ValueAssessment::StrongValue);
        assert_eq!(j.provenance, Provenance::Ai);
        assert!(j.premium);
    }

    #[test]
    fn judgment_missing_probability_is_absent() {
        assert!(ProbabilityJudgment::from_value(&json!({"confidence": 0.8})).is_none());
        assert!(
            ProbabilityJudgment::from_value(&json!({"probability": "high", "confidence": 0.8}))
                .is_none()
        );
        assert!(ProbabilityJudgment::from_value(&json!("garbage")).is_none());
    }

    fn complete_judgment() -> Value {
        json!({
            "probability": 0.6,
            "confidence": 0.7,
            "risk_factors": ["injury"],
            "value_assessment": "moderate_value",
            "reasoning": "form",
            "cost": 0.01
        })
    }

    #[test]
    fn judgment_requires_every_field() {
        assert!(ProbabilityJudgment::from_value(&complete_judgment()).is_some());
        for field in [
            "probability",
            "confidence",
            "risk_factors",
            "value_assessment",
            "reasoning",
            "cost",
        ] {
            let mut raw = complete_judgment();
            raw.as_object_mut().unwrap().remove(field);
            assert!(
                ProbabilityJudgment::from_value(&raw).is_none(),
                "judgment without {} should be rejected",
                field
            );
        }
    }

    #[test]
    fn judgment_with_mistyped_fields_is_rejected() {
        for (field, bad) in [
            ("risk_factors", json!("injury")),
            ("risk_factors", json!(["injury", 3])),
            ("value_assessment", json!("excellent")),
            ("value_assessment", json!(1)),
            ("reasoning", json!(5)),
            ("cost", json!("x")),
        ] {
            let mut raw = complete_judgment();
            raw[field] = bad;
            assert!(
                ProbabilityJudgment::from_value(&raw).is_none(),
                "mistyped {} should be rejected",
                field
            );
        }
        let mut raw = complete_judgment();
        raw.as_object_mut().unwrap().remove("provenance");
        raw["premium"] = json!(true);
        let j = ProbabilityJudgment::from_value(&raw).expect("optional fields may vary");
        assert_eq!(j.provenance, Provenance::Ai);
        assert!(j.premium);
    }

    #[test]
    fn fragment_accepts_single_source() {
        let f: MatchFragment = serde_json::from_value(json!({
            "source": "flashscore",
            "sport": "soccer",
            "home": "A",
            "away": "B",
            "start_time": "2026-10-17T18:00:00Z",
            "unknown_field": 1
        }))
        .expect("fragment should parse");
        assert_eq!(f.sources, vec!["flashscore"]);
    }

    #[test]
    fn outcome_maps_to_participant() {
        let r = MatchRecord {
            match_id: "m".into(),
            sport: "soccer".into(),
            league: "x".into(),
            home: "Arsenal".into(),
            away: "Chelsea".into(),
            start_time: Utc::now(),
            last_updated: None,
            markets: MarketOdds::new(),
            stats: BTreeMap::new(),
            sources: vec![],
            data_quality: 1.0,
        };
        assert_eq!(r.participant_for_outcome("home"), Some("Arsenal"));
        assert_eq!(r.participant_for_outcome("2"), Some("Chelsea"));
        assert_eq!(r.participant_for_outcome("chelsea"), Some("Chelsea"));
        assert_eq!(r.participant_for_outcome("draw"), None);
    }
}
