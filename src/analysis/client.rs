use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::models::{Opportunity, OpportunityKind, ProbabilityJudgment};

/// Why an external judgment could not be obtained.
#[derive(Debug, Error)]
pub enum JudgmentError {
    #[error("rate limited by provider (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("provider timed out")]
    Timeout,
    #[error("provider returned HTTP {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed judgment: {0}")]
    Malformed(String),
}

/// What the provider is asked to judge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgmentRequest {
    pub selection_key: String,
    pub match_id: String,
    pub event_name: String,
    pub sport: String,
    pub league: String,
    pub market: String,
    pub outcome: String,
    pub odds: f64,
    pub start_time: DateTime<Utc>,
    pub preliminary_probability: f64,
    pub preliminary_edge: f64,
    /// Ask for the more expensive analysis tier.
    pub premium: bool,
}

impl JudgmentRequest {
    pub fn for_opportunity(opp: &Opportunity, premium: bool) -> Self {
        let (market, outcome) = match &opp.kind {
            OpportunityKind::Value {
                market, outcome, ..
            } => (market.clone(), outcome.clone()),
            OpportunityKind::Arbitrage(set) => (set.market.clone(), "arbitrage".to_string()),
        };
        JudgmentRequest {
            selection_key: opp.id.clone(),
            match_id: opp.match_id.clone(),
            event_name: opp.event_name.clone(),
            sport: opp.sport.clone(),
            league: opp.league.clone(),
            market,
            outcome,
            odds: opp.odds,
            start_time: opp.start_time,
            preliminary_probability: opp.probability,
            preliminary_edge: opp.edge,
            premium,
        }
    }

    /// Rough token cost of one call, used against the tokens-per-minute budget.
    pub fn estimated_tokens(&self) -> u32 {
        let prompt_chars = self.event_name.len()
            + self.league.len()
            + self.market.len()
            + self.outcome.len()
            + self.selection_key.len();
        let base = if self.premium { 1500 } else { 800 };
        base + (prompt_chars / 4) as u32
    }
}

/// Source of second opinions.
#[async_trait]
pub trait JudgmentProvider: Send + Sync {
    async fn judge(&self, request: &JudgmentRequest) -> Result<ProbabilityJudgment, JudgmentError>;

    fn name(&self) -> &str;
}

/// JSON-over-HTTP judgment provider.
///
/// POSTs the [`JudgmentRequest`] as JSON and expects a judgment object back
/// (`probability`, `confidence`, `risk_factors`, `value_assessment`,
/// `reasoning`, `cost`).
#[derive(Clone)]
pub struct HttpJudge {
    http: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpJudge {
    pub fn new(url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpJudge {
            http,
            url: url.to_string(),
            api_key,
        })
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl JudgmentProvider for HttpJudge {
    fn name(&self) -> &str {
        "http"
    }

    async fn judge(&self, request: &JudgmentRequest) -> Result<ProbabilityJudgment, JudgmentError> {
        debug!("Requesting judgment for {} from {}", request.selection_key, self.url);

        let mut builder = self.http.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                JudgmentError::Timeout
            } else {
                JudgmentError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(JudgmentError::RateLimited {
                retry_after: retry_after(resp.headers()),
            });
        }
        if !status.is_success() {
            return Err(JudgmentError::Status(status.as_u16()));
        }

        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| JudgmentError::Malformed(e.to_string()))?;
        let mut judgment = ProbabilityJudgment::from_value(&raw).ok_or_else(|| {
            JudgmentError::Malformed("missing or mistyped judgment fields".to_string())
        })?;
        judgment.premium |= request.premium;
        Ok(judgment)
    }
}
