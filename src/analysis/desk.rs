use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::budget::CallBudget;
use super::cache::{CacheKey, JudgmentCache};
use super::client::{JudgmentError, JudgmentProvider, JudgmentRequest};
use super::usage::{UsageSnapshot, UsageStats};
use crate::models::{Opportunity, ProbabilityJudgment};

/// Settings for the second-opinion desk.
#[derive(Debug, Clone, PartialEq)]
pub struct DeskConfig {
    /// Ask the provider for its premium tier.
    pub premium: bool,
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for DeskConfig {
    fn default() -> Self {
        DeskConfig {
            premium: false,
            request_timeout: Duration::from_secs(20),
            cache_ttl: Duration::from_secs(3600),
            cache_max_entries: 10_000,
            requests_per_minute: 30,
            tokens_per_minute: 40_000,
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// Holds the external provider open for one screening batch, with the cache,
/// call budget and usage counters around it. Dropping the desk releases the
/// provider; [`SecondOpinionDesk::close`] does the same and returns usage.
pub struct SecondOpinionDesk {
    provider: Arc<dyn JudgmentProvider>,
    cache: JudgmentCache,
    budget: CallBudget,
    usage: UsageStats,
    config: DeskConfig,
}

impl SecondOpinionDesk {
    pub fn new(provider: Arc<dyn JudgmentProvider>, config: DeskConfig) -> Self {
        let cache = JudgmentCache::new(config.cache_ttl, config.cache_max_entries);
        let budget = CallBudget::new(
            config.requests_per_minute,
            config.tokens_per_minute,
            config.max_retries,
            config.backoff_base,
        );
        SecondOpinionDesk {
            provider,
            cache,
            budget,
            usage: UsageStats::default(),
            config,
        }
    }

    /// Second opinion for `opp`. Never fails: timeouts, provider errors and
    /// exhausted retries return `fallback` instead.
    pub async fn second_opinion(
        &self,
        opp: &Opportunity,
        fallback: ProbabilityJudgment,
    ) -> ProbabilityJudgment {
        self.usage.record_request();
        let key = CacheKey::new(&opp.match_id, &opp.id, opp.odds);
        if let Some(hit) = self.cache.get(&key).await {
            debug!("Judgment cache hit for {}", opp.id);
            self.usage.record_hit();
            return hit;
        }
        self.usage.record_miss();

        let request = JudgmentRequest::for_opportunity(opp, self.config.premium);
        let tokens = request.estimated_tokens();
        let mut attempt = 0u32;
        loop {
            self.budget.acquire(tokens).await;
            let outcome =
                tokio::time::timeout(self.config.request_timeout, self.provider.judge(&request))
                    .await
                    .unwrap_or(Err(JudgmentError::Timeout));

            match outcome {
                Ok(judgment) => {
                    self.usage.add_cost(judgment.cost);
                    self.cache.insert(key, judgment.clone()).await;
                    return judgment;
                }
                Err(JudgmentError::RateLimited { retry_after })
                    if attempt < self.budget.max_retries() =>
                {
                    let delay = self.budget.backoff(attempt, retry_after);
                    warn!(
                        "{} rate limited on {} (attempt {}), backing off {:?}",
                        self.provider.name(),
                        opp.id,
                        attempt + 1,
                        delay
                    );
                    self.usage.record_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        "Second opinion for {} failed ({}); using statistical judgment",
                        opp.id, e
                    );
                    self.usage.record_failure();
                    self.usage.record_fallback();
                    return fallback;
                }
            }
        }
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.usage.snapshot()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// End the batch, releasing the provider.
    pub fn close(self) -> UsageSnapshot {
        self.usage.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        LeagueTier, OpportunityKind, Provenance, RiskLevel, ValueAssessment,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Step {
        Answer(f64),
        RateLimited,
        Malformed,
        Hang,
    }

    struct ScriptedProvider {
        steps: Mutex<VecDeque<Step>>,
        last: Step,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            let last = steps.last().cloned().unwrap_or(Step::Malformed);
            Arc::new(ScriptedProvider {
                steps: Mutex::new(steps.into()),
                last,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl JudgmentProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn judge(
            &self,
            request: &JudgmentRequest,
        ) -> Result<ProbabilityJudgment, JudgmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.last.clone());
            match step {
                Step::Answer(p) => Ok(ProbabilityJudgment {
                    probability: p,
                    confidence: 0.8,
                    risk_factors: vec![],
                    value_assessment: ValueAssessment::StrongValue,
                    reasoning: format!("judged {}", request.selection_key),
                    cost: 0.01,
                    provenance: Provenance::Ai,
                    premium: request.premium,
                }),
                Step::RateLimited => Err(JudgmentError::RateLimited { retry_after: None }),
                Step::Malformed => Err(JudgmentError::Malformed("bad".into())),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Err(JudgmentError::Timeout)
                }
            }
        }
    }

    fn config() -> DeskConfig {
        DeskConfig {
            request_timeout: Duration::from_millis(100),
            backoff_base: Duration::from_millis(1),
            requests_per_minute: 600,
            ..DeskConfig::default()
        }
    }

    fn opportunity() -> Opportunity {
        let now = Utc::now();
        Opportunity {
            id: "m/h2h/home".into(),
            match_id: "m".into(),
            sport: "soccer".into(),
            league: "Serie B".into(),
            event_name: "A vs B".into(),
            start_time: now,
            kind: OpportunityKind::Value {
                market: "h2h".into(),
                outcome: "home".into(),
                bookmaker: "b1".into(),
            },
            odds: 2.0,
            probability: 0.6,
            edge: 0.1,
            relative_edge: 0.2,
            confidence: 0.9,
            full_kelly: 0.2,
            stake_fraction: 0.05,
            stake_amount: 50.0,
            potential_profit: 50.0,
            expected_roi: 1.0,
            priority_score: 80.0,
            risk_level: RiskLevel::Low,
            risk_factors: vec![],
            value_assessment: ValueAssessment::StrongValue,
            league_tier: LeagueTier::Tier1,
            reasoning: vec![],
            expires_at: now,
            validation: None,
        }
    }

    fn fallback() -> ProbabilityJudgment {
        ProbabilityJudgment {
            probability: 0.55,
            confidence: 0.6,
            risk_factors: vec![],
            value_assessment: ValueAssessment::ModerateValue,
            reasoning: String::new(),
            cost: 0.0,
            provenance: Provenance::Statistical,
            premium: false,
        }
    }

    #[tokio::test]
    async fn test_second_request_hits_cache() {
        let provider = ScriptedProvider::new(vec![Step::Answer(0.62)]);
        let desk = SecondOpinionDesk::new(provider.clone(), config());
        let first = desk.second_opinion(&opportunity(), fallback()).await;
        let second = desk.second_opinion(&opportunity(), fallback()).await;
        assert_eq!(first, second);
        assert_eq!(first.provenance, Provenance::Ai);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let usage = desk.close();
        assert_eq!(usage.requested, 2);
        assert_eq!(usage.cache_hits, 1);
        assert_eq!(usage.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let provider =
            ScriptedProvider::new(vec![Step::RateLimited, Step::RateLimited, Step::Answer(0.6)]);
        let desk = SecondOpinionDesk::new(provider.clone(), config());
        let judgment = desk.second_opinion(&opportunity(), fallback()).await;
        assert_eq!(judgment.provenance, Provenance::Ai);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(desk.usage().retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fall_back() {
        let provider = ScriptedProvider::new(vec![Step::RateLimited]);
        let desk = SecondOpinionDesk::new(provider.clone(), config());
        let judgment = desk.second_opinion(&opportunity(), fallback()).await;
        assert_eq!(judgment, fallback());
        // One initial call plus three retries.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        let usage = desk.usage();
        assert_eq!(usage.failures, 1);
        assert_eq!(usage.fallbacks, 1);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_and_is_not_cached() {
        let provider = ScriptedProvider::new(vec![Step::Hang, Step::Answer(0.7)]);
        let desk = SecondOpinionDesk::new(provider.clone(), config());
        let judgment = desk.second_opinion(&opportunity(), fallback()).await;
        assert_eq!(judgment.provenance, Provenance::Statistical);
        let judgment = desk.second_opinion(&opportunity(), fallback()).await;
        assert_eq!(judgment.probability, 0.7);
        assert_eq!(desk.usage().cache_hits, 0);
    }

    #[tokio::test]
    async fn test_malformed_is_not_retried() {
        let provider = ScriptedProvider::new(vec![Step::Malformed]);
        let desk = SecondOpinionDesk::new(provider.clone(), config());
        let judgment = desk.second_opinion(&opportunity(), fallback()).await;
        assert_eq!(judgment, fallback());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
