use crate::engine::estimate::StatisticalEstimate;
use crate::engine::kelly::implied_probability;
use crate::models::ProbabilityJudgment;

/// Upper bound on the weight an external judgment gets in the blend.
pub const MAX_AI_WEIGHT: f64 = 0.8;
const STAT_CONFIDENCE_WEIGHT: f64 = 0.4;
const AI_CONFIDENCE_WEIGHT: f64 = 0.6;

/// Blended probability judgment for one selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendedEstimate {
    pub probability: f64,
    pub confidence: f64,
    /// Weight the external judgment received, 0 when absent.
    pub ai_weight: f64,
}

impl BlendedEstimate {
    /// `probability - 1/odds`
    pub fn edge(&self, odds: f64) -> f64 {
        self.probability - implied_probability(odds)
    }
}

fn unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Combine the statistical estimate with an optional external judgment.
///
/// AI weight = `min(confidence_ai, 0.8)`; confidence = `0.4·stat + 0.6·ai`.
/// Without a judgment the statistical estimate passes through unchanged.
/// Out-of-range inputs are clamped into [0, 1].
pub fn blend(stat: &StatisticalEstimate, ai: Option<&ProbabilityJudgment>) -> BlendedEstimate {
    let p_stat = unit(stat.probability);
    let c_stat = unit(stat.confidence);
    match ai {
        None => BlendedEstimate {
            probability: p_stat,
            confidence: c_stat,
            ai_weight: 0.0,
        },
        Some(judgment) => {
            let p_ai = unit(judgment.probability);
            let c_ai = unit(judgment.confidence);
            let w = c_ai.min(MAX_AI_WEIGHT);
            BlendedEstimate {
                probability: p_stat * (1.0 - w) + p_ai * w,
                confidence: c_stat * STAT_CONFIDENCE_WEIGHT + c_ai * AI_CONFIDENCE_WEIGHT,
                ai_weight: w,
            }
        }
    }
}
