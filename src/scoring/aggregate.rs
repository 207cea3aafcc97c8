//! Multi-judge score aggregation.
//!
//! Two steps. Per criterion, judge scores collapse to a mean and a population
//! variance over the valid scores only. Across criteria, weighted means of
//! those statistics produce a base score and a disagreement penalty:
//! `final = max(0, base − λ·Σ wⱼ·varianceⱼ)` with normalized weights `wⱼ`.
//! Disagreement among judges is evidence the task is ambiguous or the
//! agent's behavior is borderline, so it lowers the score in proportion to
//! the weight the noisy criterion carries.
//!
//! Everything here is a pure function over passed-in data: no retained
//! state, no input mutation, bitwise-identical output for identical input.

use serde::{Deserialize, Serialize};

use super::criterion::ScoreAssignment;
use crate::judge::JudgeScore;

/// Default λ applied to the weighted variance when computing the penalty.
pub const DEFAULT_DISAGREEMENT_LAMBDA: f64 = 0.5;

/// Mean and spread of one criterion's judge scores.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeStatistics {
    /// Mean of the valid scores; 0 when no judge produced a usable score.
    pub average_score: f64,
    /// Population variance of the valid scores.
    pub variance: f64,
    /// How many scores survived the validity filter.
    pub judge_count: usize,
}

/// Per-criterion statistics over a judge score vector.
///
/// Only finite scores inside [0,1] participate; anything else is excluded
/// from the average rather than treated as zero, so a single malfunctioning
/// judge cannot mechanically fail a criterion. Zero valid scores is a
/// degenerate result (`judge_count == 0`), not an error: callers detect it
/// to flag "no judge produced a usable score".
pub fn compute_judge_statistics(scores: &[f64]) -> JudgeStatistics {
    let valid: Vec<f64> = scores
        .iter()
        .copied()
        .filter(|s| s.is_finite() && (0.0..=1.0).contains(s))
        .collect();

    if valid.is_empty() {
        return JudgeStatistics {
            average_score: 0.0,
            variance: 0.0,
            judge_count: 0,
        };
    }

    let k = valid.len() as f64;
    let average_score = valid.iter().sum::<f64>() / k;
    // Uniform judge weighting within a criterion: every judge counts equally.
    let variance = valid
        .iter()
        .map(|s| (s - average_score).powi(2))
        .sum::<f64>()
        / k;

    JudgeStatistics {
        average_score,
        variance,
        judge_count: valid.len(),
    }
}

/// One criterion's judge scores, ready for aggregation.
#[derive(Debug, Clone)]
pub struct CriterionScores {
    /// The assignment that produced these scores.
    pub assignment: ScoreAssignment,
    /// Validated per-judge scores, in panel order.
    pub judges: Vec<JudgeScore>,
}

/// Derived per-criterion aggregate. Ephemeral: recomputed on every
/// aggregation call, never persisted independently of its summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedScore {
    /// The assignment this aggregate derives from.
    pub assignment: ScoreAssignment,
    /// Mean of the valid judge scores, in [0,1].
    pub average_score: f64,
    /// This criterion's share of the total weight, in [0,1].
    pub normalized_weight: f64,
    /// Population variance of the valid judge scores.
    pub variance: f64,
    /// Valid judge count; 0 flags a low-confidence criterion.
    pub judge_count: usize,
}

/// One episode's aggregate across all criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationSummary {
    /// Per-criterion aggregates, in input order.
    pub per_score: Vec<AggregatedScore>,
    /// Weighted mean of criterion averages, in [0,1].
    pub base_score: f64,
    /// λ-scaled weighted variance deducted from the base.
    pub variance_penalty: f64,
    /// `max(0, base_score − variance_penalty)`.
    pub final_score: f64,
}

impl AggregationSummary {
    /// The all-zero summary: no criteria means no signal.
    pub fn empty() -> Self {
        Self {
            per_score: Vec::new(),
            base_score: 0.0,
            variance_penalty: 0.0,
            final_score: 0.0,
        }
    }

    /// Criteria where no judge produced a usable score.
    pub fn low_confidence_criteria(&self) -> Vec<&str> {
        self.per_score
            .iter()
            .filter(|s| s.judge_count == 0)
            .map(|s| s.assignment.name.as_str())
            .collect()
    }
}

/// Combine per-criterion judge scores into one episode summary.
///
/// `base_score` is a convex combination of values in [0,1], so it needs no
/// upper clamp; only the penalty subtraction is floored at zero.
pub fn aggregate_scores(criteria: &[CriterionScores], lambda: f64) -> AggregationSummary {
    if criteria.is_empty() {
        return AggregationSummary::empty();
    }

    let total_weight: f64 = criteria.iter().map(|c| c.assignment.weight).sum();
    if !(total_weight > 0.0) || !total_weight.is_finite() {
        return AggregationSummary::empty();
    }

    let mut per_score = Vec::with_capacity(criteria.len());
    let mut base_score = 0.0;
    let mut weighted_variance = 0.0;

    for criterion in criteria {
        let scores: Vec<f64> = criterion.judges.iter().map(|j| j.score).collect();
        let stats = compute_judge_statistics(&scores);
        let normalized_weight = criterion.assignment.weight / total_weight;

        base_score += normalized_weight * stats.average_score;
        weighted_variance += normalized_weight * stats.variance;

        per_score.push(AggregatedScore {
            assignment: criterion.assignment.clone(),
            average_score: stats.average_score,
            normalized_weight,
            variance: stats.variance,
            judge_count: stats.judge_count,
        });
    }

    let variance_penalty = lambda * weighted_variance;
    let final_score = (base_score - variance_penalty).max(0.0);

    AggregationSummary {
        per_score,
        base_score,
        variance_penalty,
        final_score,
    }
}
