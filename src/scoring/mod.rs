//! Scoring: criterion contract, registry, built-in criteria and the
//! multi-judge aggregation engine.

pub mod aggregate;
pub mod criteria;
pub mod criterion;

pub use aggregate::{
    aggregate_scores, compute_judge_statistics, AggregatedScore, AggregationSummary,
    CriterionScores, JudgeStatistics, DEFAULT_DISAGREEMENT_LAMBDA,
};
pub use criterion::{
    evaluate_validated, Criterion, CriterionContext, CriterionRegistry, ScoreAssignment,
};
