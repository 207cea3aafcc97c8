//! The contract every scoring criterion implements, and the registry that
//! names them.
//!
//! A criterion has an optional `prepare` step producing a reference artifact
//! (a fetched diff, planner context, a fixture) and an `evaluate` step
//! producing a raw verdict for one judge. Post-conditions on the verdict are
//! enforced by [`evaluate_validated`], not by criterion authors.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dataset::DatasetEval;
use crate::error::ScoringError;
use crate::github::DiffSource;
use crate::judge::{validate_verdict, JudgeModel, JudgeScore, JudgeVerdict};

fn default_weight() -> f64 {
    1.0
}

/// Assignment of a named criterion to an evaluation, with its relative
/// importance.
///
/// Weights are not required to sum to 1 across an evaluation; they are
/// normalized at aggregation time. The load-time invariant is weight > 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreAssignment {
    /// Registry name of the criterion.
    pub name: String,
    /// Relative weight, > 0.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Opaque per-criterion configuration.
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ScoreAssignment {
    /// Create an assignment with the default weight of 1.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: 1.0,
            args: serde_json::Value::Null,
        }
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Everything a criterion can see while preparing and evaluating.
pub struct CriterionContext<'a> {
    /// The task definition being evaluated.
    pub eval: &'a DatasetEval,
    /// Directory the agent worked in.
    pub working_dir: &'a Path,
    /// Diff source for criteria that fetch extra context in `prepare`.
    pub diff_source: &'a dyn DiffSource,
    /// Ground-truth diff for the commit range.
    pub reference_diff: &'a str,
    /// Diff the agent actually produced.
    pub candidate_diff: &'a str,
    /// Opaque args from the assignment.
    pub args: &'a serde_json::Value,
}

/// A named axis of evaluation.
#[async_trait]
pub trait Criterion: Send + Sync {
    /// Registry name, referenced from dataset entries.
    fn name(&self) -> &'static str;

    /// Produce a reference artifact the evaluation needs beyond the raw
    /// diffs. Runs once per (criterion, episode), before any judge is
    /// queried. The default produces nothing.
    async fn prepare(
        &self,
        _ctx: &CriterionContext<'_>,
    ) -> Result<Option<serde_json::Value>, ScoringError> {
        Ok(None)
    }

    /// Score the candidate against the reference with one judge.
    async fn evaluate(
        &self,
        ctx: &CriterionContext<'_>,
        judge: &dyn JudgeModel,
        reference: Option<&serde_json::Value>,
    ) -> Result<JudgeVerdict, ScoringError>;
}

/// Evaluate with one judge and enforce the verdict contract.
///
/// This is the wrapping layer that criterion authors rely on: the returned
/// score must be finite, in [0,1] without clamping, with a non-empty
/// rationale. Violations are hard [`ScoringError::ContractViolation`]s.
pub async fn evaluate_validated(
    criterion: &dyn Criterion,
    ctx: &CriterionContext<'_>,
    judge: &dyn JudgeModel,
    reference: Option<&serde_json::Value>,
) -> Result<JudgeScore, ScoringError> {
    let verdict = criterion.evaluate(ctx, judge, reference).await?;
    validate_verdict(criterion.name(), judge.name(), verdict, judge.model())
}

/// Fixed registry of criteria keyed by name.
pub struct CriterionRegistry {
    criteria: HashMap<&'static str, Arc<dyn Criterion>>,
}

impl CriterionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            criteria: HashMap::new(),
        }
    }

    /// Create a registry pre-populated with the built-in criteria.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::criteria::DiffSimilarity));
        registry.register(Arc::new(super::criteria::IntentAlignment));
        registry
    }

    /// Register a criterion under its name.
    pub fn register(&mut self, criterion: Arc<dyn Criterion>) {
        self.criteria.insert(criterion.name(), criterion);
    }

    /// Look up a criterion by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Criterion>, ScoringError> {
        self.criteria
            .get(name)
            .cloned()
            .ok_or_else(|| ScoringError::UnknownCriterion(name.to_string()))
    }

    /// Whether a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.criteria.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.criteria.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for CriterionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
