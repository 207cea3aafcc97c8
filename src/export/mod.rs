//! Persisted result shapes.
//!
//! Two documents can come out of a run: a scored [`EvaluationRunExport`], or
//! a [`FeasibilityReport`] when the task could not be evaluated at all. The
//! split lets downstream consumers tell "could not be evaluated" apart from
//! "evaluated and scored low". Field names follow the published camelCase
//! export shape.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::scoring::criterion::ScoreAssignment;
use crate::stats::{AgreementBand, EpisodeSummary};

/// One judge's contribution to one criterion in one episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeScoreExport {
    /// Judge name.
    pub name: String,
    /// Model backing the judge.
    pub model: String,
    /// Validated score in [0,1].
    pub score: f64,
    /// Judge rationale.
    pub rationale: String,
    /// Episode index this score belongs to (0-based).
    pub episode: u32,
}

/// One criterion's aggregate, with the judge scores behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResultExport {
    /// The assignment that produced this result.
    pub assignment: ScoreAssignment,
    /// Mean of the valid judge scores.
    pub average_score: f64,
    /// Criterion's share of the total weight.
    pub normalized_weight: f64,
    /// Population variance of the valid judge scores.
    pub variance: f64,
    /// Judge contributions.
    pub judges: Vec<JudgeScoreExport>,
    /// True when no judge produced a usable score in some episode.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub low_confidence: bool,
}

/// One independent attempt at the task. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeExport {
    /// Episode index (0-based).
    pub episode: u32,
    /// Episode final score.
    pub final_score: f64,
    /// Episode base score before the disagreement penalty.
    pub base_score: f64,
    /// Disagreement penalty deducted.
    pub variance_penalty: f64,
    /// Per-criterion results for this episode.
    pub scores: Vec<ScoreResultExport>,
}

/// Evaluation metadata echoed into the export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRef {
    /// Repository slug.
    pub repo: String,
    /// Base commit.
    pub from: String,
    /// Head commit.
    pub to: String,
}

/// Cross-episode statistics block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatisticsExport {
    /// Mean/std-dev/CI/range over episode final scores.
    #[serde(flatten)]
    pub summary: EpisodeSummary,
    /// Fleiss' kappa over the binarized judge matrix, when computable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fleiss_kappa: Option<f64>,
    /// Interpretation band for the kappa value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreement: Option<AgreementBand>,
}

/// The full scored result for one (task, agent, model) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRunExport {
    /// Agent adapter name.
    pub agent: String,
    /// Agent model identifier.
    pub model: String,
    /// Task identifier from the dataset.
    pub eval_id: String,
    /// Task metadata.
    pub evaluation: EvaluationRef,
    /// Mean final score across episodes.
    pub final_score: f64,
    /// Mean base score across episodes.
    pub base_score: f64,
    /// Mean disagreement penalty across episodes.
    pub variance_penalty: f64,
    /// Per-criterion cross-episode aggregates.
    pub scores: Vec<ScoreResultExport>,
    /// Per-episode records.
    pub episodes: Vec<EpisodeExport>,
    /// Cross-episode statistics.
    pub statistics: RunStatisticsExport,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
}

/// Human-readable report for a task that could not be evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeasibilityReport {
    /// Task identifier from the dataset.
    pub eval_id: String,
    /// Phase the run failed in.
    pub phase: String,
    /// What went wrong.
    pub reason: String,
    /// When the report was produced.
    pub created_at: DateTime<Utc>,
}

impl FeasibilityReport {
    /// Build a report for a failed run.
    pub fn new(eval_id: impl Into<String>, phase: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            eval_id: eval_id.into(),
            phase: phase.into(),
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }
}

/// Write a scored export as pretty JSON.
pub fn write_run_export(path: &Path, export: &EvaluationRunExport) -> Result<(), ExportError> {
    write_json(path, export)
}

/// Write a feasibility report as pretty JSON.
pub fn write_feasibility_report(
    path: &Path,
    report: &FeasibilityReport,
) -> Result<(), ExportError> {
    write_json(path, report)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Read a scored export back, for re-summarization.
pub fn read_run_export(path: &Path) -> Result<EvaluationRunExport, ExportError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::summarize_episodes;

    fn sample_export() -> EvaluationRunExport {
        EvaluationRunExport {
            agent: "shell-agent".to_string(),
            model: "openai/gpt-5.2-codex".to_string(),
            eval_id: "widgets-1".to_string(),
            evaluation: EvaluationRef {
                repo: "octo/widgets".to_string(),
                from: "abc123".to_string(),
                to: "def456".to_string(),
            },
            final_score: 0.61,
            base_score: 0.67,
            variance_penalty: 0.06,
            scores: vec![],
            episodes: vec![],
            statistics: RunStatisticsExport {
                summary: summarize_episodes(&[0.61]),
                fleiss_kappa: Some(1.0),
                agreement: Some(crate::stats::AgreementBand::AlmostPerfect),
            },
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_export_uses_camel_case() {
        let json = serde_json::to_string(&sample_export()).unwrap();
        assert!(json.contains("\"finalScore\""));
        assert!(json.contains("\"baseScore\""));
        assert!(json.contains("\"variancePenalty\""));
        assert!(json.contains("\"fleissKappa\""));
        assert!(json.contains("\"evalId\""));
        assert!(!json.contains("final_score"));
    }

    #[test]
    fn test_export_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("widgets-1.json");

        let export = sample_export();
        write_run_export(&path, &export).unwrap();
        let loaded = read_run_export(&path).unwrap();

        assert_eq!(loaded.eval_id, export.eval_id);
        assert_eq!(loaded.final_score, export.final_score);
        assert_eq!(loaded.statistics.fleiss_kappa, Some(1.0));
    }

    #[test]
    fn test_low_confidence_flag_omitted_when_false() {
        let score = ScoreResultExport {
            assignment: ScoreAssignment::new("diff-similarity"),
            average_score: 0.5,
            normalized_weight: 1.0,
            variance: 0.0,
            judges: vec![],
            low_confidence: false,
        };
        let json = serde_json::to_string(&score).unwrap();
        assert!(!json.contains("lowConfidence"));

        let flagged = ScoreResultExport {
            low_confidence: true,
            ..score
        };
        let json = serde_json::to_string(&flagged).unwrap();
        assert!(json.contains("\"lowConfidence\":true"));
    }

    #[test]
    fn test_feasibility_report_distinct_from_export() {
        let report = FeasibilityReport::new(
            "widgets-1",
            "fetching-reference",
            "comparison produced an empty diff",
        );
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"phase\":\"fetching-reference\""));
        assert!(!json.contains("finalScore"));
    }
}
