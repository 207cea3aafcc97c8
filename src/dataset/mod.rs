//! Task definitions: real commit ranges replayed as benchmark tasks.
//!
//! A dataset file (YAML or JSON) lists evaluations. Loading validates the
//! whole file up front and the result is frozen for the process lifetime;
//! duplicate ids, unknown criterion names and non-positive weights are fatal
//! at load time, never discovered mid-run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DatasetError;
use crate::scoring::criterion::{CriterionRegistry, ScoreAssignment};

/// Where the task prompt handed to the agent comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptSource {
    /// Fixed prompt text in the dataset file.
    Inline { text: String },
    /// Use the head commit's message as the prompt.
    CommitMessage,
    /// Build the prompt from the referenced issues.
    Issues,
}

impl PromptSource {
    /// Short description for logs and judge prompts.
    pub fn summary(&self) -> &str {
        match self {
            PromptSource::Inline { text } => text,
            PromptSource::CommitMessage => "(reproduce the head commit's change)",
            PromptSource::Issues => "(resolve the referenced issues)",
        }
    }
}

impl Default for PromptSource {
    fn default() -> Self {
        PromptSource::CommitMessage
    }
}

/// One benchmark task: a commit range in a repository, plus how to score it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEval {
    /// Dataset-unique task identifier.
    pub id: String,
    /// Repository slug, "owner/name".
    pub repo: String,
    /// Base commit the agent starts from.
    pub from_commit: String,
    /// Head commit whose change the agent should reproduce.
    pub to_commit: String,
    /// Prompt source for the agent.
    #[serde(default)]
    pub prompt: PromptSource,
    /// Issue references providing extra context.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Criteria applied to this evaluation.
    pub scores: Vec<ScoreAssignment>,
}

impl DatasetEval {
    /// Split the repo slug into (owner, name).
    pub fn owner_repo(&self) -> Result<(String, String), DatasetError> {
        match self.repo.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
                Ok((owner.to_string(), name.to_string()))
            }
            _ => Err(DatasetError::InvalidRepoSlug {
                eval: self.id.clone(),
                repo: self.repo.clone(),
            }),
        }
    }
}

/// A validated, frozen set of evaluations.
pub struct Dataset {
    evals: Vec<DatasetEval>,
}

#[derive(Debug, Deserialize)]
struct DatasetFile {
    evaluations: Vec<DatasetEval>,
}

impl Dataset {
    /// Load and validate a dataset file. Format is chosen by extension:
    /// `.yaml`/`.yml` or `.json`.
    pub fn load(path: &Path, registry: &CriterionRegistry) -> Result<Self, DatasetError> {
        let content = std::fs::read_to_string(path)?;
        let file: DatasetFile = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(DatasetError::UnsupportedFormat(
                    path.display().to_string(),
                ))
            }
        };
        Self::from_evals(file.evaluations, registry)
    }

    /// Validate an in-memory evaluation list and freeze it.
    pub fn from_evals(
        evals: Vec<DatasetEval>,
        registry: &CriterionRegistry,
    ) -> Result<Self, DatasetError> {
        if evals.is_empty() {
            return Err(DatasetError::Empty);
        }

        let mut seen = std::collections::HashSet::new();
        for eval in &evals {
            if !seen.insert(eval.id.as_str()) {
                return Err(DatasetError::DuplicateEval(eval.id.clone()));
            }

            eval.owner_repo()?;

            for assignment in &eval.scores {
                if !registry.contains(&assignment.name) {
                    return Err(DatasetError::UnknownCriterion {
                        eval: eval.id.clone(),
                        criterion: assignment.name.clone(),
                    });
                }
                if !(assignment.weight > 0.0) || !assignment.weight.is_finite() {
                    return Err(DatasetError::InvalidWeight {
                        eval: eval.id.clone(),
                        criterion: assignment.name.clone(),
                        weight: assignment.weight,
                    });
                }
            }
        }

        Ok(Self { evals })
    }

    /// The validated evaluations, in file order.
    pub fn evals(&self) -> &[DatasetEval] {
        &self.evals
    }

    /// Number of evaluations.
    pub fn len(&self) -> usize {
        self.evals.len()
    }

    /// Whether the dataset is empty. Always false after validation.
    pub fn is_empty(&self) -> bool {
        self.evals.is_empty()
    }
}
