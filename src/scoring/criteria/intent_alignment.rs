//! Intent alignment: does the candidate realize what the commit range set
//! out to do, regardless of how literally it mirrors the reference diff?
//!
//! `prepare` fetches the titles of the intermediate commits as planner
//! context; a fetch that comes back empty degrades to scoring on the diffs
//! alone.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScoringError;
use crate::judge::{JudgeModel, JudgeVerdict};
use crate::scoring::criterion::{Criterion, CriterionContext};

const MAX_DIFF_CHARS: usize = 40_000;

const PROMPT_TEMPLATE: &str = r#"A coding agent was asked to reproduce a change in a
repository. Below is the intent of the original change (commit titles from the
replayed range), the ground-truth diff, and the agent's candidate diff.

Score whether the candidate accomplishes the INTENT of the change. A candidate
that reaches the same goal through different code deserves a high score; a
candidate that mimics the diff's shape but misses the goal does not.

Repository: {repo}
Task prompt given to the agent: {task_prompt}

## Intent (commit titles)
{intent}

## Reference diff
{reference_diff}

## Candidate diff
{candidate_diff}
"#;

/// Reference artifact: commit titles fetched during `prepare`.
#[derive(Debug, Serialize, Deserialize)]
struct IntentReference {
    titles: Vec<String>,
}

/// Judge-backed scoring of goal attainment rather than diff shape.
pub struct IntentAlignment;

impl IntentAlignment {
    fn build_prompt(ctx: &CriterionContext<'_>, reference: Option<&serde_json::Value>) -> String {
        let intent = reference
            .and_then(|v| serde_json::from_value::<IntentReference>(v.clone()).ok())
            .map(|r| {
                r.titles
                    .iter()
                    .map(|t| format!("- {}", t))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "(commit titles unavailable)".to_string());

        PROMPT_TEMPLATE
            .replace("{repo}", &ctx.eval.repo)
            .replace("{task_prompt}", ctx.eval.prompt.summary())
            .replace("{intent}", &intent)
            .replace("{reference_diff}", truncate(ctx.reference_diff))
            .replace(
                "{candidate_diff}",
                if ctx.candidate_diff.trim().is_empty() {
                    "(the agent produced no changes)"
                } else {
                    truncate(ctx.candidate_diff)
                },
            )
    }
}

fn truncate(diff: &str) -> &str {
    match diff.char_indices().nth(MAX_DIFF_CHARS) {
        Some((i, _)) => &diff[..i],
        None => diff,
    }
}

#[async_trait]
impl Criterion for IntentAlignment {
    fn name(&self) -> &'static str {
        "intent-alignment"
    }

    async fn prepare(
        &self,
        ctx: &CriterionContext<'_>,
    ) -> Result<Option<serde_json::Value>, ScoringError> {
        let (owner, repo) = ctx
            .eval
            .owner_repo()
            .map_err(|e| ScoringError::PrepareFailed {
                criterion: self.name().to_string(),
                reason: e.to_string(),
            })?;

        let shas = vec![ctx.eval.to_commit.clone()];
        let commits = ctx.diff_source.fetch_commit_diffs(&owner, &repo, &shas).await;
        let titles: Vec<String> = commits.into_iter().map(|c| c.title).collect();
        debug!(
            eval = %ctx.eval.id,
            titles = titles.len(),
            "Prepared intent context"
        );

        let reference = IntentReference { titles };
        let value = serde_json::to_value(reference).map_err(|e| ScoringError::PrepareFailed {
            criterion: self.name().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(value))
    }

    async fn evaluate(
        &self,
        ctx: &CriterionContext<'_>,
        judge: &dyn JudgeModel,
        reference: Option<&serde_json::Value>,
    ) -> Result<JudgeVerdict, ScoringError> {
        let prompt = Self::build_prompt(ctx, reference);
        Ok(judge.invoke_verdict(&prompt).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetEval, PromptSource};
    use crate::github::{CommitDiff, DiffSource};
    use crate::scoring::criterion::ScoreAssignment;
    use std::path::Path;

    struct TitleSource;

    #[async_trait]
    impl DiffSource for TitleSource {
        async fn fetch_comparison_diff(
            &self,
            _owner: &str,
            _repo: &str,
            _base: &str,
            _head: &str,
        ) -> Result<String, crate::error::GitHubError> {
            unreachable!("intent-alignment never fetches comparisons")
        }

        async fn fetch_commit_diffs(
            &self,
            owner: &str,
            repo: &str,
            shas: &[String],
        ) -> Vec<CommitDiff> {
            assert_eq!(owner, "octo");
            assert_eq!(repo, "widgets");
            shas.iter()
                .map(|sha| CommitDiff {
                    sha: sha.clone(),
                    title: "Fix widget overflow on resize".to_string(),
                    diff: "+fix".to_string(),
                })
                .collect()
        }
    }

    fn eval() -> DatasetEval {
        DatasetEval {
            id: "demo-2".to_string(),
            repo: "octo/widgets".to_string(),
            from_commit: "abc123".to_string(),
            to_commit: "def456".to_string(),
            prompt: PromptSource::Inline {
                text: "fix overflow".to_string(),
            },
            issues: Vec::new(),
            scores: vec![ScoreAssignment::new("intent-alignment")],
        }
    }

    #[tokio::test]
    async fn test_prepare_fetches_commit_titles() {
        let eval = eval();
        let source = TitleSource;
        let args = serde_json::Value::Null;
        let ctx = CriterionContext {
            eval: &eval,
            working_dir: Path::new("/tmp/work"),
            diff_source: &source,
            reference_diff: "+fix",
            candidate_diff: "+other fix",
            args: &args,
        };

        let reference = IntentAlignment.prepare(&ctx).await.unwrap().unwrap();
        let prompt = IntentAlignment::build_prompt(&ctx, Some(&reference));
        assert!(prompt.contains("- Fix widget overflow on resize"));
        assert!(prompt.contains("fix overflow"));
    }

    #[test]
    fn test_prompt_degrades_without_reference() {
        let eval = eval();
        let source = TitleSource;
        let args = serde_json::Value::Null;
        let ctx = CriterionContext {
            eval: &eval,
            working_dir: Path::new("/tmp/work"),
            diff_source: &source,
            reference_diff: "+fix",
            candidate_diff: "+other fix",
            args: &args,
        };
        let prompt = IntentAlignment::build_prompt(&ctx, None);
        assert!(prompt.contains("commit titles unavailable"));
    }
}
