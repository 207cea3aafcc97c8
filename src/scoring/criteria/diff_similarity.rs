//! Diff similarity: does the candidate diff make the same change as the
//! ground-truth diff?

use async_trait::async_trait;

use crate::error::ScoringError;
use crate::judge::{JudgeModel, JudgeVerdict};
use crate::scoring::criterion::{Criterion, CriterionContext};

/// Truncation limit for diffs embedded in judge prompts. Large vendored-file
/// diffs would otherwise blow the judge context for no scoring benefit.
const MAX_DIFF_CHARS: usize = 60_000;

const PROMPT_TEMPLATE: &str = r#"Compare the candidate diff produced by a coding agent
against the reference diff that actually landed in the repository.

Score how closely the candidate realizes the same change:
- 1.0: semantically equivalent; same files, same behavior, cosmetic drift only
- 0.7-0.9: same behavior with minor omissions or harmless extras
- 0.4-0.6: partial; some of the change is there, some is missing or wrong
- 0.1-0.3: barely related; touches the right area but not the right change
- 0.0: unrelated or empty

Repository: {repo}
Commit range: {from}...{to}

## Reference diff
{reference_diff}

## Candidate diff
{candidate_diff}
"#;

/// Judge-backed comparison of the candidate diff against the reference diff.
pub struct DiffSimilarity;

impl DiffSimilarity {
    fn build_prompt(ctx: &CriterionContext<'_>) -> String {
        PROMPT_TEMPLATE
            .replace("{repo}", &ctx.eval.repo)
            .replace("{from}", &ctx.eval.from_commit)
            .replace("{to}", &ctx.eval.to_commit)
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
impl Criterion for DiffSimilarity {
    fn name(&self) -> &'static str {
        "diff-similarity"
    }

    async fn evaluate(
        &self,
        ctx: &CriterionContext<'_>,
        judge: &dyn JudgeModel,
        _reference: Option<&serde_json::Value>,
    ) -> Result<JudgeVerdict, ScoringError> {
        let prompt = Self::build_prompt(ctx);
        Ok(judge.invoke_verdict(&prompt).await?)
    }
}
