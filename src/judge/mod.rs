//! Judge panel: LLM-backed scorers queried independently per criterion.
//!
//! A judge is an immutable `{name, model}` identity plus a narrow capability:
//! given a prompt, produce either free text or a structured
//! `{score, rationale}` verdict. The panel is a fixed ordered set of judges;
//! it is configuration, not logic. Verdict validation lives here too: scores
//! outside [0,1], non-finite scores and empty rationales are contract
//! violations by the judge/criterion implementation, never silently
//! corrected and never retried.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, LlmError, ScoringError};
use crate::llm::{provider_for_model, GenerationRequest, LlmProvider, Message};
use crate::utils::json_extraction::extract_json_object;

/// Sampling temperature for judge calls. Low on purpose: judges should be
/// repeatable, not creative.
const JUDGE_TEMPERATURE: f64 = 0.1;

/// Token cap for a judge verdict.
const JUDGE_MAX_TOKENS: u32 = 1200;

/// System prompt shared by all structured judge calls.
const JUDGE_SYSTEM_PROMPT: &str = "You are one judge on an evaluation panel scoring \
the work of an autonomous coding agent. Respond with ONLY a JSON object of the form \
{\"score\": <number between 0.0 and 1.0>, \"rationale\": \"<one concise paragraph>\"}. \
No markdown, no commentary outside the JSON.";

/// Immutable identity of one judge on the panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Judge {
    /// Short panel-unique name (e.g. "judge-1").
    pub name: String,
    /// Model identifier backing this judge.
    pub model: String,
}

impl Judge {
    /// Create a new judge identity.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
        }
    }
}

/// Raw verdict as returned by a judge, before contract validation.
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeVerdict {
    /// Scalar score. Must already lie in [0,1]; validated by the caller.
    pub score: f64,
    /// Free-text justification. Must be non-empty; validated by the caller.
    pub rationale: String,
}

/// A validated per-(criterion, judge) score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeScore {
    /// Name of the judge that produced this score.
    pub judge: String,
    /// Model identifier of that judge.
    pub model: String,
    /// Score in [0,1].
    pub score: f64,
    /// Non-empty justification.
    pub rationale: String,
}

/// The capability a criterion needs from a judge.
#[async_trait]
pub trait JudgeModel: Send + Sync {
    /// Panel-unique judge name.
    fn name(&self) -> &str;

    /// Model identifier backing this judge.
    fn model(&self) -> &str;

    /// Free-text invocation.
    async fn invoke_text(&self, prompt: &str) -> Result<String, LlmError>;

    /// Structured invocation returning a raw `{score, rationale}` verdict.
    async fn invoke_verdict(&self, prompt: &str) -> Result<JudgeVerdict, LlmError>;
}

/// LLM-backed judge implementation.
pub struct LlmJudge {
    identity: Judge,
    provider: Arc<dyn LlmProvider>,
}

impl LlmJudge {
    /// Create a judge over an explicit provider.
    pub fn new(identity: Judge, provider: Arc<dyn LlmProvider>) -> Self {
        Self { identity, provider }
    }

    /// Create a judge whose provider is selected from the model identifier
    /// prefix and environment credentials.
    pub fn from_model(name: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        let identity = Judge::new(name, model);
        let provider = provider_for_model(&identity.model)?;
        Ok(Self { identity, provider })
    }
}

#[async_trait]
impl JudgeModel for LlmJudge {
    fn name(&self) -> &str {
        &self.identity.name
    }

    fn model(&self) -> &str {
        &self.identity.model
    }

    async fn invoke_text(&self, prompt: &str) -> Result<String, LlmError> {
        let request = GenerationRequest::new(
            self.identity.model.clone(),
            vec![Message::user(prompt)],
        )
        .with_temperature(JUDGE_TEMPERATURE)
        .with_max_tokens(JUDGE_MAX_TOKENS);

        let response = self.provider.generate(request).await?;
        Ok(response.require_content()?.to_string())
    }

    async fn invoke_verdict(&self, prompt: &str) -> Result<JudgeVerdict, LlmError> {
        let request = GenerationRequest::new(
            self.identity.model.clone(),
            vec![Message::system(JUDGE_SYSTEM_PROMPT), Message::user(prompt)],
        )
        .with_temperature(JUDGE_TEMPERATURE)
        .with_max_tokens(JUDGE_MAX_TOKENS);

        let response = self.provider.generate(request).await?;
        let content = response.require_content()?;

        let json = extract_json_object(content)
            .map_err(|e| LlmError::ParseError(format!("judge '{}': {}", self.identity.name, e)))?;
        let verdict: JudgeVerdict = serde_json::from_str(&json).map_err(|e| {
            LlmError::ParseError(format!(
                "judge '{}' returned JSON that does not match the verdict shape: {}",
                self.identity.name, e
            ))
        })?;

        debug!(
            judge = %self.identity.name,
            score = verdict.score,
            "Judge verdict received"
        );
        Ok(verdict)
    }
}

/// A fixed ordered set of judges.
pub struct JudgePanel {
    judges: Vec<Arc<dyn JudgeModel>>,
}

impl JudgePanel {
    /// Create a panel from an ordered judge list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyJudgePanel`] for an empty list.
    pub fn new(judges: Vec<Arc<dyn JudgeModel>>) -> Result<Self, ConfigError> {
        if judges.is_empty() {
            return Err(ConfigError::EmptyJudgePanel);
        }
        Ok(Self { judges })
    }

    /// Build a panel of [`LlmJudge`]s from model identifiers, named
    /// "judge-1".."judge-N" in order.
    pub fn from_models(models: &[String]) -> Result<Self, ConfigError> {
        if models.is_empty() {
            return Err(ConfigError::EmptyJudgePanel);
        }
        let mut judges: Vec<Arc<dyn JudgeModel>> = Vec::with_capacity(models.len());
        for (i, model) in models.iter().enumerate() {
            let judge = LlmJudge::from_model(format!("judge-{}", i + 1), model.clone())
                .map_err(|_| ConfigError::MissingEnv(backend_env_for(model)))?;
            judges.push(Arc::new(judge));
        }
        Ok(Self { judges })
    }

    /// Number of judges on the panel.
    pub fn len(&self) -> usize {
        self.judges.len()
    }

    /// Whether the panel is empty. Always false for a constructed panel.
    pub fn is_empty(&self) -> bool {
        self.judges.is_empty()
    }

    /// Iterate judges in panel order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn JudgeModel>> {
        self.judges.iter()
    }
}

/// The env var a model's backend reads its credential from.
fn backend_env_for(model: &str) -> &'static str {
    match crate::llm::backend_for_model(model) {
        crate::llm::BackendKind::Anthropic => "ANTHROPIC_API_KEY",
        _ => "LLM_API_BASE",
    }
}

/// Validate a raw verdict into a [`JudgeScore`].
///
/// The contract: `score` is finite and already within [0,1], `rationale` is
/// non-empty. A score that clamping to [0,1] would change indicates a bug in
/// the judge or criterion implementation and fails loudly as a
/// [`ScoringError::ContractViolation`]; it is never clamped into validity.
pub fn validate_verdict(
    criterion: &str,
    judge: &str,
    verdict: JudgeVerdict,
    model: &str,
) -> Result<JudgeScore, ScoringError> {
    let violation = |detail: String| ScoringError::ContractViolation {
        criterion: criterion.to_string(),
        judge: judge.to_string(),
        detail,
    };

    if !verdict.score.is_finite() {
        return Err(violation(format!("non-finite score {}", verdict.score)));
    }

    let clamped = verdict.score.clamp(0.0, 1.0);
    if clamped != verdict.score {
        return Err(violation(format!(
            "score {} outside [0,1]; clamping would change it to {}",
            verdict.score, clamped
        )));
    }

    let rationale = verdict.rationale.trim();
    if rationale.is_empty() {
        return Err(violation("empty rationale".to_string()));
    }

    Ok(JudgeScore {
        judge: judge.to_string(),
        model: model.to_string(),
        score: verdict.score,
        rationale: rationale.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(score: f64, rationale: &str) -> JudgeVerdict {
        JudgeVerdict {
            score,
            rationale: rationale.to_string(),
        }
    }

    #[test]
    fn test_valid_verdict_passes() {
        let score =
            validate_verdict("diff-similarity", "judge-1", verdict(0.85, "close match"), "gpt-5.2")
                .unwrap();
        assert_eq!(score.judge, "judge-1");
        assert_eq!(score.model, "gpt-5.2");
        assert_eq!(score.score, 0.85);
        assert_eq!(score.rationale, "close match");
    }

    #[test]
    fn test_boundary_scores_pass() {
        assert!(validate_verdict("c", "j", verdict(0.0, "nothing matches"), "m").is_ok());
        assert!(validate_verdict("c", "j", verdict(1.0, "exact"), "m").is_ok());
    }

    #[test]
    fn test_out_of_range_score_is_contract_violation() {
        let err = validate_verdict("c", "j", verdict(1.2, "too generous"), "m").unwrap_err();
        assert!(err.is_contract_violation());

        let err = validate_verdict("c", "j", verdict(-0.1, "negative"), "m").unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_non_finite_score_is_contract_violation() {
        assert!(validate_verdict("c", "j", verdict(f64::NAN, "nan"), "m")
            .unwrap_err()
            .is_contract_violation());
        assert!(validate_verdict("c", "j", verdict(f64::INFINITY, "inf"), "m")
            .unwrap_err()
            .is_contract_violation());
    }

    #[test]
    fn test_empty_rationale_is_contract_violation() {
        assert!(validate_verdict("c", "j", verdict(0.5, ""), "m")
            .unwrap_err()
            .is_contract_violation());
        assert!(validate_verdict("c", "j", verdict(0.5, "  \n "), "m")
            .unwrap_err()
            .is_contract_violation());
    }

    #[test]
    fn test_panel_requires_at_least_one_judge() {
        assert!(matches!(
            JudgePanel::new(vec![]),
            Err(ConfigError::EmptyJudgePanel)
        ));
    }

    #[test]
    fn test_verdict_deserialization() {
        let verdict: JudgeVerdict =
            serde_json::from_str(r#"{"score": 0.33, "rationale": "partial overlap"}"#).unwrap();
        assert_eq!(verdict.score, 0.33);
        assert_eq!(verdict.rationale, "partial overlap");
    }
}
