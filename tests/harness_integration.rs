//! End-to-end harness tests over stubbed collaborators.
//!
//! The diff source, agent and judges are all scripted, so these tests
//! exercise the real orchestration path (retry, fan-out, aggregation,
//! cross-episode statistics) without any network or subprocess.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use replay_bench::dataset::{DatasetEval, PromptSource};
use replay_bench::error::{AgentError, GitHubError, HarnessError, LlmError, ScoringError};
use replay_bench::github::{CommitDiff, DiffSource};
use replay_bench::harness::{
    AgentAdapter, AgentRequest, AgentRunOutput, AgentSession, EvaluationHarness,
    EvaluationOutcome, HarnessConfig, TokenUsage,
};
use replay_bench::judge::{JudgeModel, JudgePanel, JudgeVerdict};
use replay_bench::retry::RetryPolicy;
use replay_bench::scoring::{CriterionRegistry, ScoreAssignment};

const EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

struct StubDiffSource {
    comparison_diff: Result<String, ()>,
}

impl StubDiffSource {
    fn with_diff(diff: &str) -> Self {
        Self {
            comparison_diff: Ok(diff.to_string()),
        }
    }

    fn empty() -> Self {
        Self {
            comparison_diff: Err(()),
        }
    }
}

#[async_trait]
impl DiffSource for StubDiffSource {
    async fn fetch_comparison_diff(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<String, GitHubError> {
        match &self.comparison_diff {
            Ok(diff) => Ok(diff.clone()),
            Err(()) => Err(GitHubError::EmptyDiff {
                owner: owner.to_string(),
                repo: repo.to_string(),
                base: base.to_string(),
                head: head.to_string(),
            }),
        }
    }

    async fn fetch_commit_diffs(
        &self,
        _owner: &str,
        _repo: &str,
        shas: &[String],
    ) -> Vec<CommitDiff> {
        shas.iter()
            .map(|sha| CommitDiff {
                sha: sha.clone(),
                title: "Fix overflow in resize handler".to_string(),
                diff: "+fix".to_string(),
            })
            .collect()
    }
}

struct StubAgent {
    fail: bool,
    runs: AtomicU32,
}

impl StubAgent {
    fn ok() -> Self {
        Self {
            fail: false,
            runs: AtomicU32::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            runs: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl AgentAdapter for StubAgent {
    fn name(&self) -> &str {
        "stub-agent"
    }

    async fn run(
        &self,
        _request: &AgentRequest,
        _session: Option<&AgentSession>,
    ) -> Result<AgentRunOutput, AgentError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AgentError::NonZeroExit {
                code: 1,
                stderr: "agent crashed".to_string(),
            });
        }
        Ok(AgentRunOutput {
            command: "stub-agent --turn".to_string(),
            actions: vec![],
            usage: TokenUsage::default(),
            log: None,
        })
    }

    async fn collect_diff(&self, _working_dir: &Path) -> Result<String, AgentError> {
        Ok("--- a/widget.rs\n+++ b/widget.rs\n+candidate change".to_string())
    }
}

/// Scripted judge: one score for diff-similarity prompts, another for
/// intent-alignment prompts, distinguished by prompt text.
struct StubJudge {
    name: String,
    diff_score: f64,
    intent_score: f64,
}

impl StubJudge {
    fn new(name: &str, diff_score: f64, intent_score: f64) -> Arc<dyn JudgeModel> {
        Arc::new(Self {
            name: name.to_string(),
            diff_score,
            intent_score,
        })
    }
}

#[async_trait]
impl JudgeModel for StubJudge {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "stub-model"
    }

    async fn invoke_text(&self, _prompt: &str) -> Result<String, LlmError> {
        Ok("text".to_string())
    }

    async fn invoke_verdict(&self, prompt: &str) -> Result<JudgeVerdict, LlmError> {
        let score = if prompt.contains("INTENT") {
            self.intent_score
        } else {
            self.diff_score
        };
        Ok(JudgeVerdict {
            score,
            rationale: format!("{} scored {}", self.name, score),
        })
    }
}

/// Judge whose calls always fail with a transient error.
struct BrokenJudge {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl JudgeModel for BrokenJudge {
    fn name(&self) -> &str {
        "broken-judge"
    }

    fn model(&self) -> &str {
        "stub-model"
    }

    async fn invoke_text(&self, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::RequestFailed("connection reset".to_string()))
    }

    async fn invoke_verdict(&self, _prompt: &str) -> Result<JudgeVerdict, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(LlmError::RequestFailed("connection reset".to_string()))
    }
}

/// Judge that returns an out-of-range score: a contract violation.
struct RogueJudge;

#[async_trait]
impl JudgeModel for RogueJudge {
    fn name(&self) -> &str {
        "rogue-judge"
    }

    fn model(&self) -> &str {
        "stub-model"
    }

    async fn invoke_text(&self, _prompt: &str) -> Result<String, LlmError> {
        Ok("text".to_string())
    }

    async fn invoke_verdict(&self, _prompt: &str) -> Result<JudgeVerdict, LlmError> {
        Ok(JudgeVerdict {
            score: 1.5,
            rationale: "overenthusiastic".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn eval_two_criteria() -> DatasetEval {
    DatasetEval {
        id: "widgets-1".to_string(),
        repo: "octo/widgets".to_string(),
        from_commit: "abc123".to_string(),
        to_commit: "def456".to_string(),
        prompt: PromptSource::Inline {
            text: "Fix the overflow bug.".to_string(),
        },
        issues: vec![],
        scores: vec![
            ScoreAssignment::new("diff-similarity"),
            ScoreAssignment::new("intent-alignment"),
        ],
    }
}

fn config(episodes: u32) -> HarnessConfig {
    HarnessConfig {
        episodes,
        lambda: 0.5,
        retry: RetryPolicy::new(2, Duration::from_secs(5)).unwrap(),
    }
}

fn harness(
    diff_source: StubDiffSource,
    agent: Arc<dyn AgentAdapter>,
    judges: Vec<Arc<dyn JudgeModel>>,
    episodes: u32,
) -> EvaluationHarness {
    EvaluationHarness::new(
        Arc::new(diff_source),
        agent,
        "stub-model",
        JudgePanel::new(judges).unwrap(),
        CriterionRegistry::with_builtins(),
        config(episodes),
    )
    .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scored_run_matches_aggregation_arithmetic() {
    // Criterion diff-similarity: all judges 1.0. Criterion intent-alignment:
    // judges [1, 0, 0]. Equal weights, lambda 0.5: final = 11/18 per episode.
    let judges = vec![
        StubJudge::new("judge-1", 1.0, 1.0),
        StubJudge::new("judge-2", 1.0, 0.0),
        StubJudge::new("judge-3", 1.0, 0.0),
    ];
    let agent: Arc<dyn AgentAdapter> = Arc::new(StubAgent::ok());
    let harness = harness(StubDiffSource::with_diff("+ref"), agent, judges, 2);

    let outcome = harness
        .run_evaluation(&eval_two_criteria(), Path::new("/tmp/checkout"))
        .await
        .unwrap();

    let export = match outcome {
        EvaluationOutcome::Scored(export) => export,
        EvaluationOutcome::Infeasible(report) => {
            panic!("unexpected infeasibility: {}", report.reason)
        }
    };

    assert_eq!(export.episodes.len(), 2);
    for episode in &export.episodes {
        assert!((episode.base_score - 2.0 / 3.0).abs() < EPSILON);
        assert!((episode.variance_penalty - 1.0 / 18.0).abs() < EPSILON);
        assert!((episode.final_score - 11.0 / 18.0).abs() < EPSILON);
    }

    // Identical episodes: the cross-episode mean equals the episode value and
    // the spread collapses.
    assert!((export.final_score - 11.0 / 18.0).abs() < EPSILON);
    assert_eq!(export.statistics.summary.std_dev, 0.0);
    assert!(
        (export.statistics.summary.confidence_interval.lower - 11.0 / 18.0).abs() < EPSILON
    );

    // Judge identity is preserved in panel order.
    let intent = &export.episodes[0].scores[1];
    let names: Vec<&str> = intent.judges.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, vec!["judge-1", "judge-2", "judge-3"]);
    assert!((intent.average_score - 1.0 / 3.0).abs() < EPSILON);
    assert!((intent.variance - 2.0 / 9.0).abs() < EPSILON);

    // Kappa over 4 rows ([1,1,1], [1,0,0]) x 2: 0.25, "fair" agreement.
    let kappa = export.statistics.fleiss_kappa.unwrap();
    assert!((kappa - 0.25).abs() < EPSILON);

    // Root-level scores carry every episode's judge entries.
    assert_eq!(export.scores[0].judges.len(), 6);
}

#[tokio::test]
async fn session_is_reused_across_episodes() {
    let judges = vec![StubJudge::new("judge-1", 0.8, 0.8)];
    let agent: Arc<dyn AgentAdapter> = Arc::new(StubAgent::ok());
    let harness = harness(StubDiffSource::with_diff("+ref"), agent, judges, 3);

    harness
        .run_evaluation(&eval_two_criteria(), Path::new("/tmp/checkout"))
        .await
        .unwrap();

    assert_eq!(harness.sessions().len(), 1);
    let key = replay_bench::harness::SessionKey::new("/tmp/checkout", "stub-model");
    assert_eq!(harness.sessions().get(&key).unwrap().turns, 3);
}

#[tokio::test]
async fn empty_reference_diff_is_infeasible_not_fatal() {
    let judges = vec![StubJudge::new("judge-1", 1.0, 1.0)];
    let agent: Arc<dyn AgentAdapter> = Arc::new(StubAgent::ok());
    let harness = harness(StubDiffSource::empty(), agent, judges, 1);

    let outcome = harness
        .run_evaluation(&eval_two_criteria(), Path::new("/tmp/checkout"))
        .await
        .unwrap();

    match outcome {
        EvaluationOutcome::Infeasible(report) => {
            assert_eq!(report.phase, "fetching-reference");
            assert!(report.reason.contains("empty diff"));
        }
        EvaluationOutcome::Scored(_) => panic!("empty diff must not score"),
    }
}

#[tokio::test]
async fn permanently_failing_judge_is_excluded() {
    let broken_calls = Arc::new(AtomicU32::new(0));
    let judges: Vec<Arc<dyn JudgeModel>> = vec![
        StubJudge::new("judge-1", 0.6, 0.6),
        Arc::new(BrokenJudge {
            calls: Arc::clone(&broken_calls),
        }),
        StubJudge::new("judge-3", 0.8, 0.8),
    ];
    let agent: Arc<dyn AgentAdapter> = Arc::new(StubAgent::ok());
    let harness = harness(StubDiffSource::with_diff("+ref"), agent, judges, 1);

    let outcome = harness
        .run_evaluation(&eval_two_criteria(), Path::new("/tmp/checkout"))
        .await
        .unwrap();

    let export = match outcome {
        EvaluationOutcome::Scored(export) => export,
        EvaluationOutcome::Infeasible(_) => panic!("run should score"),
    };

    // The broken judge burned its full retry budget on each criterion...
    assert_eq!(broken_calls.load(Ordering::SeqCst), 4);

    // ...and was excluded from the statistics without failing the criterion.
    let diff = &export.episodes[0].scores[0];
    assert_eq!(diff.judges.len(), 2);
    assert!((diff.average_score - 0.7).abs() < EPSILON);
    assert!(!diff.low_confidence);

    // No complete panel rows means kappa is unavailable, not fabricated.
    assert!(export.statistics.fleiss_kappa.is_none());
}

#[tokio::test]
async fn contract_violation_aborts_the_evaluation() {
    let judges: Vec<Arc<dyn JudgeModel>> =
        vec![StubJudge::new("judge-1", 0.9, 0.9), Arc::new(RogueJudge)];
    let agent: Arc<dyn AgentAdapter> = Arc::new(StubAgent::ok());
    let harness = harness(StubDiffSource::with_diff("+ref"), agent, judges, 1);

    let result = harness
        .run_evaluation(&eval_two_criteria(), Path::new("/tmp/checkout"))
        .await;

    match result {
        Err(HarnessError::Scoring(err)) => {
            assert!(matches!(err, ScoringError::ContractViolation { .. }));
        }
        other => panic!("expected contract violation, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn agent_exhausting_retries_fails_and_evicts_session() {
    let judges = vec![StubJudge::new("judge-1", 1.0, 1.0)];
    let agent = Arc::new(StubAgent::failing());
    let agent_dyn: Arc<dyn AgentAdapter> = Arc::clone(&agent) as Arc<dyn AgentAdapter>;
    let harness = harness(StubDiffSource::with_diff("+ref"), agent_dyn, judges, 1);

    let result = harness
        .run_evaluation(&eval_two_criteria(), Path::new("/tmp/checkout"))
        .await;

    assert!(matches!(
        result,
        Err(HarnessError::AgentRetriesExhausted { .. })
    ));
    // Two attempts per the retry policy, then the session entry is gone.
    assert_eq!(agent.runs.load(Ordering::SeqCst), 2);
    assert!(harness.sessions().is_empty());
}
