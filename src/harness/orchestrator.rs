//! The evaluation orchestrator.
//!
//! One run walks a fixed sequence per episode: fetch the reference diff, run
//! the agent, collect the candidate diff, score every (criterion × judge)
//! pair, aggregate; after all episodes, summarize. Judges scoring the same
//! criterion are issued concurrently and joined before aggregation; the join
//! is ordering-insensitive and judge identity is preserved in the results.
//!
//! Failure policy: a judge call is retried, then excluded (a criterion left
//! with zero usable judges is flagged low-confidence, not masked); a judge
//! contract violation aborts the evaluation; an empty reference diff yields a
//! feasibility report instead of a score; an agent run that exhausts its
//! retry budget fails the run and evicts its session.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use super::agent::{AgentAdapter, AgentRequest};
use super::session::{AgentSession, SessionCache, SessionKey};
use crate::dataset::{DatasetEval, PromptSource};
use crate::error::{ConfigError, GitHubError, HarnessError};
use crate::export::{
    EpisodeExport, EvaluationRef, EvaluationRunExport, FeasibilityReport, JudgeScoreExport,
    RunStatisticsExport, ScoreResultExport,
};
use crate::github::DiffSource;
use crate::judge::{JudgePanel, JudgeScore};
use crate::retry::{RetryPolicy, RetryRunner};
use crate::scoring::aggregate::{
    aggregate_scores, AggregationSummary, CriterionScores, DEFAULT_DISAGREEMENT_LAMBDA,
};
use crate::scoring::criterion::{evaluate_validated, CriterionContext, CriterionRegistry};
use crate::stats::{
    binarize_scores, fleiss_kappa, mean, summarize_episodes, AgreementBand, BINARIZE_THRESHOLD,
};

/// Phases of one evaluation run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    FetchingReference,
    RunningAgent,
    CollectingDiff,
    Scoring,
    Aggregating,
    Summarizing,
}

impl RunPhase {
    /// Kebab-case label used in logs and feasibility reports.
    pub fn label(&self) -> &'static str {
        match self {
            RunPhase::FetchingReference => "fetching-reference",
            RunPhase::RunningAgent => "running-agent",
            RunPhase::CollectingDiff => "collecting-diff",
            RunPhase::Scoring => "scoring",
            RunPhase::Aggregating => "aggregating",
            RunPhase::Summarizing => "summarizing",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Independent episodes per evaluation. Default: 3.
    pub episodes: u32,
    /// Disagreement penalty multiplier. Default: 0.5.
    pub lambda: f64,
    /// Retry policy for judge, agent and fetch calls.
    pub retry: RetryPolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            episodes: 3,
            lambda: DEFAULT_DISAGREEMENT_LAMBDA,
            retry: RetryPolicy::default(),
        }
    }
}

impl HarnessConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.episodes < 1 {
            return Err(ConfigError::InvalidEpisodeCount);
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(ConfigError::InvalidLambda(self.lambda));
        }
        Ok(())
    }
}

/// What a run produced: a scored export, or a report explaining why the task
/// could not be evaluated.
pub enum EvaluationOutcome {
    Scored(Box<EvaluationRunExport>),
    Infeasible(FeasibilityReport),
}

/// Drives evaluations end to end.
pub struct EvaluationHarness {
    diff_source: Arc<dyn DiffSource>,
    agent: Arc<dyn AgentAdapter>,
    agent_model: String,
    panel: JudgePanel,
    registry: CriterionRegistry,
    sessions: SessionCache,
    retry: RetryRunner,
    config: HarnessConfig,
}

impl EvaluationHarness {
    /// Create a harness.
    pub fn new(
        diff_source: Arc<dyn DiffSource>,
        agent: Arc<dyn AgentAdapter>,
        agent_model: impl Into<String>,
        panel: JudgePanel,
        registry: CriterionRegistry,
        config: HarnessConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            diff_source,
            agent,
            agent_model: agent_model.into(),
            panel,
            registry,
            sessions: SessionCache::new(),
            retry: RetryRunner::new(config.retry),
            config,
        })
    }

    /// The session cache owned by this harness.
    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Run one evaluation for the configured number of episodes.
    pub async fn run_evaluation(
        &self,
        eval: &DatasetEval,
        working_dir: &Path,
    ) -> Result<EvaluationOutcome, HarnessError> {
        let (owner, repo) = eval.owner_repo()?;

        info!(eval = %eval.id, phase = %RunPhase::FetchingReference, "Fetching reference diff");
        let reference_diff = match self.fetch_reference(eval, &owner, &repo).await? {
            Ok(diff) => diff,
            Err(report) => return Ok(EvaluationOutcome::Infeasible(report)),
        };

        let prompt = self.resolve_prompt(eval, &owner, &repo).await;
        let session_key = SessionKey::new(working_dir, self.agent_model.clone());

        let mut episodes = Vec::with_capacity(self.config.episodes as usize);
        let mut kappa_rows: Vec<Vec<u8>> = Vec::new();

        for episode in 0..self.config.episodes {
            info!(eval = %eval.id, episode, phase = %RunPhase::RunningAgent, "Running agent");
            self.run_agent_turn(eval, &prompt, working_dir, &session_key)
                .await?;

            info!(eval = %eval.id, episode, phase = %RunPhase::CollectingDiff, "Collecting candidate diff");
            let candidate_diff = self.agent.collect_diff(working_dir).await?;

            info!(eval = %eval.id, episode, phase = %RunPhase::Scoring, "Scoring");
            let criterion_scores = self
                .score_episode(eval, working_dir, &reference_diff, &candidate_diff)
                .await?;

            info!(eval = %eval.id, episode, phase = %RunPhase::Aggregating, "Aggregating");
            for scores in &criterion_scores {
                if scores.judges.len() == self.panel.len() {
                    let raw: Vec<f64> = scores.judges.iter().map(|j| j.score).collect();
                    kappa_rows.push(binarize_scores(&raw, BINARIZE_THRESHOLD));
                }
            }
            let summary = aggregate_scores(&criterion_scores, self.config.lambda);
            for name in summary.low_confidence_criteria() {
                warn!(
                    eval = %eval.id,
                    episode, criterion = name, "No judge produced a usable score"
                );
            }
            episodes.push(build_episode(episode, &summary, &criterion_scores));
        }

        info!(eval = %eval.id, phase = %RunPhase::Summarizing, "Summarizing episodes");
        let export = self.summarize(eval, episodes, kappa_rows);
        Ok(EvaluationOutcome::Scored(Box::new(export)))
    }

    /// Fetch the reference diff under retry.
    ///
    /// Transient fetch errors burn retry attempts; a non-transient error
    /// short-circuits out of the retry loop, and an empty comparison diff
    /// becomes a feasibility report.
    async fn fetch_reference(
        &self,
        eval: &DatasetEval,
        owner: &str,
        repo: &str,
    ) -> Result<Result<String, FeasibilityReport>, HarnessError> {
        let label = format!("{}:fetch-reference", eval.id);
        let outcome = self
            .retry
            .run(&label, || async move {
                match self
                    .diff_source
                    .fetch_comparison_diff(owner, repo, &eval.from_commit, &eval.to_commit)
                    .await
                {
                    Ok(diff) => Ok(Ok(diff)),
                    Err(e) if e.is_transient() => Err(anyhow::Error::new(e)),
                    Err(e) => Ok(Err(e)),
                }
            })
            .await;

        match outcome {
            Ok(Ok(diff)) => Ok(Ok(diff)),
            Ok(Err(GitHubError::EmptyDiff { .. })) => Ok(Err(FeasibilityReport::new(
                eval.id.clone(),
                RunPhase::FetchingReference.label(),
                format!(
                    "comparison {}...{} produced an empty diff; nothing to evaluate",
                    eval.from_commit, eval.to_commit
                ),
            ))),
            Ok(Err(e)) => Err(HarnessError::GitHub(e)),
            Err(retry_err) => Err(HarnessError::FetchRetriesExhausted {
                eval: eval.id.clone(),
                reason: retry_err.to_string(),
            }),
        }
    }

    /// Run one agent turn under retry, maintaining the session cache.
    async fn run_agent_turn(
        &self,
        eval: &DatasetEval,
        prompt: &str,
        working_dir: &Path,
        session_key: &SessionKey,
    ) -> Result<(), HarnessError> {
        let request = AgentRequest {
            model: self.agent_model.clone(),
            prompt: prompt.to_string(),
            working_dir: working_dir.to_path_buf(),
            log_prefix: Some(format!("[{}] ", eval.id)),
            capture_logs: true,
        };

        let label = format!("{}:agent-run", eval.id);
        let session = self.sessions.get(session_key);
        let outcome = self
            .retry
            .run(&label, || {
                let request = request.clone();
                let session = session.clone();
                async move {
                    self.agent
                        .run(&request, session.as_ref())
                        .await
                        .map_err(anyhow::Error::new)
                }
            })
            .await;

        match outcome {
            Ok(_record) => {
                if session.is_none() {
                    self.sessions
                        .set(session_key.clone(), AgentSession::new());
                }
                self.sessions.record_turn(session_key);
                Ok(())
            }
            Err(retry_err) => {
                // A failed turn poisons the session; start fresh next time.
                self.sessions.evict(session_key);
                Err(HarnessError::AgentRetriesExhausted {
                    eval: eval.id.clone(),
                    reason: retry_err.to_string(),
                })
            }
        }
    }

    /// Score every criterion with the full panel, one episode.
    async fn score_episode(
        &self,
        eval: &DatasetEval,
        working_dir: &Path,
        reference_diff: &str,
        candidate_diff: &str,
    ) -> Result<Vec<CriterionScores>, HarnessError> {
        let mut results = Vec::with_capacity(eval.scores.len());

        for assignment in &eval.scores {
            let criterion = self.registry.get(&assignment.name)?;
            let ctx = CriterionContext {
                eval,
                working_dir,
                diff_source: self.diff_source.as_ref(),
                reference_diff,
                candidate_diff,
                args: &assignment.args,
            };

            let reference = criterion.prepare(&ctx).await?;
            let reference = reference.as_ref();
            let ctx = &ctx;
            let criterion = criterion.as_ref();

            // Fan out the panel; join_all preserves panel order regardless of
            // completion order.
            let judge_futures = self.panel.iter().map(|judge| {
                let judge = Arc::clone(judge);
                async move {
                    let label =
                        format!("{}:{}:{}", eval.id, assignment.name, judge.name());
                    let outcome = self
                        .retry
                        .run(&label, || {
                            let judge = Arc::clone(&judge);
                            async move {
                                match evaluate_validated(
                                    criterion,
                                    ctx,
                                    judge.as_ref(),
                                    reference,
                                )
                                .await
                                {
                                    Ok(score) => Ok(Ok(score)),
                                    Err(e) if e.is_contract_violation() => Ok(Err(e)),
                                    Err(e) => Err(anyhow::Error::new(e)),
                                }
                            }
                        })
                        .await;
                    (judge, outcome)
                }
            });

            let mut judges: Vec<JudgeScore> = Vec::with_capacity(self.panel.len());
            for (judge, outcome) in join_all(judge_futures).await {
                match outcome {
                    Ok(Ok(score)) => judges.push(score),
                    // Contract violations are implementation bugs, not noise:
                    // abort the evaluation rather than degrade.
                    Ok(Err(violation)) => return Err(HarnessError::Scoring(violation)),
                    Err(retry_err) => {
                        warn!(
                            eval = %eval.id,
                            criterion = %assignment.name,
                            judge = judge.name(),
                            error = %retry_err,
                            "Judge excluded after exhausting retries"
                        );
                    }
                }
            }

            results.push(CriterionScores {
                assignment: assignment.clone(),
                judges,
            });
        }

        Ok(results)
    }

    /// Build the agent prompt from the evaluation's prompt source.
    async fn resolve_prompt(&self, eval: &DatasetEval, owner: &str, repo: &str) -> String {
        let task = match &eval.prompt {
            PromptSource::Inline { text } => text.clone(),
            PromptSource::CommitMessage => {
                let shas = vec![eval.to_commit.clone()];
                let commits = self.diff_source.fetch_commit_diffs(owner, repo, &shas).await;
                match commits.first() {
                    Some(commit) => commit.title.clone(),
                    None => format!(
                        "Reproduce the change that landed in commit {}",
                        eval.to_commit
                    ),
                }
            }
            PromptSource::Issues => {
                if eval.issues.is_empty() {
                    format!(
                        "Reproduce the change that landed in commit {}",
                        eval.to_commit
                    )
                } else {
                    format!("Resolve the following issues: {}", eval.issues.join(", "))
                }
            }
        };

        format!(
            "You are working in a checkout of {} at commit {}.\n\n\
             Task: {}\n\n\
             Make the change directly in the working tree. Do not commit.",
            eval.repo, eval.from_commit, task
        )
    }

    /// Fold episodes into the cross-episode export.
    fn summarize(
        &self,
        eval: &DatasetEval,
        episodes: Vec<EpisodeExport>,
        kappa_rows: Vec<Vec<u8>>,
    ) -> EvaluationRunExport {
        let final_scores: Vec<f64> = episodes.iter().map(|e| e.final_score).collect();
        let base_scores: Vec<f64> = episodes.iter().map(|e| e.base_score).collect();
        let penalties: Vec<f64> = episodes.iter().map(|e| e.variance_penalty).collect();

        let kappa = fleiss_kappa(&kappa_rows);
        let statistics = RunStatisticsExport {
            summary: summarize_episodes(&final_scores),
            fleiss_kappa: kappa,
            agreement: kappa.map(AgreementBand::from_kappa),
        };

        EvaluationRunExport {
            agent: self.agent.name().to_string(),
            model: self.agent_model.clone(),
            eval_id: eval.id.clone(),
            evaluation: EvaluationRef {
                repo: eval.repo.clone(),
                from: eval.from_commit.clone(),
                to: eval.to_commit.clone(),
            },
            final_score: mean(&final_scores),
            base_score: mean(&base_scores),
            variance_penalty: mean(&penalties),
            scores: cross_episode_scores(&episodes),
            episodes,
            statistics,
            completed_at: Utc::now(),
        }
    }
}

/// Turn one episode's aggregation into its export record.
fn build_episode(
    episode: u32,
    summary: &AggregationSummary,
    criterion_scores: &[CriterionScores],
) -> EpisodeExport {
    let scores = summary
        .per_score
        .iter()
        .zip(criterion_scores)
        .map(|(aggregated, raw)| ScoreResultExport {
            assignment: aggregated.assignment.clone(),
            average_score: aggregated.average_score,
            normalized_weight: aggregated.normalized_weight,
            variance: aggregated.variance,
            judges: raw
                .judges
                .iter()
                .map(|j| JudgeScoreExport {
                    name: j.judge.clone(),
                    model: j.model.clone(),
                    score: j.score,
                    rationale: j.rationale.clone(),
                    episode,
                })
                .collect(),
            low_confidence: aggregated.judge_count == 0,
        })
        .collect();

    EpisodeExport {
        episode,
        final_score: summary.final_score,
        base_score: summary.base_score,
        variance_penalty: summary.variance_penalty,
        scores,
    }
}

/// Per-criterion means across episodes, with every judge entry kept and
/// tagged by its episode.
fn cross_episode_scores(episodes: &[EpisodeExport]) -> Vec<ScoreResultExport> {
    let Some(first) = episodes.first() else {
        return Vec::new();
    };

    (0..first.scores.len())
        .map(|i| {
            let per_episode: Vec<&ScoreResultExport> =
                episodes.iter().filter_map(|e| e.scores.get(i)).collect();
            let averages: Vec<f64> = per_episode.iter().map(|s| s.average_score).collect();
            let variances: Vec<f64> = per_episode.iter().map(|s| s.variance).collect();

            ScoreResultExport {
                assignment: first.scores[i].assignment.clone(),
                average_score: mean(&averages),
                normalized_weight: first.scores[i].normalized_weight,
                variance: mean(&variances),
                judges: per_episode
                    .iter()
                    .flat_map(|s| s.judges.iter().cloned())
                    .collect(),
                low_confidence: per_episode.iter().any(|s| s.low_confidence),
            }
        })
        .collect()
}
