//! CLI command definitions for replay-bench.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use crate::dataset::Dataset;
use crate::export::{write_feasibility_report, write_run_export, FeasibilityReport};
use crate::github::GitHubClient;
use crate::harness::{EvaluationHarness, EvaluationOutcome, HarnessConfig, ProcessAgentAdapter};
use crate::judge::JudgePanel;
use crate::retry::RetryPolicy;
use crate::scoring::{CriterionRegistry, DEFAULT_DISAGREEMENT_LAMBDA};
use crate::stats::{summarize_episodes, AgreementBand};

/// Default agent model.
const DEFAULT_AGENT_MODEL: &str = "openai/gpt-5.2-codex";

/// Default judge panel: three models from three vendors.
const DEFAULT_JUDGE_MODELS: &str =
    "openai/gpt-5.2,anthropic/claude-opus-4.5,moonshotai/kimi-k2.5";

/// Default output directory for run exports.
const DEFAULT_OUTPUT_DIR: &str = "./results";

/// Commit-replay benchmark for autonomous coding agents.
#[derive(Parser)]
#[command(name = "replay-bench")]
#[command(about = "Replay real commits as agent tasks and score the diffs with an LLM judge panel")]
#[command(version)]
#[command(
    long_about = "replay-bench replays real commit ranges as coding tasks, runs an agent against \
each one, and scores the agent's diff against the ground-truth diff with a panel of LLM judges.\n\n\
Example usage:\n  replay-bench run --dataset ./tasks.yaml --agent-command ./my-agent --working-dir ./checkout"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a dataset of evaluations end to end.
    #[command(alias = "r")]
    Run(RunArgs),

    /// Load and validate a dataset file without running anything.
    Validate(ValidateArgs),

    /// Recompute cross-episode statistics from an existing export.
    Summarize(SummarizeArgs),
}

/// Arguments for `replay-bench run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Dataset file (.yaml, .yml or .json).
    #[arg(short, long)]
    pub dataset: PathBuf,

    /// Command to launch the coding agent.
    #[arg(long)]
    pub agent_command: String,

    /// Checkout directory the agent works in.
    #[arg(long)]
    pub working_dir: PathBuf,

    /// Model the agent uses.
    #[arg(long, default_value = DEFAULT_AGENT_MODEL)]
    pub agent_model: String,

    /// Comma-separated judge model identifiers.
    #[arg(long, default_value = DEFAULT_JUDGE_MODELS)]
    pub judge_models: String,

    /// Independent episodes per evaluation.
    #[arg(long, default_value = "3")]
    pub episodes: u32,

    /// Disagreement penalty multiplier.
    #[arg(long, default_value_t = DEFAULT_DISAGREEMENT_LAMBDA)]
    pub lambda: f64,

    /// Attempts per judge/agent/fetch call.
    #[arg(long, default_value = "3")]
    pub retries: u32,

    /// Per-attempt timeout in seconds.
    #[arg(long, default_value = "300")]
    pub timeout_secs: u64,

    /// Directory run exports are written to.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,
}

/// Arguments for `replay-bench validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Dataset file to validate.
    #[arg(short, long)]
    pub dataset: PathBuf,
}

/// Arguments for `replay-bench summarize`.
#[derive(Parser, Debug)]
pub struct SummarizeArgs {
    /// Existing run export to re-summarize.
    #[arg(short, long)]
    pub export: PathBuf,
}

/// Parse CLI arguments from the process command line.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Execute a parsed CLI invocation.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_dataset(args).await,
        Commands::Validate(args) => validate_dataset(args),
        Commands::Summarize(args) => summarize_export(args),
    }
}

async fn run_dataset(args: RunArgs) -> anyhow::Result<()> {
    let registry = CriterionRegistry::with_builtins();
    let dataset = Dataset::load(&args.dataset, &registry)?;
    info!(
        evaluations = dataset.len(),
        dataset = %args.dataset.display(),
        "Dataset loaded"
    );

    // Credentials are checked up front: a missing one fails the whole run
    // before any agent starts, rather than mid-batch.
    let github = Arc::new(GitHubClient::from_env()?);

    let judge_models: Vec<String> = args
        .judge_models
        .split(',')
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();
    let panel = JudgePanel::from_models(&judge_models)?;
    info!(judges = panel.len(), "Judge panel assembled");

    let agent = Arc::new(ProcessAgentAdapter::new("process-agent", args.agent_command));

    let config = HarnessConfig {
        episodes: args.episodes,
        lambda: args.lambda,
        retry: RetryPolicy::new(args.retries, Duration::from_secs(args.timeout_secs))?,
    };
    let harness = EvaluationHarness::new(
        github,
        agent,
        args.agent_model,
        panel,
        CriterionRegistry::with_builtins(),
        config,
    )?;

    let mut scored = 0usize;
    let mut infeasible = 0usize;
    let mut failed = 0usize;

    for eval in dataset.evals() {
        info!(eval = %eval.id, repo = %eval.repo, "Starting evaluation");
        match harness.run_evaluation(eval, &args.working_dir).await {
            Ok(EvaluationOutcome::Scored(export)) => {
                let path = args.output.join(format!("{}.json", eval.id));
                write_run_export(&path, &export)?;
                info!(
                    eval = %eval.id,
                    final_score = export.final_score,
                    path = %path.display(),
                    "Evaluation scored"
                );
                scored += 1;
            }
            Ok(EvaluationOutcome::Infeasible(report)) => {
                let path = args.output.join(format!("{}.feasibility.json", eval.id));
                write_feasibility_report(&path, &report)?;
                warn!(eval = %eval.id, reason = %report.reason, "Evaluation infeasible");
                infeasible += 1;
            }
            Err(e) => {
                // One broken task must not sink the batch: record the failure
                // and move on.
                let report =
                    FeasibilityReport::new(eval.id.clone(), "failed", e.to_string());
                let path = args.output.join(format!("{}.feasibility.json", eval.id));
                write_feasibility_report(&path, &report)?;
                error!(eval = %eval.id, error = %e, "Evaluation failed");
                failed += 1;
            }
        }
    }

    info!(scored, infeasible, failed, "Batch complete");
    Ok(())
}

fn validate_dataset(args: ValidateArgs) -> anyhow::Result<()> {
    let registry = CriterionRegistry::with_builtins();
    let dataset = Dataset::load(&args.dataset, &registry)?;

    println!("Dataset OK: {} evaluation(s)", dataset.len());
    for eval in dataset.evals() {
        let criteria: Vec<&str> = eval.scores.iter().map(|s| s.name.as_str()).collect();
        println!(
            "  {}: {} {}...{} [{}]",
            eval.id,
            eval.repo,
            eval.from_commit,
            eval.to_commit,
            criteria.join(", ")
        );
    }
    Ok(())
}

fn summarize_export(args: SummarizeArgs) -> anyhow::Result<()> {
    let export = crate::export::read_run_export(&args.export)?;
    let finals: Vec<f64> = export.episodes.iter().map(|e| e.final_score).collect();
    let summary = summarize_episodes(&finals);

    println!("{} ({} on {})", export.eval_id, export.agent, export.model);
    println!("  episodes:   {}", summary.episodes);
    println!("  mean:       {:.4}", summary.mean);
    println!("  std dev:    {:.4}", summary.std_dev);
    println!(
        "  95% CI:     [{:.4}, {:.4}]",
        summary.confidence_interval.lower, summary.confidence_interval.upper
    );
    println!(
        "  range:      [{:.4}, {:.4}] (spread {:.4})",
        summary.range.min, summary.range.max, summary.range.range
    );
    match export.statistics.fleiss_kappa {
        Some(kappa) => println!(
            "  kappa:      {:.4} ({})",
            kappa,
            AgreementBand::from_kappa(kappa)
        ),
        None => println!("  kappa:      n/a"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_defaults() {
        let cli = Cli::parse_from([
            "replay-bench",
            "run",
            "--dataset",
            "tasks.yaml",
            "--agent-command",
            "./agent",
            "--working-dir",
            "/tmp/checkout",
        ]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.episodes, 3);
                assert_eq!(args.lambda, DEFAULT_DISAGREEMENT_LAMBDA);
                assert_eq!(args.retries, 3);
                assert_eq!(args.agent_model, DEFAULT_AGENT_MODEL);
                assert_eq!(args.judge_models.split(',').count(), 3);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_run_alias() {
        let cli = Cli::parse_from([
            "replay-bench",
            "r",
            "--dataset",
            "tasks.yaml",
            "--agent-command",
            "./agent",
            "--working-dir",
            "/tmp/checkout",
        ]);
        assert!(matches!(cli.command, Commands::Run(_)));
    }
}
