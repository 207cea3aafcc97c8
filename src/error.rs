//! Error types for replay-bench operations.
//!
//! Defines error types for all major subsystems:
//! - Startup configuration and credentials
//! - Dataset loading and validation
//! - GitHub diff retrieval
//! - LLM judge API interactions
//! - Agent adapter execution
//! - Scoring and judge-contract enforcement
//! - Result export
//!
//! Recoverable conditions (transient I/O) and fatal conditions (configuration,
//! contract violations) live in separate variants so callers can pattern-match
//! instead of inspecting message strings.

use thiserror::Error;

/// Errors raised while assembling run configuration at startup.
///
/// These are always fatal: a missing credential or an invalid retry policy is
/// never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid retry policy: max_attempts must be >= 1 (got {max_attempts})")]
    InvalidRetryAttempts { max_attempts: u32 },

    #[error("Invalid retry policy: timeout must be > 0ms (got {timeout_ms}ms)")]
    InvalidRetryTimeout { timeout_ms: u64 },

    #[error("Invalid disagreement penalty lambda: must be finite and >= 0 (got {0})")]
    InvalidLambda(f64),

    #[error("Judge panel must contain at least one judge")]
    EmptyJudgePanel,

    #[error("Invalid episode count: must be >= 1")]
    InvalidEpisodeCount,
}

/// Errors that can occur while loading or validating a dataset file.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Duplicate evaluation id '{0}' found during loading")]
    DuplicateEval(String),

    #[error("Evaluation '{eval}' references unknown criterion '{criterion}'")]
    UnknownCriterion { eval: String, criterion: String },

    #[error("Evaluation '{eval}' assigns non-positive weight {weight} to criterion '{criterion}'")]
    InvalidWeight {
        eval: String,
        criterion: String,
        weight: f64,
    },

    #[error("Evaluation '{eval}' has an invalid repository slug '{repo}': expected 'owner/name'")]
    InvalidRepoSlug { eval: String, repo: String },

    #[error("Dataset file '{0}' has an unsupported extension: expected .yaml, .yml or .json")]
    UnsupportedFormat(String),

    #[error("Dataset contains no evaluations")]
    Empty,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while fetching diffs from GitHub.
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("GitHub API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Comparison {base}...{head} in {owner}/{repo} produced an empty diff")]
    EmptyDiff {
        owner: String,
        repo: String,
        base: String,
        head: String,
    },
}

impl GitHubError {
    /// Whether the error is worth retrying.
    ///
    /// An empty comparison diff is a property of the task, not of the
    /// connection, and retrying it cannot succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GitHubError::RequestFailed(_) | GitHubError::RateLimited(_) => true,
            GitHubError::ApiError { code, .. } => *code >= 500,
            GitHubError::EmptyDiff { .. } => false,
        }
    }
}

/// Errors that can occur during LLM judge calls.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("Missing API key: {0} environment variable not set")]
    MissingApiKey(&'static str),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("LLM response contained no content")]
    EmptyResponse,
}

impl LlmError {
    /// Whether the error is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::RateLimited(_) => true,
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
            // Parse failures are often a one-off formatting slip by the model.
            LlmError::ParseError(_) | LlmError::EmptyResponse => true,
            LlmError::MissingApiBase | LlmError::MissingApiKey(_) => false,
        }
    }
}

/// Errors that can occur while running a coding agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent process '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Agent process exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Agent produced malformed output: {0}")]
    MalformedOutput(String),

    #[error("Failed to collect candidate diff: {0}")]
    DiffCollection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the scoring layer.
#[derive(Debug, Error)]
pub enum ScoringError {
    /// A judge or criterion implementation broke its contract. Never retried.
    #[error("Contract violation in criterion '{criterion}' by judge '{judge}': {detail}")]
    ContractViolation {
        criterion: String,
        judge: String,
        detail: String,
    },

    #[error("Unknown criterion '{0}'")]
    UnknownCriterion(String),

    #[error("Criterion '{criterion}' failed to prepare its reference: {reason}")]
    PrepareFailed { criterion: String, reason: String },

    /// Transient judge-call failure, retried by the caller.
    #[error("Judge call failed: {0}")]
    Judge(#[from] LlmError),
}

impl ScoringError {
    /// Contract violations indicate an implementation bug and must not be
    /// retried; everything else may be.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, ScoringError::ContractViolation { .. })
    }
}

/// Errors that can occur while writing result exports.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level errors from the evaluation harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("GitHub error: {0}")]
    GitHub(#[from] GitHubError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Scoring error: {0}")]
    Scoring(#[from] ScoringError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Agent run for '{eval}' exhausted its retry budget: {reason}")]
    AgentRetriesExhausted { eval: String, reason: String },

    #[error("Reference fetch for '{eval}' exhausted its retry budget: {reason}")]
    FetchRetriesExhausted { eval: String, reason: String },
}
