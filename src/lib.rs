//! replay-bench: benchmark autonomous coding agents by replaying real commits.
//!
//! A task is a real commit range in a real repository. An agent attempts the
//! change, and a panel of LLM judges scores the agent's diff against the
//! ground-truth diff. Per-criterion judge scores are averaged, criteria are
//! combined under normalized weights with a variance-based disagreement
//! penalty, and repeated episodes are summarized with confidence intervals
//! and Fleiss' kappa inter-rater agreement.

// Core modules
pub mod cli;
pub mod dataset;
pub mod error;
pub mod export;
pub mod github;
pub mod harness;
pub mod judge;
pub mod llm;
pub mod retry;
pub mod scoring;
pub mod stats;
pub mod utils;

// Re-export commonly used error types
pub use error::{
    AgentError, ConfigError, DatasetError, ExportError, GitHubError, HarnessError, LlmError,
    ScoringError,
};
