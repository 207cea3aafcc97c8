//! The coding-agent boundary.
//!
//! The harness only knows the [`AgentAdapter`] trait: run a turn, collect
//! the candidate diff. A reference [`ProcessAgentAdapter`] spawns a
//! configured command and reads a JSON run record from stdout; anything more
//! elaborate (IDE agents, API-driven agents) implements the same trait
//! elsewhere.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::session::AgentSession;
use crate::error::AgentError;

/// One turn's worth of input for an agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Model the agent should use.
    pub model: String,
    /// Task prompt.
    pub prompt: String,
    /// Checkout the agent works in.
    pub working_dir: PathBuf,
    /// Prefix for every captured log line, when set.
    pub log_prefix: Option<String>,
    /// Whether to capture the agent's log output into the run record.
    pub capture_logs: bool,
}

/// A single action the agent reported taking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAction {
    /// Action kind (e.g. "edit", "shell", "read").
    pub kind: String,
    /// Human-readable detail.
    pub detail: String,
}

/// Token/cost usage for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens consumed.
    pub input: u64,
    /// Output tokens produced.
    pub output: u64,
    /// Cost in dollars, when the adapter reports it.
    pub cost: f64,
}

/// The agent's run record for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunOutput {
    /// Command line (or equivalent) the adapter executed.
    pub command: String,
    /// Actions taken during the turn.
    #[serde(default)]
    pub actions: Vec<AgentAction>,
    /// Usage accounting.
    #[serde(default)]
    pub usage: TokenUsage,
    /// Captured log output, when requested.
    #[serde(default)]
    pub log: Option<String>,
}

/// Boundary trait for coding agents.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Adapter name, recorded in exports.
    fn name(&self) -> &str;

    /// Run one turn. `session` is the cached session for this
    /// (working directory, model) pair, if one exists; adapters that support
    /// resumable sessions pass its id through to the underlying tool.
    ///
    /// # Errors
    ///
    /// Nonzero process exit and malformed output are [`AgentError`]s; the
    /// harness retries them and evicts the session on permanent failure.
    async fn run(
        &self,
        request: &AgentRequest,
        session: Option<&AgentSession>,
    ) -> Result<AgentRunOutput, AgentError>;

    /// Collect the candidate diff from the working directory after a turn.
    ///
    /// The default shells out to `git diff` against the checkout.
    async fn collect_diff(&self, working_dir: &Path) -> Result<String, AgentError> {
        git_working_diff(working_dir).await
    }
}

/// `git diff HEAD` in `working_dir`, capturing staged and unstaged changes.
pub async fn git_working_diff(working_dir: &Path) -> Result<String, AgentError> {
    let output = Command::new("git")
        .arg("diff")
        .arg("HEAD")
        .current_dir(working_dir)
        .output()
        .await
        .map_err(|e| AgentError::DiffCollection(format!("failed to run git diff: {}", e)))?;

    if !output.status.success() {
        return Err(AgentError::DiffCollection(format!(
            "git diff exited with {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Reference adapter: spawn a command, feed it the prompt on stdin, read a
/// JSON [`AgentRunOutput`] from stdout.
///
/// The command receives `--model <model>`, `--cwd <dir>` and, when a session
/// exists, `--session <id>`.
pub struct ProcessAgentAdapter {
    name: String,
    command: String,
}

impl ProcessAgentAdapter {
    /// Create an adapter around a command.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }
}

#[async_trait]
impl AgentAdapter for ProcessAgentAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        request: &AgentRequest,
        session: Option<&AgentSession>,
    ) -> Result<AgentRunOutput, AgentError> {
        let mut command = Command::new(&self.command);
        command
            .arg("--model")
            .arg(&request.model)
            .arg("--cwd")
            .arg(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(session) = session {
            command.arg("--session").arg(&session.id);
        }

        info!(
            agent = %self.name,
            model = %request.model,
            resumed = session.is_some(),
            "Starting agent turn"
        );

        let mut child = command.spawn().map_err(|e| AgentError::SpawnFailed {
            command: self.command.clone(),
            reason: e.to_string(),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request.prompt.as_bytes()).await?;
            // Close stdin so the agent sees EOF on the prompt.
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if request.capture_logs {
            let prefix = request.log_prefix.as_deref().unwrap_or("");
            for line in stderr.lines() {
                debug!("{}{}", prefix, line);
            }
        }

        if !output.status.success() {
            return Err(AgentError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut record: AgentRunOutput = serde_json::from_str(stdout.trim())
            .map_err(|e| AgentError::MalformedOutput(format!("{}: {}", e, stdout.trim())))?;

        if request.capture_logs && record.log.is_none() {
            record.log = Some(stderr);
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_output_parsing() {
        let json = r#"{
            "command": "agent --model gpt-5.2-codex",
            "actions": [{"kind": "edit", "detail": "src/widget.rs"}],
            "usage": {"input": 1200, "output": 450, "cost": 0.02}
        }"#;
        let record: AgentRunOutput = serde_json::from_str(json).unwrap();
        assert_eq!(record.actions.len(), 1);
        assert_eq!(record.usage.output, 450);
        assert!(record.log.is_none());
    }

    #[test]
    fn test_run_output_defaults() {
        let record: AgentRunOutput = serde_json::from_str(r#"{"command": "x"}"#).unwrap();
        assert!(record.actions.is_empty());
        assert_eq!(record.usage.input, 0);
    }

    #[tokio::test]
    async fn test_missing_command_is_spawn_failure() {
        let adapter = ProcessAgentAdapter::new("ghost", "/no/such/agent-binary");
        let request = AgentRequest {
            model: "gpt-5.2-codex".to_string(),
            prompt: "fix it".to_string(),
            working_dir: std::env::temp_dir(),
            log_prefix: None,
            capture_logs: false,
        };
        let result = adapter.run(&request, None).await;
        assert!(matches!(result, Err(AgentError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_git_diff_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = git_working_diff(dir.path()).await;
        // Not a git repository: git exits nonzero (or git is absent entirely);
        // either way this must surface as DiffCollection.
        assert!(matches!(result, Err(AgentError::DiffCollection(_))));
    }
}
