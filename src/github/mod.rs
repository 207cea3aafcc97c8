//! GitHub diff retrieval.
//!
//! The harness consumes diffs through the [`DiffSource`] trait; the concrete
//! [`GitHubClient`] speaks the REST API with a required token. A comparison
//! that comes back empty is a property of the task and gets its own error; a
//! single commit's failed fetch is dropped and logged, never fatal.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::error::{ConfigError, GitHubError};

/// GitHub REST API base URL.
const GITHUB_API_BASE: &str = "https://api.github.com";

/// Media type that makes compare/commit endpoints return raw diff text.
const DIFF_MEDIA_TYPE: &str = "application/vnd.github.diff";

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// One commit's metadata and diff.
#[derive(Debug, Clone)]
pub struct CommitDiff {
    /// Commit SHA.
    pub sha: String,
    /// First line of the commit message.
    pub title: String,
    /// Raw diff text.
    pub diff: String,
}

/// Source of reference diffs for the harness.
#[async_trait]
pub trait DiffSource: Send + Sync {
    /// Fetch the diff between two commits. Guaranteed non-empty on success.
    async fn fetch_comparison_diff(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<String, GitHubError>;

    /// Fetch per-commit diffs. A commit whose fetch fails is dropped from the
    /// result, not surfaced as an error.
    async fn fetch_commit_diffs(&self, owner: &str, repo: &str, shas: &[String])
        -> Vec<CommitDiff>;
}

/// GitHub REST client.
pub struct GitHubClient {
    http_client: Client,
    api_token: String,
    api_base: String,
}

impl GitHubClient {
    /// Create a client with an explicit token.
    pub fn new(api_token: String) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .user_agent("replay-bench")
                .build()
                .expect("Failed to build HTTP client"),
            api_token,
            api_base: GITHUB_API_BASE.to_string(),
        }
    }

    /// Create a client with a custom API base, useful for proxies and tests.
    pub fn with_api_base(api_token: String, api_base: String) -> Self {
        Self {
            api_base,
            ..Self::new(api_token)
        }
    }

    /// Create a client from the `GITHUB_TOKEN` environment variable.
    ///
    /// # Errors
    ///
    /// A missing token is a fatal startup error, not a retryable condition.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_token = env::var("GITHUB_TOKEN").map_err(|_| ConfigError::MissingEnv("GITHUB_TOKEN"))?;
        Ok(Self::new(api_token))
    }

    async fn get_text(&self, url: &str, accept: &str) -> Result<String, GitHubError> {
        let response = self
            .http_client
            .get(url)
            .header("Accept", accept)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .map_err(|e| GitHubError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GitHubError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            let code = status.as_u16();
            if code == 403 || code == 429 {
                return Err(GitHubError::RateLimited(body));
            }
            return Err(GitHubError::ApiError {
                code,
                message: body,
            });
        }

        Ok(body)
    }
}

/// Commit metadata subset returned by the commits endpoint.
#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
}

#[async_trait]
impl DiffSource for GitHubClient {
    async fn fetch_comparison_diff(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<String, GitHubError> {
        let url = format!(
            "{}/repos/{}/{}/compare/{}...{}",
            self.api_base, owner, repo, base, head
        );
        let diff = self.get_text(&url, DIFF_MEDIA_TYPE).await?;

        if diff.trim().is_empty() {
            return Err(GitHubError::EmptyDiff {
                owner: owner.to_string(),
                repo: repo.to_string(),
                base: base.to_string(),
                head: head.to_string(),
            });
        }
        Ok(diff)
    }

    async fn fetch_commit_diffs(
        &self,
        owner: &str,
        repo: &str,
        shas: &[String],
    ) -> Vec<CommitDiff> {
        // Independent commits fan out; the join keeps input order.
        let fetches = shas.iter().map(|sha| self.fetch_single_commit(owner, repo, sha));
        join_all(fetches).await.into_iter().flatten().collect()
    }
}

impl GitHubClient {
    async fn fetch_single_commit(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Option<CommitDiff> {
        let url = format!("{}/repos/{}/{}/commits/{}", self.api_base, owner, repo, sha);

        let meta = match self.get_text(&url, "application/vnd.github+json").await {
            Ok(body) => match serde_json::from_str::<CommitResponse>(&body) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(sha = %sha, error = %e, "Dropping commit with unparseable metadata");
                    return None;
                }
            },
            Err(e) => {
                warn!(sha = %sha, error = %e, "Dropping commit whose metadata fetch failed");
                return None;
            }
        };

        let diff = match self.get_text(&url, DIFF_MEDIA_TYPE).await {
            Ok(diff) => diff,
            Err(e) => {
                warn!(sha = %sha, error = %e, "Dropping commit whose diff fetch failed");
                return None;
            }
        };

        let title = meta
            .commit
            .message
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();

        Some(CommitDiff {
            sha: meta.sha,
            title,
            diff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_response_parsing() {
        let body = r#"{
            "sha": "def456",
            "commit": {"message": "Fix resize overflow\n\nLonger body here."}
        }"#;
        let parsed: CommitResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.sha, "def456");
        assert_eq!(
            parsed.commit.message.lines().next().unwrap(),
            "Fix resize overflow"
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_request_failed() {
        let client =
            GitHubClient::with_api_base("token".to_string(), "http://localhost:65535".to_string());
        let result = client
            .fetch_comparison_diff("octo", "widgets", "abc", "def")
            .await;
        assert!(matches!(result, Err(GitHubError::RequestFailed(_))));
    }

    #[tokio::test]
    async fn test_commit_fetch_failures_are_dropped() {
        let client =
            GitHubClient::with_api_base("token".to_string(), "http://localhost:65535".to_string());
        let commits = client
            .fetch_commit_diffs("octo", "widgets", &["abc".to_string(), "def".to_string()])
            .await;
        assert!(commits.is_empty());
    }
}
