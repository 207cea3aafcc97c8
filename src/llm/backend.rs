//! Judge backend selection and the Anthropic messages client.
//!
//! The original judge layer passed around duck-typed model objects; here the
//! backend is a tagged variant chosen by a pure function of the model
//! identifier prefix, and each variant maps to a concrete [`LlmProvider`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;

use super::client::{
    api_error_from_body, ChatCompletionClient, Choice, GenerationRequest, GenerationResponse,
    LlmProvider, Message, Usage,
};
use crate::error::LlmError;

/// Default Anthropic API endpoint.
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// API version header required by the Anthropic messages endpoint.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Max tokens used when a request does not specify one; the messages API
/// rejects requests without a limit.
const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Which wire protocol a judge model speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// OpenAI models via the chat-completions shape.
    OpenAi,
    /// Anthropic models via the native messages API.
    Anthropic,
    /// Anything else routed through an OpenAI-compatible gateway.
    ChatCompletion,
}

/// Select the backend for a model identifier.
///
/// Pure prefix dispatch: "anthropic/..." and "claude..." go to the Anthropic
/// messages API, "openai/..." and "gpt..." to the OpenAI shape, everything
/// else to the generic chat-completions gateway.
pub fn backend_for_model(model: &str) -> BackendKind {
    let bare = model.split('/').next_back().unwrap_or(model);
    if model.starts_with("anthropic/") || bare.starts_with("claude") {
        BackendKind::Anthropic
    } else if model.starts_with("openai/") || bare.starts_with("gpt") || bare.starts_with("o1") {
        BackendKind::OpenAi
    } else {
        BackendKind::ChatCompletion
    }
}

/// Build the provider matching a model's backend from environment
/// credentials.
///
/// Anthropic models require `ANTHROPIC_API_KEY`; everything else requires
/// `LLM_API_BASE` (with optional `LLM_API_KEY`). A missing credential is a
/// configuration failure, not a retryable condition.
pub fn provider_for_model(model: &str) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match backend_for_model(model) {
        BackendKind::Anthropic => Ok(Arc::new(AnthropicClient::from_env()?)),
        BackendKind::OpenAi | BackendKind::ChatCompletion => {
            Ok(Arc::new(ChatCompletionClient::from_env()?))
        }
    }
}

/// Client for the Anthropic messages API.
pub struct AnthropicClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            api_key,
            base_url: ANTHROPIC_BASE_URL.to_string(),
        }
    }

    /// Create a client with a custom base URL, useful for proxies and tests.
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            base_url,
            ..Self::new(api_key)
        }
    }

    /// Create a client from the `ANTHROPIC_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key =
            env::var("ANTHROPIC_API_KEY").map_err(|_| LlmError::MissingApiKey("ANTHROPIC_API_KEY"))?;
        Ok(Self::new(api_key))
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Internal request structure for the messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

/// Internal response structure from the messages API.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl LlmProvider for AnthropicClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        // The messages API takes the system prompt as a top-level field.
        let (system_messages, chat_messages): (Vec<_>, Vec<_>) = request
            .messages
            .into_iter()
            .partition(|m| m.role == "system");
        let system = if system_messages.is_empty() {
            None
        } else {
            Some(
                system_messages
                    .into_iter()
                    .map(|m| m.content)
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            )
        };

        // Strip any gateway-style vendor prefix from the model id.
        let model = request
            .model
            .strip_prefix("anthropic/")
            .unwrap_or(&request.model)
            .to_string();

        let api_request = MessagesRequest {
            model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: chat_messages,
            system,
            temperature: request.temperature,
        };

        let url = format!("{}/v1/messages", self.base_url);

        let http_response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();

        if !status.is_success() {
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(api_error_from_body(status.as_u16(), &error_text));
        }

        let api_response: MessagesResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let text = api_response
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        Ok(GenerationResponse {
            model: api_response.model,
            choices: vec![Choice {
                message: Message {
                    role: "assistant".to_string(),
                    content: text,
                },
                finish_reason: api_response.stop_reason,
            }],
            usage: Usage {
                prompt_tokens: api_response.usage.input_tokens,
                completion_tokens: api_response.usage.output_tokens,
            },
        })
    }
}
