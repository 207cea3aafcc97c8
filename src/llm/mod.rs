//! LLM provider clients used by the judge panel.
//!
//! Judges speak to models through the [`LlmProvider`] trait. Two concrete
//! clients are provided: an OpenAI-compatible chat-completions client and an
//! Anthropic messages client. The backend for a given judge model is chosen
//! by a pure function of the model identifier prefix.

mod backend;
mod client;

pub use backend::{backend_for_model, provider_for_model, AnthropicClient, BackendKind};
pub use client::{
    ChatCompletionClient, Choice, GenerationRequest, GenerationResponse, LlmProvider, Message,
    Usage,
};
