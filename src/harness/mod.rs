//! Evaluation harness: sequences reference fetch, agent run, diff
//! collection, judge fan-out, aggregation and cross-episode summarization.

mod agent;
mod orchestrator;
mod session;

pub use agent::{
    AgentAction, AgentAdapter, AgentRequest, AgentRunOutput, ProcessAgentAdapter, TokenUsage,
};
pub use orchestrator::{EvaluationHarness, EvaluationOutcome, HarnessConfig, RunPhase};
pub use session::{AgentSession, SessionCache, SessionKey};
