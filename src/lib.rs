//! A bounded-turn agent that researches legal documents through a remote
//! search tool server.
//!
//! The crate provides:
//! - A strict decision contract for the model (`Decision`, `action_schema`).
//! - A chat endpoint abstraction with ordered credential failover (`ChatEndpoint`, `ModelInvoker`).
//! - An MCP client and a session-scoped tool bridge (`McpClient`, `ToolConnector`).
//! - An `Agent` that runs at most five search/fetch/finish turns and always returns a `RunResult`.

mod agent;
mod bridge;
mod config;
mod error;
mod fallback;
mod journal;
mod llm;
pub mod mcp;
mod memory;
mod message;
mod sanitize;
mod schema;
mod telemetry;

pub use agent::{
    collect_thoughts, evidence_header, Agent, RunContext, RunRequest, RunResult, RunState,
    CORRECTIVE_PROMPT, MAX_EVIDENCE_CHARS, MAX_TURNS, TRUNCATION_MARKER,
};
pub use bridge::{McpConnector, ToolConnector, ToolResult, ToolSession};
pub use config::{AppConfig, JournalConfig, McpConfig, ModelConfig, PromptConfig, ToolNames};
pub use error::{AgentError, Result};
pub use fallback::{try_in_order, CredentialSet, Exhausted, Fallback};
pub use journal::{
    FailureJournal, FailureRecord, FileJournal, MemoryJournal, NoopJournal, ToolCallRecord,
};
pub use llm::{
    ChatEndpoint, ChatRequest, ModelInvoker, OpenAIClient, StubCall, StubModel, StubReply,
    DEFAULT_TEMPERATURE,
};
pub use memory::ConversationMemory;
pub use message::{Message, Role};
pub use sanitize::{clamp_term, fetch_arguments, resolve_document_id, sanitize_search, MAX_TERM_WORDS};
pub use schema::{action_schema, response_format, Decision, DecisionArguments, ToolName};
pub use telemetry::init_tracing;
