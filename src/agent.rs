use std::borrow::Cow;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use crate::bridge::{ToolConnector, ToolResult, ToolSession};
use crate::config::ToolNames;
use crate::error::{AgentError, Result};
use crate::fallback::CredentialSet;
use crate::journal::{FailureJournal, FailureRecord, NoopJournal, ToolCallRecord};
use crate::llm::{ChatEndpoint, ModelInvoker, DEFAULT_TEMPERATURE};
use crate::memory::ConversationMemory;
use crate::sanitize::{fetch_arguments, resolve_document_id, sanitize_search, MAX_TERM_WORDS};
use crate::schema::{Decision, ToolName};

/// Hard cap on model turns per run.
pub const MAX_TURNS: usize = 5;
/// Longest document body returned as evidence, in characters.
pub const MAX_EVIDENCE_CHARS: usize = 1_000_000;
pub const TRUNCATION_MARKER: &str = "\n...[TRUNCATED]";

pub const CORRECTIVE_PROMPT: &str = "Your previous response was not valid JSON matching the required schema. \
Reply with a single JSON object containing \"thought\", \"tool_name\" and \"arguments\".";

const MISSING_DOCUMENT_ID_PROMPT: &str = "fetch_full needs `document_id` (or `alt_document_id`). \
Pick an identifier from the search results and try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub original_query: String,
}

/// Everything one run needs from its caller.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub instruction: String,
    pub context: RunContext,
    pub base_system_prompt: String,
    /// Only the first model is used.
    pub models: Vec<String>,
    pub credentials: Vec<String>,
}

impl RunRequest {
    pub fn new(instruction: impl Into<String>, original_query: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            context: RunContext {
                original_query: original_query.into(),
            },
            base_system_prompt: String::new(),
            models: Vec::new(),
            credentials: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_system_prompt = prompt.into();
        self
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_credentials<I, S>(mut self, credentials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.credentials = credentials.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_credential(self, credential: impl Into<String>) -> Self {
        self.with_credentials([credential.into()])
    }
}

/// Outcome of one run. Always produced, never an error.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunResult {
    pub model: String,
    pub evidence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Running { turn: usize },
    Finished { evidence_found: bool },
    FinishedPartial,
    Failed { reason: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running { .. })
    }
}

/// Drives a model through search/fetch/finish decisions against a remote
/// document tool server.
pub struct Agent {
    endpoint: Arc<dyn ChatEndpoint>,
    connector: Arc<dyn ToolConnector>,
    journal: Arc<dyn FailureJournal>,
    tools: ToolNames,
    temperature: f32,
}

impl Agent {
    pub fn new(endpoint: Arc<dyn ChatEndpoint>, connector: Arc<dyn ToolConnector>) -> Self {
        Self {
            endpoint,
            connector,
            journal: Arc::new(NoopJournal),
            tools: ToolNames::default(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn FailureJournal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_tool_names(mut self, tools: ToolNames) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Run one bounded search session and report what it found.
    pub async fn run(&self, request: RunRequest) -> RunResult {
        let model = request.models.first().cloned().unwrap_or_default();
        let span = tracing::info_span!("agent_run", model = %model);
        self.run_inner(model, request).instrument(span).await
    }

    async fn run_inner(&self, model: String, request: RunRequest) -> RunResult {
        if model.is_empty() {
            return self.fail_before_start(model, AgentError::NoModel);
        }
        let credentials = match CredentialSet::new(request.credentials.clone()) {
            Ok(credentials) => credentials,
            Err(err) => return self.fail_before_start(model, err),
        };

        let session = match self.connector.connect().await {
            Ok(session) => session,
            Err(err) => return self.fail_before_start(model, err),
        };

        tracing::info!(
            credentials = credentials.len(),
            query = %request.context.original_query,
            "agent run started"
        );

        let mut memory = ConversationMemory::new(system_prompt(&request.base_system_prompt));
        memory.push_user(task_prompt(&request));

        let mut run = Run {
            invoker: ModelInvoker::new(self.endpoint.clone(), model, credentials)
                .with_temperature(self.temperature),
            session,
            memory,
            tools: self.tools.clone(),
            evidence: None,
            last_call: None,
            last_response: None,
        };

        let state = match AssertUnwindSafe(run.drive()).catch_unwind().await {
            Ok(state) => state,
            Err(_) => RunState::Failed {
                reason: "agent loop panicked".into(),
            },
        };

        if let Err(err) = run.session.close().await {
            tracing::warn!(error = %err, "failed to close tool session");
        }

        tracing::info!(state = ?state, "agent run finished");
        run.into_result(state, self.journal.as_ref())
    }

    fn fail_before_start(&self, model: String, err: AgentError) -> RunResult {
        let reason = err.to_string();
        tracing::warn!(reason = %reason, "agent run could not start");
        self.journal.record(&FailureRecord::new(&model, &reason));
        RunResult {
            model,
            evidence: String::new(),
            reason: Some(reason),
            failed: true,
        }
    }
}

enum ToolReply {
    Output(ToolResult),
    Failed(String),
}

/// State owned by a single run: the transcript, the open tool session and
/// whatever evidence has been collected.
struct Run {
    invoker: ModelInvoker,
    session: Box<dyn ToolSession>,
    memory: ConversationMemory,
    tools: ToolNames,
    evidence: Option<String>,
    last_call: Option<ToolCallRecord>,
    last_response: Option<String>,
}

impl Run {
    async fn drive(&mut self) -> RunState {
        match self.session.list_capabilities().await {
            Ok(names) => {
                for wanted in [&self.tools.search, &self.tools.fetch] {
                    if !names.iter().any(|name| name == wanted) {
                        tracing::warn!(tool = %wanted, available = ?names, "tool server does not list tool");
                    }
                }
            }
            Err(err) => tracing::warn!(error = %err, "tool server capability listing failed"),
        }

        let mut state = RunState::Running { turn: 0 };
        while let RunState::Running { turn } = state {
            if turn >= MAX_TURNS {
                state = RunState::FinishedPartial;
                break;
            }
            let span = tracing::debug_span!("turn", turn = turn + 1);
            state = match self.step(turn).instrument(span).await {
                Ok(next) => next,
                Err(err) => RunState::Failed {
                    reason: err.to_string(),
                },
            };
        }
        state
    }

    /// One turn: ask the model, act on its decision, report the next state.
    ///
    /// Errors returned from here end the run.
    async fn step(&mut self, turn: usize) -> Result<RunState> {
        let next = RunState::Running { turn: turn + 1 };

        let raw = self.invoker.invoke(&self.memory).await?;
        let decision = match Decision::parse(&raw) {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(error = %err, "model response was not a valid decision");
                self.memory.push_user(CORRECTIVE_PROMPT);
                return Ok(next);
            }
        };
        tracing::debug!(
            tool = decision.tool_name.as_str(),
            thought = %decision.thought,
            "model decision"
        );
        self.memory.push_assistant(raw);

        match decision.tool_name {
            ToolName::Finish => Ok(RunState::Finished {
                evidence_found: false,
            }),
            ToolName::Search => {
                let tool = self.tools.search.clone();
                let arguments = Value::Object(sanitize_search(&decision.arguments));
                let reply = match self.call_tool(&tool, arguments).await? {
                    ToolReply::Output(result) => result.to_string(),
                    ToolReply::Failed(message) => message,
                };
                self.memory.push_user(reply);
                Ok(next)
            }
            ToolName::FetchFull => {
                let Some(document_id) = resolve_document_id(&decision.arguments) else {
                    self.memory.push_user(MISSING_DOCUMENT_ID_PROMPT);
                    return Ok(next);
                };
                let tool = self.tools.fetch.clone();
                let arguments = Value::Object(fetch_arguments(&document_id));
                match self.call_tool(&tool, arguments).await? {
                    ToolReply::Output(result) => match result.document_content() {
                        Some(content) => {
                            self.evidence = Some(format_evidence(
                                self.invoker.model(),
                                &document_id,
                                &content,
                            ));
                            Ok(RunState::Finished {
                                evidence_found: true,
                            })
                        }
                        None => {
                            tracing::warn!(document_id = %document_id, "fetch returned no document content");
                            self.memory.push_user(result.to_string());
                            Ok(next)
                        }
                    },
                    ToolReply::Failed(message) => {
                        self.memory.push_user(message);
                        Ok(next)
                    }
                }
            }
        }
    }

    /// Remote tool failures come back as [`ToolReply::Failed`] so the model
    /// can adapt; transport failures are returned as errors.
    async fn call_tool(&mut self, tool: &str, arguments: Value) -> Result<ToolReply> {
        self.last_call = Some(ToolCallRecord {
            tool: tool.to_string(),
            arguments: arguments.clone(),
        });
        self.last_response = None;

        match self.session.invoke(tool, arguments).await {
            Ok(result) => {
                self.last_response = Some(result.to_string());
                Ok(ToolReply::Output(result))
            }
            Err(AgentError::ToolInvocation { name, message }) => {
                tracing::warn!(tool = %name, error = %message, "tool call failed");
                self.last_response = Some(message.clone());
                Ok(ToolReply::Failed(format!("Tool `{name}` failed: {message}")))
            }
            Err(err) => Err(err),
        }
    }

    fn into_result(self, state: RunState, journal: &dyn FailureJournal) -> RunResult {
        let model = self.invoker.model().to_string();
        let evidence = self
            .evidence
            .or_else(|| collect_thoughts(&self.memory))
            .unwrap_or_default();

        let reason = match state {
            RunState::Finished { .. } | RunState::FinishedPartial => {
                return RunResult {
                    model,
                    evidence,
                    reason: None,
                    failed: false,
                };
            }
            RunState::Failed { reason } => reason,
            RunState::Running { turn } => {
                format!("agent loop stopped in turn {turn} without reaching a terminal state")
            }
        };

        let mut record = FailureRecord::new(&model, &reason);
        record.last_tool_call = self.last_call;
        record.last_tool_response = self.last_response;
        journal.record(&record);
        RunResult {
            model,
            evidence,
            reason: Some(reason),
            failed: true,
        }
    }
}

/// Thoughts from every assistant turn that parses as a decision, one per line.
pub fn collect_thoughts(memory: &ConversationMemory) -> Option<String> {
    let thoughts: Vec<String> = memory
        .assistant_turns()
        .filter_map(|turn| Decision::parse(turn).ok())
        .map(|decision| decision.thought)
        .filter(|thought| !thought.trim().is_empty())
        .collect();
    if thoughts.is_empty() {
        None
    } else {
        Some(thoughts.join("\n"))
    }
}

fn cap_chars(content: &str, max: usize) -> Cow<'_, str> {
    match content.char_indices().nth(max) {
        Some((cut, _)) => {
            tracing::warn!(limit = max, "document content truncated");
            Cow::Owned(format!("{}{}", &content[..cut], TRUNCATION_MARKER))
        }
        None => Cow::Borrowed(content),
    }
}

pub fn evidence_header(model: &str, document_id: &str) -> String {
    format!("[Evidence from model {model}, document {document_id}]\n\n")
}

fn format_evidence(model: &str, document_id: &str, content: &str) -> String {
    let mut evidence = evidence_header(model, document_id);
    evidence.push_str(&cap_chars(content, MAX_EVIDENCE_CHARS));
    evidence
}

fn system_prompt(base: &str) -> String {
    let mut prompt = String::new();
    if !base.trim().is_empty() {
        prompt.push_str(base.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str("You search a legal document database one step at a time.\n");
    prompt.push_str("Every reply must be a single JSON object with the fields `thought`, `tool_name` and `arguments`.\n");
    prompt.push_str("Available tools:\n");
    prompt.push_str(&format!(
        "- search: find documents matching `arguments.term` (at most {MAX_TERM_WORDS} words).\n"
    ));
    prompt.push_str("- fetch_full: retrieve the full text of `arguments.document_id` (or `arguments.alt_document_id`).\n");
    prompt.push_str("- finish: stop when nothing more can be found.\n");
    prompt.push_str(&format!(
        "You have at most {MAX_TURNS} turns. Record what you learn in `thought`.\n"
    ));
    prompt
}

fn task_prompt(request: &RunRequest) -> String {
    format!(
        "{}\n\nOriginal query: {}",
        request.instruction.trim(),
        request.context.original_query.trim()
    )
}
