//! Chat-completion endpoint abstraction, the OpenAI-compatible client, and the
//! credential-failover invoker the agent loop talks to.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ModelConfig;
use crate::error::{AgentError, Result};
use crate::fallback::{try_in_order, CredentialSet};
use crate::memory::ConversationMemory;
use crate::message::Message;
use crate::schema;

pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// A schema-constrained chat completion request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub response_format: Value,
}

/// Minimal abstraction around a chat completion provider.
///
/// The credential is passed per call so one client can serve a whole
/// credential set.
#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    async fn complete(&self, request: &ChatRequest, credential: &str) -> Result<String>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> AgentError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return AgentError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    AgentError::LanguageModel(format!("{provider} request failed with {}: {body}", status))
}

#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenAIClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| AgentError::LanguageModel(format!("http client error: {err}")))?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        Self::new(cfg.base_url.clone(), Duration::from_secs(cfg.timeout_secs))
    }
}

#[async_trait]
impl ChatEndpoint for OpenAIClient {
    async fn complete(&self, request: &ChatRequest, credential: &str) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", credential),
            )
            .json(request)
            .send()
            .await
            .map_err(|err| AgentError::LanguageModel(format!("OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "openai"));
        }

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            AgentError::LanguageModel(format!("OpenAI response parse error: {err}"))
        })?;

        let first = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::LanguageModel("OpenAI returned no choices".into()))?;

        if let Some(refusal) = first.message.refusal {
            return Err(AgentError::LanguageModel(format!(
                "OpenAI refused the request: {refusal}"
            )));
        }

        first
            .message
            .content
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AgentError::LanguageModel("OpenAI returned an empty message".into()))
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// One scripted outcome for [`StubModel`].
#[derive(Debug, Clone)]
pub enum StubReply {
    Text(String),
    Fail(String),
}

/// A call observed by [`StubModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct StubCall {
    pub credential: String,
    pub messages: Vec<Message>,
}

/// A deterministic endpoint used for tests and demos.
///
/// Each call pops the next scripted reply. Credentials registered with
/// [`StubModel::reject_credential`] fail without consuming a reply.
pub struct StubModel {
    replies: Mutex<VecDeque<StubReply>>,
    rejected: Vec<String>,
    calls: Mutex<Vec<StubCall>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self::scripted(
            responses.into_iter().map(StubReply::Text).collect(),
        ))
    }

    pub fn scripted(replies: Vec<StubReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            rejected: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reject_credential(mut self, credential: impl Into<String>) -> Self {
        self.rejected.push(credential.into());
        self
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.calls.lock().expect("stub model poisoned").clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().expect("stub model poisoned").len()
    }
}

#[async_trait]
impl ChatEndpoint for StubModel {
    async fn complete(&self, request: &ChatRequest, credential: &str) -> Result<String> {
        self.calls
            .lock()
            .expect("stub model poisoned")
            .push(StubCall {
                credential: credential.to_string(),
                messages: request.messages.clone(),
            });

        if self.rejected.iter().any(|key| key == credential) {
            return Err(AgentError::LanguageModel(
                "stub credential rejected (401)".into(),
            ));
        }

        let mut locked = self.replies.lock().expect("stub model poisoned");
        match locked.pop_front() {
            Some(StubReply::Text(text)) => Ok(text),
            Some(StubReply::Fail(message)) => Err(AgentError::LanguageModel(message)),
            None => Err(AgentError::LanguageModel(
                "StubModel ran out of scripted responses".into(),
            )),
        }
    }
}

/// Issues one schema-constrained completion per turn, walking the credential
/// set from the first key every time.
#[derive(Clone)]
pub struct ModelInvoker {
    endpoint: Arc<dyn ChatEndpoint>,
    model: String,
    credentials: CredentialSet,
    temperature: f32,
}

impl ModelInvoker {
    pub fn new(
        endpoint: Arc<dyn ChatEndpoint>,
        model: impl Into<String>,
        credentials: CredentialSet,
    ) -> Self {
        Self {
            endpoint,
            model: model.into(),
            credentials,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, memory: &ConversationMemory) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: memory.messages().to_vec(),
            temperature: self.temperature,
            response_format: schema::response_format(),
        }
    }

    /// Returns the raw decision text from the first credential that succeeds.
    pub async fn invoke(&self, memory: &ConversationMemory) -> Result<String> {
        let request = self.build_request(memory);
        let request = &request;
        let endpoint = &self.endpoint;
        let model = self.model.as_str();

        let outcome = try_in_order(self.credentials.as_slice(), move |index, key| {
            async move {
                endpoint.complete(request, key).await.map_err(|err| {
                    tracing::warn!(
                        model,
                        credential = index + 1,
                        error = %err,
                        "model credential failed"
                    );
                    err
                })
            }
        })
        .await;

        match outcome {
            Ok(success) => {
                if success.index > 0 {
                    tracing::debug!(
                        model,
                        credential = success.index + 1,
                        "model call succeeded on fallback credential"
                    );
                }
                Ok(success.value)
            }
            Err(exhausted) => Err(AgentError::AllCredentialsExhausted {
                attempts: exhausted.errors.len(),
                last: exhausted
                    .last()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "no attempt was made".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> ConversationMemory {
        let mut memory = ConversationMemory::new("system");
        memory.push_user("find cases on easements");
        memory
    }

    #[tokio::test]
    async fn falls_back_to_second_credential() {
        let stub = Arc::new(StubModel::scripted(vec![
            StubReply::Fail("401 unauthorized".into()),
            StubReply::Text("{\"ok\":true}".into()),
        ]));
        let credentials = CredentialSet::new(vec!["k1".into(), "k2".into()]).unwrap();
        let invoker = ModelInvoker::new(stub.clone(), "gpt-test", credentials);

        let text = invoker.invoke(&memory()).await.unwrap();

        assert_eq!(text, "{\"ok\":true}");
        let used: Vec<String> = stub.calls().into_iter().map(|c| c.credential).collect();
        assert_eq!(used, vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn restarts_from_first_credential_every_call() {
        let stub = Arc::new(
            StubModel::scripted(vec![
                StubReply::Text("one".into()),
                StubReply::Text("two".into()),
            ])
            .reject_credential("k1"),
        );
        let credentials = CredentialSet::new(vec!["k1".into(), "k2".into()]).unwrap();
        let invoker = ModelInvoker::new(stub.clone(), "gpt-test", credentials);

        assert_eq!(invoker.invoke(&memory()).await.unwrap(), "one");
        assert_eq!(invoker.invoke(&memory()).await.unwrap(), "two");
        let used: Vec<String> = stub.calls().into_iter().map(|c| c.credential).collect();
        assert_eq!(used, vec!["k1", "k2", "k1", "k2"]);
    }

    #[tokio::test]
    async fn exhaustion_carries_last_error() {
        let stub = Arc::new(StubModel::scripted(vec![
            StubReply::Fail("first".into()),
            StubReply::Fail("second".into()),
        ]));
        let credentials = CredentialSet::new(vec!["k1".into(), "k2".into()]).unwrap();
        let invoker = ModelInvoker::new(stub, "gpt-test", credentials);

        match invoker.invoke(&memory()).await {
            Err(AgentError::AllCredentialsExhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert!(last.contains("second"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn request_carries_schema_and_temperature() {
        let stub = Arc::new(StubModel::scripted(Vec::new()));
        let invoker = ModelInvoker::new(stub, "gpt-test", CredentialSet::single("k"))
            .with_temperature(0.0);
        let request = invoker.build_request(&memory());
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["response_format"]["type"], "json_schema");
    }

    #[test]
    fn rate_limit_is_reported() {
        let err = coalesce_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down", "openai");
        assert!(err.to_string().contains("rate limit"));
    }
}
