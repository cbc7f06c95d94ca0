//! Session-scoped access to the remote document tools.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::McpConfig;
use crate::error::{AgentError, Result};
use crate::mcp::{CallToolResult, HttpTransport, McpClient};

/// Opaque payload returned by a remote tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    payload: Value,
}

impl ToolResult {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// A result carrying a single text content item.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(json!({
            "content": [{"type": "text", "text": text.into()}],
            "isError": false
        }))
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Text content items joined by newlines; empty when there are none.
    pub fn text(&self) -> String {
        self.payload
            .get("content")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|item| item.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }

    /// Document body carried by a fetch result, if any.
    ///
    /// The text payload is itself JSON; the body lives under `content` or
    /// `document.content`. Anything else, including an empty body, is `None`.
    pub fn document_content(&self) -> Option<String> {
        let parsed: Value = serde_json::from_str(self.text().trim()).ok()?;
        ["/content", "/document/content"]
            .iter()
            .filter_map(|pointer| parsed.pointer(pointer).and_then(Value::as_str))
            .find(|body| !body.trim().is_empty())
            .map(str::to_string)
    }
}

impl fmt::Display for ToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.text();
        if text.is_empty() {
            write!(f, "{}", self.payload)
        } else {
            f.write_str(&text)
        }
    }
}

impl From<CallToolResult> for ToolResult {
    fn from(result: CallToolResult) -> Self {
        let payload = serde_json::to_value(&result).unwrap_or_else(|_| json!({ "content": [] }));
        Self::new(payload)
    }
}

/// An open session with the tool endpoint.
///
/// `close` must be called exactly once, whatever happened during the session.
#[async_trait]
pub trait ToolSession: Send {
    /// Names of the tools the endpoint exposes. Used as a liveness check.
    async fn list_capabilities(&mut self) -> Result<Vec<String>>;

    async fn invoke(&mut self, tool: &str, arguments: Value) -> Result<ToolResult>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens [`ToolSession`]s.
#[async_trait]
pub trait ToolConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ToolSession>>;
}

/// Connects to an MCP server over streamable HTTP.
#[derive(Debug, Clone)]
pub struct McpConnector {
    url: String,
    timeout: Duration,
}

impl McpConnector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    pub fn from_config(cfg: &McpConfig) -> Self {
        Self::new(cfg.url.clone(), Duration::from_secs(cfg.timeout_secs))
    }
}

#[async_trait]
impl ToolConnector for McpConnector {
    async fn connect(&self) -> Result<Box<dyn ToolSession>> {
        let transport = HttpTransport::with_timeout(&self.url, self.timeout)?;
        let mut client = McpClient::new(transport);
        let initialized = client.initialize().await.map(|_| ());
        if let Err(err) = initialized {
            // The server may have issued a session id before failing.
            if let Err(close_err) = client.close().await {
                tracing::warn!(
                    url = %self.url,
                    error = %close_err,
                    "failed to end tool session after initialize error"
                );
            }
            return Err(err);
        }
        tracing::info!(url = %self.url, "connected to tool server");
        Ok(Box::new(McpSession { client }))
    }
}

struct McpSession {
    client: McpClient<HttpTransport>,
}

#[async_trait]
impl ToolSession for McpSession {
    async fn list_capabilities(&mut self) -> Result<Vec<String>> {
        let tools = self.client.list_tools().await?;
        Ok(tools.into_iter().map(|tool| tool.name).collect())
    }

    async fn invoke(&mut self, tool: &str, arguments: Value) -> Result<ToolResult> {
        let result = self.client.call_tool(tool, arguments).await?;
        if result.is_error {
            return Err(AgentError::ToolInvocation {
                name: tool.to_string(),
                message: result.text(),
            });
        }
        Ok(result.into())
    }

    async fn close(&mut self) -> Result<()> {
        self.client.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::mcp::{test_server, ContentItem};

    #[test]
    fn extracts_top_level_content() {
        let result = ToolResult::from_text(r#"{"id":"D-1","content":"The court held..."}"#);
        assert_eq!(result.document_content().as_deref(), Some("The court held..."));
    }

    #[test]
    fn extracts_nested_document_content() {
        let result =
            ToolResult::from_text(r#"{"document":{"id":"D-1","content":"Section 12 reads..."}}"#);
        assert_eq!(
            result.document_content().as_deref(),
            Some("Section 12 reads...")
        );
    }

    #[test]
    fn missing_or_unparsable_content_is_none() {
        for text in [
            "not json at all",
            r#"{"error":"document not found"}"#,
            r#"{"content":""}"#,
            r#"{"content":42}"#,
        ] {
            assert_eq!(ToolResult::from_text(text).document_content(), None, "{text}");
        }
        assert_eq!(ToolResult::new(json!({})).document_content(), None);
    }

    #[test]
    fn displays_text_or_raw_payload() {
        assert_eq!(ToolResult::from_text("3 hits").to_string(), "3 hits");
        let raw = ToolResult::new(json!({"content": []}));
        assert_eq!(raw.to_string(), r#"{"content":[]}"#);
    }

    #[test]
    fn converts_from_mcp_result() {
        let result: ToolResult = CallToolResult {
            content: vec![ContentItem::Text {
                text: "hello".into(),
            }],
            is_error: false,
        }
        .into();
        assert_eq!(result.text(), "hello");
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn failed_initialize_still_ends_the_session() {
        let (url, seen) =
            test_server::serve(|_| test_server::Reply::status(500).with_session("sess-x")).await;
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let connector = McpConnector::new(url, Duration::from_secs(5));
        let err = match connector.connect().await {
            Ok(_) => panic!("connect should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, AgentError::Mcp(ref msg) if msg.contains("initialize")));

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.last().map(|r| r.http_method.as_str()), Some("DELETE"));
        assert_eq!(seen.last().and_then(|r| r.session.as_deref()), Some("sess-x"));

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(
            output.contains("failed to end tool session after initialize error"),
            "{output}"
        );
    }
}
