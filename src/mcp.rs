//! MCP (Model Context Protocol) client support.
//!
//! The document search server speaks JSON-RPC 2.0 over the streamable HTTP
//! transport: every request is a POST, the server may answer with either a
//! JSON body or a short server-sent-event stream, and a session id issued on
//! `initialize` is echoed on every later request.
//!
//! # Example
//! ```rust,ignore
//! use docket_agent::mcp::{HttpTransport, McpClient};
//!
//! let mut client = McpClient::new(HttpTransport::new("http://127.0.0.1:8000/mcp"));
//! client.initialize().await?;
//! let tools = client.list_tools().await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{AgentError, Result};

pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SESSION_HEADER: &str = "mcp-session-id";

// ─────────────────────────────────────────────────────────────────────────────
// MCP Protocol Types
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC request structure. Notifications carry no id.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response structure
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn is_reply_to(&self, id: u64) -> bool {
        self.id == Some(id) && (self.result.is_some() || self.error.is_some())
    }
}

/// JSON-RPC error
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// MCP Tool definition from a server
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// MCP list_tools response
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpToolDefinition>,
}

/// MCP call_tool result content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    #[serde(rename = "resource")]
    Resource { resource: Value },
    #[serde(other)]
    Unsupported,
}

/// MCP call_tool result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// All text items joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// MCP server capabilities
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
}

/// MCP initialize result
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP server info
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Transport layer for MCP communication
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and receive its response
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification; no response is expected
    async fn notify(&self, request: JsonRpcRequest) -> Result<()>;

    /// Close the transport
    async fn close(&self) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Streamable HTTP Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Transport that talks to an MCP server over streamable HTTP
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    request_id: AtomicU64,
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Create a transport whose requests give up after `timeout`
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Mcp(format!("http client error: {}", e)))?;
        Ok(Self::with_client(client, url))
    }

    fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            request_id: AtomicU64::new(1),
            session_id: RwLock::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn post(&self, request: &JsonRpcRequest) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(request);
        if let Some(session) = self.session_id.read().await.as_deref() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AgentError::Mcp(format!("HTTP request failed: {}", e)))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            *self.session_id.write().await = Some(session.to_string());
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Mcp(format!(
                "`{}` failed with {}: {}",
                request.method, status, body
            )));
        }

        Ok(response)
    }
}

/// Pull the response to request `id` out of a server-sent-event body.
fn parse_event_stream(body: &str, id: u64) -> Result<JsonRpcResponse> {
    let mut data = String::new();
    let mut events = Vec::new();
    for line in body.lines() {
        if line.trim().is_empty() {
            if !data.is_empty() {
                events.push(std::mem::take(&mut data));
            }
            continue;
        }
        if let Some(chunk) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(chunk.strip_prefix(' ').unwrap_or(chunk));
        }
    }
    if !data.is_empty() {
        events.push(data);
    }

    events
        .iter()
        .filter_map(|event| serde_json::from_str::<JsonRpcResponse>(event).ok())
        .find(|response| response.is_reply_to(id))
        .ok_or_else(|| AgentError::Mcp(format!("no response to request {id} in event stream")))
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        // Assign a unique request ID
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        request.id = Some(id);

        let response = self.post(&request).await?;
        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("text/event-stream"))
            .unwrap_or(false);

        let body = response
            .text()
            .await
            .map_err(|e| AgentError::Mcp(format!("Failed to read response: {}", e)))?;

        if is_event_stream {
            parse_event_stream(&body, id)
        } else {
            serde_json::from_str(&body)
                .map_err(|e| AgentError::Mcp(format!("Failed to parse response: {}", e)))
        }
    }

    async fn notify(&self, mut request: JsonRpcRequest) -> Result<()> {
        request.id = None;
        self.post(&request).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(session) = self.session_id.write().await.take() else {
            return Ok(());
        };

        let response = self
            .client
            .delete(&self.url)
            .header(SESSION_HEADER, session)
            .send()
            .await
            .map_err(|e| AgentError::Mcp(format!("Failed to end MCP session: {}", e)))?;

        // Servers that do not support client-initiated termination answer 405.
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            Ok(())
        } else {
            Err(AgentError::Mcp(format!(
                "MCP session termination failed with {}",
                status
            )))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP Client
// ─────────────────────────────────────────────────────────────────────────────

/// MCP client for connecting to MCP servers
pub struct McpClient<T: McpTransport> {
    transport: T,
    initialized: bool,
    server_info: Option<ServerInfo>,
    capabilities: Option<ServerCapabilities>,
}

impl<T: McpTransport> McpClient<T> {
    /// Create a new MCP client with the given transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            initialized: false,
            server_info: None,
            capabilities: None,
        }
    }

    /// Initialize the connection to the MCP server
    pub async fn initialize(&mut self) -> Result<&ServerInfo> {
        if self.initialized {
            return self
                .server_info
                .as_ref()
                .ok_or_else(|| AgentError::Mcp("Server info not available".into()));
        }

        let request = JsonRpcRequest::new(
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "docket-agent",
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
        );

        let result: InitializeResult = self.request(request, "initialize").await?;
        tracing::debug!(
            server = %result.server_info.name,
            protocol = %result.protocol_version,
            "mcp session initialized"
        );

        self.server_info = Some(result.server_info);
        self.capabilities = Some(result.capabilities);
        self.initialized = true;

        self.transport
            .notify(JsonRpcRequest::new("notifications/initialized", None))
            .await?;

        self.server_info
            .as_ref()
            .ok_or_else(|| AgentError::Mcp("Server info not available".into()))
    }

    /// List available tools from the MCP server
    pub async fn list_tools(&mut self) -> Result<Vec<McpToolDefinition>> {
        if !self.initialized {
            self.initialize().await?;
        }

        let result: ListToolsResult = self
            .request(JsonRpcRequest::new("tools/list", None), "list_tools")
            .await?;
        Ok(result.tools)
    }

    /// Call a tool on the MCP server
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        if !self.initialized {
            self.initialize().await?;
        }

        let request = JsonRpcRequest::new(
            "tools/call",
            Some(serde_json::json!({
                "name": name,
                "arguments": arguments
            })),
        );
        self.request(request, "call_tool").await
    }

    async fn request<R: serde::de::DeserializeOwned>(
        &self,
        request: JsonRpcRequest,
        label: &str,
    ) -> Result<R> {
        let response = self.transport.send(request).await?;

        if let Some(error) = response.error {
            return Err(AgentError::Mcp(format!(
                "{} failed ({}): {}",
                label, error.code, error.message
            )));
        }

        serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|e| AgentError::Mcp(format!("Failed to parse {} result: {}", label, e)))
    }

    /// Close the MCP client
    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    /// Check if the client is initialized
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Get server info if available
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.capabilities.as_ref()
    }
}
