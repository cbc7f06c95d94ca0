use std::sync::Arc;
use std::time::Duration;

use docket_agent::{
    ChatEndpoint, CredentialSet, McpConnector, ModelConfig, ModelInvoker, OpenAIClient,
    ToolConnector,
};

#[tokio::test]
async fn test_openai_client_instantiation() {
    let client = OpenAIClient::from_config(&ModelConfig::default()).unwrap();
    // Usable wherever the agent expects an endpoint.
    let endpoint: Arc<dyn ChatEndpoint> = Arc::new(client);
    let invoker = ModelInvoker::new(endpoint, "gpt-4o-mini", CredentialSet::single("test-key"));
    assert_eq!(invoker.model(), "gpt-4o-mini");
}

#[tokio::test]
async fn test_mcp_connector_instantiation() {
    let connector = McpConnector::new("http://127.0.0.1:8000/mcp", Duration::from_secs(5));
    let _: Box<dyn ToolConnector> = Box::new(connector);
}
