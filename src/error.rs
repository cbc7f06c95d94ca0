use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no model credentials were supplied")]
    NoCredentials,

    #[error("no model identifier was supplied")]
    NoModel,

    #[error("all {attempts} model credentials failed; last error: {last}")]
    AllCredentialsExhausted { attempts: usize, last: String },

    #[error("model returned a malformed decision: {0}")]
    MalformedDecision(String),

    #[error("tool `{name}` invocation failed: {message}")]
    ToolInvocation { name: String, message: String },

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("mcp error: {0}")]
    Mcp(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

