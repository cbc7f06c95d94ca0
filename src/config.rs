use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::llm::DEFAULT_TEMPERATURE;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// Ordered model identifiers; the agent uses the first.
    #[serde(default)]
    pub models: Vec<String>,
    /// Ordered credentials, tried first to last on every turn.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            api_keys: Vec::new(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            timeout_secs: default_model_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_model_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpConfig {
    #[serde(default = "default_mcp_url")]
    pub url: String,
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            url: default_mcp_url(),
            timeout_secs: default_mcp_timeout(),
        }
    }
}

fn default_mcp_url() -> String {
    "http://127.0.0.1:8000/mcp".into()
}

fn default_mcp_timeout() -> u64 {
    300
}

/// Names of the remote tools the decisions map onto.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolNames {
    #[serde(default = "default_search_tool")]
    pub search: String,
    #[serde(default = "default_fetch_tool")]
    pub fetch: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            search: default_search_tool(),
            fetch: default_fetch_tool(),
        }
    }
}

fn default_search_tool() -> String {
    "search".into()
}

fn default_fetch_tool() -> String {
    "fetch_full".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalConfig {
    #[serde(default = "default_journal_dir")]
    pub dir: String,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: default_journal_dir(),
        }
    }
}

fn default_journal_dir() -> String {
    "logs".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PromptConfig {
    #[serde(default)]
    pub base_system_prompt: Option<String>,
    /// Read when `base_system_prompt` is unset.
    #[serde(default)]
    pub base_system_prompt_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub tools: ToolNames,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| AgentError::Config(format!("Failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Defaults overlaid with environment variables; for runs without a file.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    fn apply_env(&mut self) {
        if let Ok(models) = env::var("DOCKET_MODEL") {
            self.model.models = split_list(&models);
        }
        if let Ok(keys) = env::var("DOCKET_API_KEYS") {
            self.model.api_keys = split_list(&keys);
        }
        if let Ok(url) = env::var("DOCKET_BASE_URL") {
            self.model.base_url = url;
        }
        if let Ok(temperature) = env::var("DOCKET_TEMPERATURE") {
            if let Ok(parsed) = temperature.parse::<f32>() {
                self.model.temperature = parsed.clamp(0.0, 2.0);
            }
        }
        if let Ok(url) = env::var("DOCKET_MCP_URL") {
            self.mcp.url = url;
        }
        if let Ok(dir) = env::var("DOCKET_JOURNAL_DIR") {
            self.journal.dir = dir;
        }
        if let Ok(prompt) = env::var("DOCKET_SYSTEM_PROMPT") {
            self.prompt.base_system_prompt = Some(prompt);
        }
    }

    /// The configured base system prompt, read from disk when given as a file.
    pub fn base_system_prompt(&self) -> Result<String> {
        if let Some(prompt) = &self.prompt.base_system_prompt {
            return Ok(prompt.clone());
        }
        match &self.prompt.base_system_prompt_file {
            Some(path) => fs::read_to_string(path).map_err(|err| {
                AgentError::Config(format!("Failed to read system prompt `{path}`: {err}"))
            }),
            None => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[model]\nmodels=['gpt-4o-mini','gpt-4o']\napi_keys=['k1']\n[mcp]\nurl='http://127.0.0.1:9000/mcp'\n[tools]\nsearch='search_documents'"
        )
        .unwrap();

        env::set_var("DOCKET_API_KEYS", "k1, k2,,k3");
        let cfg = AppConfig::from_env_or_file(file.path()).unwrap();
        env::remove_var("DOCKET_API_KEYS");

        assert_eq!(cfg.model.models, vec!["gpt-4o-mini", "gpt-4o"]);
        assert_eq!(cfg.model.api_keys, vec!["k1", "k2", "k3"]);
        assert_eq!(cfg.model.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(cfg.mcp.url, "http://127.0.0.1:9000/mcp");
        assert_eq!(cfg.tools.search, "search_documents");
        assert_eq!(cfg.tools.fetch, "fetch_full");
        assert_eq!(cfg.journal.dir, "logs");
    }

    #[test]
    fn empty_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        let cfg = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.mcp.url, "http://127.0.0.1:8000/mcp");
    }

    #[test]
    fn rejects_malformed_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[model\nmodels=").unwrap();
        assert!(matches!(
            AppConfig::from_file(file.path()),
            Err(AgentError::Config(_))
        ));
    }

    #[test]
    fn reads_prompt_from_file() {
        let mut prompt = NamedTempFile::new().unwrap();
        write!(prompt, "You research case law.").unwrap();

        let mut cfg = AppConfig::default();
        cfg.prompt.base_system_prompt_file = Some(prompt.path().display().to_string());
        assert_eq!(cfg.base_system_prompt().unwrap(), "You research case law.");

        cfg.prompt.base_system_prompt = Some("inline".into());
        assert_eq!(cfg.base_system_prompt().unwrap(), "inline");
    }
}
