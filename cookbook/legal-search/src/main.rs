//! Runs one legal-document research session and prints the result as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use docket_agent::{
    init_tracing, Agent, AppConfig, FileJournal, McpConnector, OpenAIClient, RunRequest,
};

#[derive(Debug, Parser)]
#[command(name = "legal-search", about = "Research a legal question through the document tool server")]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// What the agent should look for
    #[arg(short, long)]
    instruction: String,

    /// The reference query the instruction refers to
    #[arg(short, long)]
    query: String,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => AppConfig::from_env_or_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::from_env(),
    };
    let base_prompt = config.base_system_prompt()?;

    let endpoint = OpenAIClient::from_config(&config.model)?;
    let connector = McpConnector::from_config(&config.mcp);
    let journal = FileJournal::for_session(&config.journal.dir);
    tracing::debug!(journal = %journal.path().display(), "failure journal");

    let agent = Agent::new(Arc::new(endpoint), Arc::new(connector))
        .with_journal(Arc::new(journal))
        .with_tool_names(config.tools.clone())
        .with_temperature(config.model.temperature);

    let request = RunRequest::new(cli.instruction, cli.query)
        .with_system_prompt(base_prompt)
        .with_models(config.model.models.clone())
        .with_credentials(config.model.api_keys.clone());

    let result = agent.run(request).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.failed {
        std::process::exit(1);
    }
    Ok(())
}
