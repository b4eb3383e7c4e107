//! `policypilot complete`: one chat-completion request, streamed as JSON lines.

use std::path::Path;

use policypilot_agent::ChatCompletionRequest;
use tokio::io::AsyncReadExt;

use super::{load_config, render_completion, setup_agent, CommandResult, OutputFormat};

pub async fn run(config_path: Option<&Path>, request_path: Option<&Path>) -> CommandResult {
    let raw = match request_path {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin().read_to_string(&mut raw).await?;
            raw
        }
    };
    let request = parse_request(&raw)?;

    let config = load_config(config_path)?;
    let agent = setup_agent(&config).await?;
    let items = agent.run_chat_completion(request).await?;
    render_completion(items, OutputFormat::Json).await
}

fn parse_request(raw: &str) -> Result<ChatCompletionRequest, Box<dyn std::error::Error>> {
    serde_json::from_str(raw).map_err(|e| format!("invalid chat-completion request: {e}").into())
}
