//! `policypilot ask` and `policypilot chat`.

use std::io::Write;
use std::path::Path;

use policypilot_agent::completion_stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{load_config, render_completion, setup_agent, CommandResult, OutputFormat};

pub async fn ask(
    config_path: Option<&Path>,
    query: &str,
    image: Option<&Path>,
    conversation: Option<&str>,
) -> CommandResult {
    let config = load_config(config_path)?;
    let agent = setup_agent(&config).await?;

    eprint!("  Thinking...");
    let answer = agent.run(query, image, conversation).await;
    eprint!("\r              \r");
    println!("{}", answer?);
    Ok(())
}

pub async fn chat(config_path: Option<&Path>, conversation: Option<&str>) -> CommandResult {
    let config = load_config(config_path)?;
    let agent = setup_agent(&config).await?;
    let conversation = conversation
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    println!();
    println!("  PolicyPilot, interactive mode");
    println!();
    println!("  Model:         {}", agent.agent().model());
    println!("  Policy chunks: {}", agent.report().chunks);
    println!("  Conversation:  {conversation}");
    println!();
    println!("  Type your question and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            prompt()?;
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        match agent.ask_stream(line, None, Some(&conversation)).await {
            Ok(run) => {
                print!("  Assistant > ");
                if let Err(e) = render_completion(completion_stream(run), OutputFormat::Human).await {
                    eprintln!("  [Error] {e}");
                }
            }
            Err(e) => eprintln!("  [Error] {e}"),
        }

        println!();
        prompt()?;
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}
