//! PolicyPilot CLI, the main entry point.
//!
//! Commands:
//! - `ask`      Answer a single question
//! - `chat`     Interactive, streaming conversation
//! - `complete` Run an OpenAI-style chat-completion request
//! - `ingest`   Index the policy sources and report
//! - `config`   Show the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "policypilot",
    about = "PolicyPilot, a company-policy assistant with retrieval and reimbursement tools",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.policypilot/config.toml)
    #[arg(long, global = true, env = "POLICYPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question and print the answer
    Ask {
        query: String,

        /// Attach a PNG or JPEG image, e.g. a receipt
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Conversation to continue
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// Chat interactively; answers stream as they are generated
    Chat {
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// Read a chat-completion JSON request and stream the response events
    Complete {
        /// Request file; stdin when omitted
        #[arg(short, long)]
        request: Option<PathBuf>,
    },

    /// Ingest the configured policy sources and print the report
    Ingest,

    /// Print the configuration as TOML
    Config {
        /// Print the built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Ask {
            query,
            image,
            conversation,
        } => commands::agent::ask(config_path, &query, image.as_deref(), conversation.as_deref()).await,
        Commands::Chat { conversation } => commands::agent::chat(config_path, conversation.as_deref()).await,
        Commands::Complete { request } => commands::complete::run(config_path, request.as_deref()).await,
        Commands::Ingest => commands::ingest::run(config_path).await,
        Commands::Config { default } => commands::config_cmd::show(config_path, default),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout carries answers.
fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
