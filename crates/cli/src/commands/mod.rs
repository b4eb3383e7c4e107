//! Subcommand handlers.

pub mod agent;
pub mod complete;
pub mod config_cmd;
pub mod ingest;

use std::io::Write;
use std::path::{Path, PathBuf};

use policypilot_agent::{CompletionItem, CompletionStream, PolicyAgent};
use policypilot_config::AppConfig;
use tokio_stream::StreamExt;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// The config file in effect: `explicit`, or the default location.
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load and validate the configuration. An explicit path must exist.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(format!("config file not found: {}", path.display()).into());
        }
    }
    Ok(AppConfig::load_with_env(&config_file(explicit))?)
}

/// Ingest the sources and wire the agent, failing early without credentials.
pub async fn setup_agent(config: &AppConfig) -> Result<PolicyAgent, Box<dyn std::error::Error>> {
    check_api_key(config)?;
    Ok(PolicyAgent::setup(config).await?)
}

fn check_api_key(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let hosted = |name: &str| matches!(name, "openai" | "openrouter");
    let chat_missing =
        hosted(&config.default_provider) && config.api_key_for(&config.default_provider).is_none();
    let embedding_missing =
        config.embedding.provider == "openai" && config.api_key_for("openai").is_none();

    if !chat_missing && !embedding_missing {
        return Ok(());
    }

    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    POLICYPILOT_API_KEY=sk-...");
    eprintln!("    OPENAI_API_KEY=sk-...");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}

/// How a completion stream is written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Answer text on stdout, tool status lines on stderr
    Human,
    /// One JSON event per line on stdout
    Json,
}

/// Drain `items` to the terminal. A failed run ends with an error.
pub async fn render_completion(mut items: CompletionStream, format: OutputFormat) -> CommandResult {
    let mut stdout = std::io::stdout();

    while let Some(item) = items.next().await {
        match (item, format) {
            (CompletionItem::Fragment(text), OutputFormat::Human) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            (CompletionItem::Fragment(text), OutputFormat::Json) => {
                let delta = serde_json::json!({"type": "delta", "data": {"content": text}});
                writeln!(stdout, "{delta}")?;
            }
            (CompletionItem::Lifecycle(event), OutputFormat::Human) => {
                eprintln!();
                eprintln!("  [{}] {}", event.tool_name, event.description);
            }
            (CompletionItem::Lifecycle(event), OutputFormat::Json) => {
                for webui_event in event.to_webui_events() {
                    writeln!(stdout, "{}", serde_json::to_string(&webui_event)?)?;
                }
            }
            (CompletionItem::Failed(message), _) => {
                if format == OutputFormat::Human {
                    writeln!(stdout)?;
                }
                return Err(message.into());
            }
        }
    }

    if format == OutputFormat::Human {
        writeln!(stdout)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_prefers_explicit_path() {
        let explicit = Path::new("/etc/policypilot.toml");
        assert_eq!(config_file(Some(explicit)), explicit);
        assert!(config_file(None).ends_with(".policypilot/config.toml"));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = load_config(Some(Path::new("/no/such/config.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn local_backends_need_no_key() {
        let mut config = AppConfig::default();
        config.default_provider = "ollama".into();
        config.embedding.provider = "local".into();
        assert!(check_api_key(&config).is_ok());

        config.default_provider = "openai".into();
        config.api_key = Some("sk-test".into());
        assert!(check_api_key(&config).is_ok());
    }
}
