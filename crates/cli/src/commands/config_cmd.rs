//! `policypilot config`: print the configuration.

use std::path::Path;

use policypilot_config::AppConfig;

use super::{config_file, load_config, CommandResult};

pub fn show(config_path: Option<&Path>, default: bool) -> CommandResult {
    if default {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = load_config(config_path)?;
    if !config.has_api_key() {
        eprintln!("warning: no API key set (POLICYPILOT_API_KEY or OPENAI_API_KEY)");
    }

    println!("# {}", config_file(config_path).display());
    print!("{}", config.to_redacted_toml());
    Ok(())
}
