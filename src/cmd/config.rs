//! Configuration view and validation: `conductor config`.

use anyhow::Result;
use std::path::Path;

use conductor::config::{Credentials, ConductorConfig};

use crate::ConfigCommands;

pub fn cmd_config(
    config_path: &Path,
    config: &ConductorConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Loaded from {} (with overrides applied)", config_path.display());
            } else {
                println!("# No {} found; showing defaults (with overrides applied)", config_path.display());
            }
            print!("{}", toml::to_string_pretty(config)?);
            let creds = Credentials::from_env();
            println!(
                "# re-entry token: {}",
                if creds.reentry_token.is_some() { "set" } else { "not set" }
            );
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration OK");
            } else {
                for warning in &warnings {
                    println!("warning: {}", warning);
                }
                println!("{} warning(s)", warnings.len());
            }
        }
    }
    Ok(())
}
