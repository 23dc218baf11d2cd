//! Project setup: `conductor init`.

use anyhow::{Context, Result};
use std::path::Path;

use conductor::config::ConductorConfig;

pub fn cmd_init(config_path: &Path, config: &ConductorConfig, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!(
            "{} already exists; leaving it untouched (use --force to overwrite)",
            config_path.display()
        );
    } else {
        let content = toml::to_string_pretty(&ConductorConfig::default())
            .context("Failed to render default configuration")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote {}", config_path.display());
    }

    super::open_capabilities(config)?;
    println!("Database ready at {}", config.database.path.display());
    Ok(())
}
