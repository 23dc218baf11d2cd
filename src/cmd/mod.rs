//! CLI command implementations.
//!
//! | Module   | Commands handled                          |
//! |----------|-------------------------------------------|
//! | `init`   | `Init`                                    |
//! | `config` | `Config`                                  |
//! | `jobs`   | `Create`, `Status`, `Fail`, `Stalled`     |
//! | `tick`   | `Tick`                                    |
//! | `serve`  | `Serve`                                   |

pub mod config;
pub mod init;
pub mod jobs;
pub mod serve;
pub mod tick;

pub use config::cmd_config;
pub use init::cmd_init;
pub use jobs::{cmd_create, cmd_fail, cmd_stalled, cmd_status};
pub use serve::cmd_serve;
pub use tick::cmd_tick;

use anyhow::{Context, Result};
use conductor::capabilities::Capabilities;
use conductor::config::{ConductorConfig, Credentials};
use conductor::store::{Db, DbHandle};

/// Open the configured database (creating it if needed) and wire up
/// production capabilities.
pub fn open_capabilities(config: &ConductorConfig) -> Result<Capabilities> {
    let path = &config.database.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    let db = Db::new(path).context("Failed to open conductor database")?;
    Ok(Capabilities::new(
        DbHandle::new(db),
        config.clone(),
        Credentials::from_env(),
    ))
}
