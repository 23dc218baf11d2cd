use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use conductor::config::{ConductorConfig, DEFAULT_CONFIG_FILE};
use conductor::telemetry::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Phase orchestrator for long-running audit jobs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Database path. Overrides conductor.toml and CONDUCTOR_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Log output format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Also write JSON logs to a daily-rolling file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default conductor.toml and create the database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Create a job and print its id
    Create {
        /// Stop collecting once this many units have results
        #[arg(long)]
        max_units: u32,

        /// Initial unit to discover from (repeatable)
        #[arg(long = "seed")]
        seeds: Vec<String>,
    },
    /// Run a tick for a job
    Tick {
        job_id: String,

        /// Keep ticking in-process until the job finishes, instead of
        /// handing the next tick to the re-entry endpoint
        #[arg(long)]
        local: bool,
    },
    /// Show one job, or list all jobs
    Status {
        job_id: Option<String>,

        #[arg(long)]
        json: bool,
    },
    /// Mark a running job failed
    Fail {
        job_id: String,

        #[arg(long, default_value = "aborted by operator")]
        reason: String,
    },
    /// List running jobs whose heartbeat is older than a threshold
    Stalled {
        #[arg(long, default_value = "600")]
        older_than_secs: u64,

        /// Send a continuation for each stalled job
        #[arg(long)]
        redispatch: bool,
    },
    /// Serve the re-entry endpoint
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let _log_guard = telemetry::init_tracing(cli.log_format, cli.verbose, cli.log_dir.as_deref())?;

    let mut config = ConductorConfig::resolve(&cli.config)?;
    if let Some(path) = &cli.db_path {
        config.database.path = path.clone();
    }
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    match &cli.command {
        Commands::Init { force } => cmd::cmd_init(&cli.config, &config, *force)?,
        Commands::Config { command } => cmd::cmd_config(&cli.config, &config, command.clone())?,
        Commands::Create { max_units, seeds } => {
            cmd::cmd_create(&config, *max_units, seeds.clone()).await?
        }
        Commands::Tick { job_id, local } => cmd::cmd_tick(&config, job_id, *local).await?,
        Commands::Status { job_id, json } => {
            cmd::cmd_status(&config, job_id.as_deref(), *json).await?
        }
        Commands::Fail { job_id, reason } => cmd::cmd_fail(&config, job_id, reason).await?,
        Commands::Stalled {
            older_than_secs,
            redispatch,
        } => cmd::cmd_stalled(&config, *older_than_secs, *redispatch).await?,
        Commands::Serve { host, port } => cmd::cmd_serve(&config, host.clone(), *port).await?,
    }

    Ok(())
}
