//! Livecell CLI - runs a directory of reactive cells.

mod colors;
mod notebook;
mod output;
mod run;
mod watch;
mod watcher;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use livecell_core::EngineConfig;
use tokio::task::LocalSet;

#[derive(Parser)]
#[command(name = "livecell")]
#[command(about = "Reactive cell notebooks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Delay between an edit and re-evaluation, in milliseconds
    #[arg(long, global = true)]
    debounce: Option<u64>,

    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every cell once and print the results
    Run {
        /// Directory containing .cell files
        dir: String,

        /// Print outputs as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Evaluate cells and re-evaluate them as files change
    Watch {
        /// Directory containing .cell files
        dir: String,

        /// Print outputs as JSON lines
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("livecell_core::script=info".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = engine_config(&cli)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = LocalSet::new();

    local.block_on(&runtime, async move {
        match cli.command {
            Commands::Run { dir, json } => run::execute(&dir, config, json).await,
            Commands::Watch { dir, json } => watch::execute(&dir, config, json).await,
        }
    })
}

fn engine_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(ms) = cli.debounce {
        config = config.with_debounce(Duration::from_millis(ms));
    }
    Ok(config)
}
