mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use warden_core::WardenConfig;

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Warden governance control plane")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse and validate a configuration file, then print a summary.
    Check {
        /// Path to warden.yaml
        #[arg(long, short, env = "WARDEN_CONFIG", default_value = "warden.yaml")]
        config: PathBuf,
    },

    /// Start the authorization API with health and metrics endpoints.
    Serve {
        /// Path to warden.yaml
        #[arg(long, short, env = "WARDEN_CONFIG", default_value = "warden.yaml")]
        config: PathBuf,

        /// Listen address, overriding `observability.bind`
        #[arg(long)]
        bind: Option<String>,
    },

    /// List records from a dead-letter file.
    DeadLetters {
        /// Dead-letter JSON Lines file (`audit.dead_letter.path`)
        #[arg(long)]
        file: PathBuf,

        /// Only show records for this sink
        #[arg(long)]
        sink: Option<String>,

        /// Print full records as JSON Lines instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Also read rotated files next to `--file`, oldest first
        #[arg(long, default_value_t = false)]
        rotated: bool,
    },
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Check { config } => {
            init_tracing("warn");
            commands::check::run(&config)?;
        }

        Command::Serve { config, bind } => {
            let config = WardenConfig::from_file(&config)
                .with_context(|| format!("Failed to load config from {}", config.display()))?;
            init_tracing(&config.observability.log_filter);
            commands::serve::run(config, bind).await?;
        }

        Command::DeadLetters {
            file,
            sink,
            json,
            rotated,
        } => {
            init_tracing("warn");
            commands::dead_letters::run(&file, sink.as_deref(), json, rotated)?;
        }
    }

    Ok(())
}
