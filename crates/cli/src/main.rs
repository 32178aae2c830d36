//! Conduit CLI: the main entry point.
//!
//! Commands:
//! - `run`: start the runtime and serve until Ctrl-C
//! - `config`: print the default configuration
//! - `check`: validate a configuration file and summarize its routes

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "conduit",
    about = "Conduit — event hub, router, and session gateway",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (defaults to ~/.conduit/config.toml)
    #[arg(short, long, global = true, env = "CONDUIT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the runtime with the built-in handlers
    Run,

    /// Print the default configuration as TOML
    Config {
        /// Print the default config file path instead
        #[arg(long)]
        path: bool,
    },

    /// Validate a configuration and list its routes
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run => commands::run::run(config_path).await?,
        Commands::Config { path } => {
            if path {
                commands::config_cmd::path()
            } else {
                commands::config_cmd::show()
            }
        }
        Commands::Check => commands::check::run(config_path)?,
    }

    Ok(())
}
