mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tabrelay")]
#[command(about = "Command relay between an LLM controller and a browser tab", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (long-running daemon)
    Run {
        /// Controller endpoint (overrides config relay.endpoint)
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Browser DevTools WebSocket URL (overrides config browser.cdpUrl)
        #[arg(long)]
        cdp_url: Option<String>,

        /// Run without a browser connection (non-browser actions only)
        #[arg(long)]
        detached: bool,
    },

    /// Run environment diagnostics
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the current configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            endpoint,
            cdp_url,
            detached,
        } => {
            commands::run_cmd::run(endpoint, cdp_url, detached).await?;
        }
        Commands::Doctor => {
            commands::doctor::run().await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show().await?;
            }
            ConfigCommands::Init { force } => {
                commands::config_cmd::init(force).await?;
            }
        },
    }

    Ok(())
}
