use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use satfolio::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Display holdings, value and P&L
    Summary {
        /// Recompute instead of using the cached summary
        #[arg(long)]
        fresh: bool,
    },
    /// Display the current BTC price in a currency
    Price {
        /// ISO currency code, e.g. USD
        currency: String,
    },
    /// Keep refreshing and print the summary until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => satfolio::cli::setup::setup_at_path(path),
            None => satfolio::cli::setup::setup(),
        },
        Some(Commands::Summary { fresh }) => {
            satfolio::run_command(
                satfolio::AppCommand::Summary { fresh },
                cli.config_path.as_deref(),
            )
            .await
        }
        Some(Commands::Price { currency }) => {
            satfolio::run_command(
                satfolio::AppCommand::Price { currency },
                cli.config_path.as_deref(),
            )
            .await
        }
        Some(Commands::Watch) => {
            satfolio::run_command(satfolio::AppCommand::Watch, cli.config_path.as_deref()).await
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
