use clap::{Parser, Subcommand};

use crate::commands;
use crate::error::Result;

#[derive(Parser)]
#[command(name = "pennypulse")]
#[command(about = "Indian penny stock and mutual fund tracker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server with scheduled sync and realtime updates
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
    /// Run a one-off market data sync
    Sync {
        /// Only sync stock quotes
        #[arg(long, conflicts_with = "funds_only")]
        stocks_only: bool,

        /// Only sync mutual fund NAVs
        #[arg(long)]
        funds_only: bool,
    },
    /// Probe the candidate universe for new penny stocks
    Discover,
    /// Show a summary of locally stored data
    Status,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await,
        Commands::Sync {
            stocks_only,
            funds_only,
        } => commands::sync::run(stocks_only, funds_only).await,
        Commands::Discover => commands::discover::run().await,
        Commands::Status => commands::status::run().await,
    }
}
