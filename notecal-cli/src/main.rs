mod commands;
mod date_range;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::date_range::DateRange;

#[derive(Parser)]
#[command(name = "notecal")]
#[command(about = "Keep recurring events in your Markdown notes materialized")]
struct Cli {
    /// Notes directory (overrides the configured one)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the notes directory and keep recurring events materialized
    Watch,
    /// List recurring event definitions
    Definitions,
    /// List the materialized instances of one definition
    Instances {
        /// Recurrence id (the RRuleID field of the definition)
        id: String,
    },
    /// Show materialized and projected occurrences in a date range
    Upcoming {
        /// First day to show (YYYY-MM-DD), defaults to today
        #[arg(long)]
        from: Option<String>,

        /// Last day to show (YYYY-MM-DD), defaults to 30 days from the start
        #[arg(long)]
        to: Option<String>,
    },
    /// Materialize missing future instances for every definition, then exit
    Ensure,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let options = commands::Options {
        dir: cli.dir,
        json: cli.json,
    };

    match cli.command {
        Commands::Watch => commands::watch::run(&options).await,
        Commands::Definitions => commands::definitions::run(&options).await,
        Commands::Instances { id } => commands::instances::run(&options, &id).await,
        Commands::Upcoming { from, to } => {
            let range = DateRange::from_args(from.as_deref(), to.as_deref()).map_err(|e| anyhow::anyhow!(e))?;
            commands::upcoming::run(&options, range).await
        }
        Commands::Ensure => commands::ensure::run(&options).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("notecal=info,notecal_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
