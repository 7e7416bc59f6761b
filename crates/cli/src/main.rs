//! vaultindex CLI - semantic search over markdown vaults

use anyhow::Result;
use clap::{Parser, Subcommand};
use vaultindex::service::searcher::DEFAULT_LIMIT;

mod commands;
mod logging;

use commands::{App, GlobalArgs, cmd_index, cmd_recent, cmd_run, cmd_search, cmd_show, cmd_stats};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "vaultindex")]
#[command(about = "Local semantic search over markdown vaults")]
#[command(after_help = "\
QUICK START:
  vaultindex --vault ~/notes index          # Build the index once
  vaultindex --vault ~/notes search \"q\"     # Search it
  vaultindex --vault ~/notes run --watch    # Keep it current

Several processes may share one database; only one of them writes at a time.")]
struct Cli {
  #[command(flatten)]
  global: GlobalArgs,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Start the indexing worker and serve until Ctrl-C
  Run {
    /// Enqueue every note at startup
    #[arg(long)]
    reindex: bool,
    /// Watch vaults for changes
    #[arg(long)]
    watch: bool,
    /// Log to a rolling file instead of stderr
    #[arg(long)]
    background: bool,
  },
  /// Index every note once, then exit
  Index,
  /// Search the index
  Search {
    query: String,
    #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
    limit: usize,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Show index statistics
  Stats {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// List the most recently modified notes in a vault
  Recent {
    vault: String,
    #[arg(short, long, default_value_t = 10)]
    limit: usize,
  },
  /// Print a note by vault and relative path
  Show { vault: String, path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let app = App::load(&cli.global)?;

  // File logging only for a background worker; everything else logs to stderr
  let background = matches!(cli.command, Commands::Run { background: true, .. });
  let _guard = init_logging(&app.config.logging, background);

  match cli.command {
    Commands::Run { reindex, watch, .. } => cmd_run(&app, reindex, watch).await,
    Commands::Index => cmd_index(&app).await,
    Commands::Search { query, limit, json } => cmd_search(&app, &query, limit, json).await,
    Commands::Stats { json } => cmd_stats(&app, json).await,
    Commands::Recent { vault, limit } => cmd_recent(&app, &vault, limit).await,
    Commands::Show { vault, path } => cmd_show(&app, &vault, &path).await,
  }
}
