//! Command-line driver for the propose, review and apply workflow.
//!
//! # Responsibility
//! - Manage topics and entries in a local database file.
//! - Write analyze proposals to a JSON file for review and apply them back.
//! - Host the topics HTTP API over the same database.
//!
//! # Invariants
//! - Commands never print entry text to logs; stdout is the only sink for it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use topicsort_core::{default_log_level, init_logging, EngineConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "topicsort",
    about = "Sort notes into topics with reviewable proposals",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file
    #[arg(long, global = true, default_value = "topicsort.db")]
    db: PathBuf,

    /// Owner whose taxonomy is read and written
    #[arg(long, global = true, default_value = "1")]
    owner: i64,

    /// Engine config (JSON); defaults apply to missing fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Replay suggestions from a JSON file instead of the keyword oracle
    #[arg(long, global = true)]
    suggestions: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Directory for rolling log files; logging is off when absent
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List topics with entry counts
    Topics,

    /// Create a topic
    AddTopic {
        /// Topic name
        name: String,
    },

    /// Store a note
    AddEntry {
        /// Note text
        content: String,

        /// Topic id to file it under
        #[arg(long, short)]
        topic: Option<i64>,
    },

    /// Propose a categorization of uncategorized notes
    Analyze {
        /// Free-form guidance passed to the oracle
        #[arg(long, short)]
        instructions: Option<String>,

        /// Existing topic ids to favour (comma-separated)
        #[arg(long, value_delimiter = ',')]
        keep: Vec<i64>,

        /// Where to write the proposal
        #[arg(long, short, default_value = "proposal.json")]
        out: PathBuf,
    },

    /// Commit a reviewed proposal file
    Apply {
        /// Proposal written by `analyze`
        proposal: PathBuf,

        /// Skip the taxonomy version check; per-topic drift is still checked
        #[arg(long)]
        ignore_version: bool,
    },

    /// Ranked topic suggestions for specific notes
    Quick {
        /// Entry ids
        #[arg(required = true, value_delimiter = ',')]
        entry_ids: Vec<i64>,
    },

    /// Serve the topics HTTP API
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,

        /// Bearer token accepted for `--owner`
        #[arg(long)]
        token: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        let log_dir = std::env::current_dir()
            .context("failed to resolve the working directory")?
            .join(log_dir);
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, &log_dir.to_string_lossy())
            .map_err(anyhow::Error::msg)
            .context("failed to initialize logging")?;
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let context = commands::Context::new(cli.db, cli.owner, config, cli.suggestions);

    match cli.command {
        Commands::Topics => commands::topics(&context),
        Commands::AddTopic { name } => commands::add_topic(&context, &name),
        Commands::AddEntry { content, topic } => commands::add_entry(&context, &content, topic),
        Commands::Analyze {
            instructions,
            keep,
            out,
        } => commands::analyze(&context, instructions, keep, &out),
        Commands::Apply {
            proposal,
            ignore_version,
        } => commands::apply(&context, &proposal, ignore_version),
        Commands::Quick { entry_ids } => commands::quick(&context, &entry_ids),
        Commands::Serve { addr, token } => commands::serve(&context, addr, &token),
    }
}
