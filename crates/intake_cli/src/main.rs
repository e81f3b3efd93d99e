//! Intake CLI
//!
//! Queue candidate writes while offline and push them to the API later.
//!
//! # Commands
//!
//! - `add` / `update` / `delete` - Queue a candidate write
//! - `status` - Show sync status and pending count
//! - `list` - List queued mutations
//! - `discard` / `requeue` - Resolve a rejected mutation
//! - `flush` - Deliver queued mutations to the remote API
//! - `inspect` - Display journal statistics

mod commands;
mod error;
mod http;

use clap::{Parser, Subcommand, ValueEnum};
use commands::Target;
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Offline-first candidate intake queue.
#[derive(Parser)]
#[command(name = "intake")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the queue journal
    #[arg(global = true, short, long, default_value = "./intake-queue.journal")]
    queue: PathBuf,

    /// Base URL of the candidate API
    #[arg(global = true, short, long, default_value = "http://localhost:8000")]
    remote: String,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// JSON
    Json,
}

#[derive(clap::Args)]
struct TargetArgs {
    /// Address the candidate by email
    #[arg(long, conflicts_with = "id", required_unless_present = "id")]
    email: Option<String>,

    /// Address the candidate by server id
    #[arg(long)]
    id: Option<i64>,
}

impl From<TargetArgs> for Target {
    fn from(args: TargetArgs) -> Self {
        Target {
            email: args.email,
            remote_id: args.id,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a new candidate
    Add {
        /// Full name
        #[arg(long)]
        name: String,

        /// Email address (must be unique)
        #[arg(long)]
        email: String,

        /// Assessment length in hours
        #[arg(long, default_value_t = intake_sync_protocol::DEFAULT_DURATION_HOURS)]
        hours: i64,

        /// Skill category (repeatable)
        #[arg(short, long = "category")]
        categories: Vec<String>,

        /// Difficulty (junior, mid, senior)
        #[arg(short, long, default_value = "mid")]
        difficulty: String,

        /// Deduplication key; re-running with the same key queues nothing
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Queue changes to a candidate
    Update {
        #[command(flatten)]
        target: TargetArgs,

        /// Field assignment, e.g. `difficulty=senior` (repeatable)
        #[arg(short, long = "set", value_parser = commands::parse_assignment, required = true)]
        set: Vec<(String, Value)>,
    },

    /// Queue removal of a candidate
    Delete {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show sync status
    Status,

    /// List queued mutations
    List {
        /// Only show rejected mutations
        #[arg(long)]
        failed: bool,
    },

    /// Drop a rejected mutation
    Discard {
        /// Mutation id
        id: String,
    },

    /// Retry a rejected mutation, optionally with edited fields
    Requeue {
        /// Mutation id
        id: String,

        /// Field assignment merged into the payload (repeatable)
        #[arg(short, long = "set", value_parser = commands::parse_assignment)]
        set: Vec<(String, Value)>,
    },

    /// Deliver queued mutations
    Flush {
        /// Passes to make, waiting out backoff between them
        #[arg(long, default_value_t = 1)]
        rounds: u32,
    },

    /// Display journal statistics
    Inspect,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), error::CliError> {
    let ctx = commands::Context {
        queue: cli.queue,
        remote: cli.remote,
        format: cli.format,
    };

    match cli.command {
        Commands::Add {
            name,
            email,
            hours,
            categories,
            difficulty,
            key,
        } => {
            let fields = commands::candidate_fields(name, email, hours, categories, &difficulty)?;
            commands::enqueue::add(&ctx, fields, key)?;
        }
        Commands::Update { target, set } => {
            commands::enqueue::update(&ctx, target.into(), set)?;
        }
        Commands::Delete { target } => {
            commands::enqueue::delete(&ctx, target.into())?;
        }
        Commands::Status => commands::status::status(&ctx)?,
        Commands::List { failed } => commands::status::list(&ctx, failed)?,
        Commands::Discard { id } => commands::resolve::discard(&ctx, &id)?,
        Commands::Requeue { id, set } => commands::resolve::requeue(&ctx, &id, set)?,
        Commands::Flush { rounds } => commands::flush::run(&ctx, rounds).await?,
        Commands::Inspect => commands::inspect::run(&ctx)?,
        Commands::Version => {
            println!("intake CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("journal format v{}", intake_sync_protocol::JOURNAL_VERSION);
        }
    }

    Ok(())
}
