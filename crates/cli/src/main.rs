//! Orion CLI — the main entry point.
//!
//! Commands:
//! - `agent`   — Interactive chat or single-message mode
//! - `daemon`  — Run the retry drainer and maintenance until Ctrl+C
//! - `queue`   — Inspect and manage the failed-request queue
//! - `memory`  — Inspect and manage the conversation log
//! - `status`  — Show configuration and store status

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use orion_config::AppConfig;
use tracing_subscriber::EnvFilter;

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "orion",
    about = "Orion — personal assistant orchestration core",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.orion/config.toml)
    #[arg(short, long, global = true, env = "ORION_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant
    Agent {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation to continue
        #[arg(short, long, default_value = "console:default")]
        session: String,
    },

    /// Run the retry drainer and maintenance tasks until Ctrl+C
    Daemon,

    /// Failed-request queue
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Conversation log
    #[command(subcommand)]
    Memory(MemoryCommand),

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum QueueCommand {
    /// List queued requests
    List {
        /// Only entries that gave up
        #[arg(long, conflicts_with = "pending")]
        terminal: bool,

        /// Only entries still awaiting a retry
        #[arg(long)]
        pending: bool,
    },

    /// Show queue counts
    Stats,

    /// Run one drain cycle now
    Drain,

    /// Delete terminal entries
    Purge {
        /// Keep entries younger than this many days (defaults to queue.terminal_retention_days)
        #[arg(long)]
        older_than_days: Option<i64>,
    },
}

#[derive(Subcommand)]
enum MemoryCommand {
    /// Show conversation log statistics
    Stats,

    /// Print the messages of a session
    History {
        #[arg(short, long, default_value = "console:default")]
        session: String,

        /// Only the newest N messages
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Apply the configured age and size limits now
    Prune,

    /// Delete every message of a session
    Clear {
        #[arg(short, long)]
        session: String,

        /// Required to actually delete
        #[arg(long)]
        confirm: bool,
    },
}

fn init_tracing(config: &AppConfig, verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},sqlx=warn,hyper=warn,reqwest=warn")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_with(cli.config.as_deref())?;
    init_tracing(&config, cli.verbose, cli.log_json);

    match cli.command {
        Commands::Agent { message, session } => commands::agent::run(config, message, session).await?,
        Commands::Daemon => commands::daemon::run(config).await?,
        Commands::Queue(cmd) => match cmd {
            QueueCommand::List { terminal, pending } => {
                commands::queue::list(config, terminal, pending).await?
            }
            QueueCommand::Stats => commands::queue::stats(config).await?,
            QueueCommand::Drain => commands::queue::drain(config).await?,
            QueueCommand::Purge { older_than_days } => {
                commands::queue::purge(config, older_than_days).await?
            }
        },
        Commands::Memory(cmd) => match cmd {
            MemoryCommand::Stats => commands::memory::stats(config).await?,
            MemoryCommand::History { session, limit } => {
                commands::memory::history(config, &session, limit).await?
            }
            MemoryCommand::Prune => commands::memory::prune(config).await?,
            MemoryCommand::Clear { session, confirm } => {
                commands::memory::clear(config, &session, confirm).await?
            }
        },
        Commands::Status => commands::status::run(config).await?,
    }

    Ok(())
}
