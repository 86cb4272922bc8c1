//! # Herbal Clinic CLI (`herb`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `herb init` | Create the SQLite record tables |
//! | `herb chat` | Interactive consultation |
//! | `herb ask "<symptom>"` | One consultation turn |
//! | `herb search "<text>"` | Show the herbs retrieved for a text |
//! | `herb register` | Save a user's constitution |
//! | `herb history` | Print a user's prior diagnoses |
//! | `herb serve` | Start the HTTP consultation API |
//!
//! ## Examples
//!
//! ```bash
//! herb --config ./config/herb.toml chat --user kim
//! herb ask --user kim --constitution soeumin "cold hands and poor digestion"
//! herb history --user kim --limit 5
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use herbal_clinic::config::{self, Config};
use herbal_clinic::models::Constitution;
use herbal_clinic::secrets::Secrets;
use herbal_clinic::{commands, logging, migrate};

const DEFAULT_CONFIG: &str = "./config/herb.toml";

/// Herbal Clinic: a constitution-aware herbal consultation assistant.
#[derive(Parser)]
#[command(
    name = "herb",
    about = "Herbal Clinic — a constitution-aware herbal consultation assistant",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/herb.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite record tables. Idempotent.
    Init,

    /// Start an interactive consultation.
    Chat {
        /// User id; prompted for when omitted.
        #[arg(long)]
        user: Option<String>,

        /// Keep records in memory only for this run.
        #[arg(long)]
        ephemeral: bool,
    },

    /// Run a single consultation turn and print the reply.
    Ask {
        /// The symptom description.
        symptom: String,

        #[arg(long)]
        user: String,

        /// Constitution for this turn; saved if the user has none yet
        /// (label, English name, or menu number 1-5).
        #[arg(long)]
        constitution: Option<Constitution>,
    },

    /// Embed a text and print the matching herbs without generating.
    Search {
        query: String,

        /// Number of matches (defaults to `chat.top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Save a constitution for a user. Existing users are left unchanged.
    Register {
        #[arg(long)]
        user: String,

        #[arg(long)]
        constitution: Constitution,
    },

    /// Print a user's prior diagnoses.
    History {
        #[arg(long)]
        user: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Start the HTTP consultation API on `[server].bind`.
    Serve,
}

fn load(cli_config: Option<&PathBuf>) -> anyhow::Result<Config> {
    match cli_config {
        Some(path) => config::load_config(path),
        None => config::load_or_default(std::path::Path::new(DEFAULT_CONFIG)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut cfg = load(cli.config.as_ref())?;
    let secrets = Secrets::load(&cfg.secrets);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg.records).await?;
            println!("Record database initialized successfully.");
        }
        Commands::Chat { user, ephemeral } => {
            if ephemeral {
                cfg.records.backend = "memory".to_string();
            }
            commands::run_chat(&cfg, &secrets, user).await?;
        }
        Commands::Ask {
            symptom,
            user,
            constitution,
        } => {
            commands::run_ask(&cfg, &secrets, &user, constitution, &symptom).await?;
        }
        Commands::Search { query, top_k } => {
            commands::run_search(&cfg, &secrets, &query, top_k).await?;
        }
        Commands::Register { user, constitution } => {
            commands::run_register(&cfg, &secrets, &user, constitution).await?;
        }
        Commands::History { user, limit } => {
            commands::run_history(&cfg, &secrets, &user, limit).await?;
        }
        Commands::Serve => {
            commands::run_serve(&cfg, &secrets).await?;
        }
    }

    Ok(())
}
