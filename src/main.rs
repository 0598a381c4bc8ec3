//! # ragdesk server binary
//!
//! ## Usage
//!
//! ```bash
//! ragdesk --config ./config/ragdesk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragdesk init` | Create the SQLite database and run schema migrations |
//! | `ragdesk serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ragdesk::answer::AnswerEngine;
use ragdesk::config::load_config;
use ragdesk::context::ContextAssembler;
use ragdesk::db::{self, SqliteTenantStore};
use ragdesk::document::DocumentStore;
use ragdesk::enrich::Enricher;
use ragdesk::generation::{GeminiGenerator, Generator};
use ragdesk::notify::Notifier;
use ragdesk::server::{run_server, AppState};
use ragdesk::store::TenantStore;

/// ragdesk — a multi-tenant knowledge-base chat backend.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragdesk.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragdesk",
    about = "ragdesk — a multi-tenant knowledge-base chat backend",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragdesk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            db::run_migrations(&pool).await?;
            println!("Database initialized at {}", config.store.path.display());
            Ok(())
        }
        Commands::Serve => {
            let pool = db::connect(&config).await?;
            db::run_migrations(&pool).await?;

            let config = Arc::new(config);
            let store: Arc<dyn TenantStore> = Arc::new(SqliteTenantStore::new(pool));
            let docs = Arc::new(DocumentStore::new(config.documents.dir.clone())?);
            let generator: Arc<dyn Generator> =
                Arc::new(GeminiGenerator::from_config(&config.generation));
            let assembler = Arc::new(ContextAssembler::new(&config.context));

            let state = AppState {
                enricher: Enricher::new(
                    store.clone(),
                    docs.clone(),
                    generator.clone(),
                    assembler.clone(),
                ),
                answers: Arc::new(AnswerEngine::new(
                    store.clone(),
                    docs.clone(),
                    generator.clone(),
                    assembler.clone(),
                    config.clone(),
                )),
                notifier: Notifier::from_config(&config.notify),
                config,
                store,
                docs,
            };

            run_server(state).await
        }
    }
}
