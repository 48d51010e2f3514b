//! Inquest - fraud investigation engine CLI
//!
//! Runs investigations against the bundled demo agents:
//! - `inquest run <kind> <value>` — investigate one entity end to end
//! - `inquest show <id>` — print a stored investigation
//!
//! Real deployments embed `inquest-core` directly and register their own
//! analyzers and tools; the demo set here exists to exercise the engine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use inquest_core::storage::{InvestigationStore, SqliteInvestigationStore};
use inquest_core::{EngineConfig, EntityRef, InvestigationEngine};

mod demo;

#[derive(Parser)]
#[command(name = "inquest")]
#[command(about = "Bounded-loop fraud investigation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Investigate one entity with the demo agent set
    Run {
        /// Entity kind (e.g. account, transaction)
        kind: String,
        /// Entity identifier
        value: String,
        /// Engine config file (TOML); defaults apply for anything unset
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// SQLite database path for investigation records
        #[arg(long, default_value = "inquest.db")]
        db: PathBuf,
    },

    /// Print a stored investigation as JSON
    Show {
        /// Investigation id
        id: String,
        #[arg(long, default_value = "inquest.db")]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Commands::Run {
            kind,
            value,
            config,
            db,
        } => run(kind, value, config, db).await,
        Commands::Show { id, db } => show(&id, db),
    }
}

async fn run(kind: String, value: String, config: Option<PathBuf>, db: PathBuf) -> Result<()> {
    let config = match config {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let store = Arc::new(
        SqliteInvestigationStore::open(&db)
            .with_context(|| format!("opening database {}", db.display()))?,
    );

    let cancel = CancellationToken::new();
    let ctrlc_guard = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling investigation");
            ctrlc_guard.cancel();
        }
    });

    let mut builder = InvestigationEngine::builder(config)
        .with_whitelist(Arc::new(demo::whitelist()))
        .with_store(store)
        .with_cancellation(cancel);
    for tool in demo::tools() {
        builder = builder.with_tool(tool);
    }
    for analyzer in demo::analyzers() {
        builder = builder.with_analyzer(analyzer);
    }
    let engine = builder.build()?;

    let state = engine.run(EntityRef::new(kind, value)).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn show(id: &str, db: PathBuf) -> Result<()> {
    let store = SqliteInvestigationStore::open(&db)
        .with_context(|| format!("opening database {}", db.display()))?;
    let versioned = store.get(id)?;
    println!("{}", serde_json::to_string_pretty(&versioned.state)?);
    Ok(())
}
