//! rowcache CLI - inspect and exercise the object cache against a store

mod commands;

use clap::{Parser, Subcommand};
use rowcache::Dialect;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "rowcache")]
#[command(version = "0.1.0")]
#[command(about = "Object-relational mapping and caching engine")]
#[command(long_about = r#"
rowcache keeps relational rows as live in-memory objects, enabling:
  • Foreign references resolved to the cached instance
  • Tables registered in any order
  • Best-effort cascading deletes with a report
  • Cross-process cache invalidation

Example usage:
  rowcache init
  rowcache schema --dialect network
  rowcache demo --database .rowcache/rowcache.db
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file
    Init {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Print the DDL of the demo schema
    Schema {
        /// Statement dialect (network, embedded)
        #[arg(short, long, default_value = "embedded")]
        dialect: Dialect,
    },

    /// Register the demo schema, save, resolve and cascade-delete objects
    Demo {
        /// Path to the database file (defaults to the configured one)
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Show row counts of the demo tables
    Stats {
        /// Path to the database file (defaults to the configured one)
        #[arg(short, long)]
        database: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Init { database, force } => commands::run_init(config, database, force),
        Commands::Schema { dialect } => commands::run_schema(dialect).await,
        Commands::Demo { database } => commands::run_demo(config, database).await,
        Commands::Stats { database } => commands::run_stats(config, database).await,
    }
}
