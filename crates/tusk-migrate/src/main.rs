//! tusk-migrate CLI
//!
//! Command-line tool for synchronising a SQLite database with a model
//! manifest.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use tusk_migrate::{dispatch, Command, DiffOptions, MigratorConfig, ModelManifest};
use tusk_orm::{Database, DatabaseConfig, Registry};

/// Schema migrations for tusk-orm models.
#[derive(Parser)]
#[command(name = "tusk-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Model manifest (JSON).
    #[arg(short, long, default_value = "models.json")]
    models: PathBuf,

    /// Maximum pooled connections.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Seconds to wait for the migration lock.
    #[arg(long, default_value_t = 10)]
    lock_timeout: u64,

    /// Seconds after which an unrefreshed lock is considered abandoned.
    #[arg(long, default_value_t = 300)]
    lock_lease: u64,

    /// Per-statement timeout in seconds.
    #[arg(long)]
    statement_timeout: Option<u64>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the database in line with the models.
    Migrate {
        /// Show the plan without executing it.
        #[arg(long)]
        dry_run: bool,

        /// Drop tables that no model maps to.
        #[arg(long)]
        drop_unknown_tables: bool,
    },

    /// Show applied migrations.
    ShowMigrations,

    /// Show the SQL a migration would run.
    SqlMigrate,

    /// Print a model manifest describing the existing database.
    InspectDb {
        /// Tables to describe (all if not specified).
        tables: Vec<String>,
    },

    /// Clear a stale migration lock.
    Unlock,
}

impl From<Commands> for Command {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Migrate {
                dry_run,
                drop_unknown_tables,
            } => Self::Migrate {
                dry_run,
                drop_unknown_tables,
            },
            Commands::ShowMigrations => Self::ShowMigrations,
            Commands::SqlMigrate => Self::SqlMigrate,
            Commands::InspectDb { tables } => Self::InspectDb { tables },
            Commands::Unlock => Self::Unlock,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut db_config = DatabaseConfig::new(&cli.database).with_max_connections(cli.max_connections);
    if let Some(seconds) = cli.statement_timeout {
        db_config = db_config.with_statement_timeout(Duration::from_secs(seconds));
    }
    let db = Database::connect(&db_config).await?;

    let command = Command::from(cli.command);
    let registry = Registry::new();
    let models = if command.needs_models() {
        debug!(path = %cli.models.display(), "loading model manifest");
        ModelManifest::from_path(&cli.models)?.register(&registry)?
    } else {
        Vec::new()
    };

    let config = MigratorConfig::default()
        .with_lock_timeout(Duration::from_secs(cli.lock_timeout))
        .with_lock_lease(Duration::from_secs(cli.lock_lease))
        .with_diff_options(DiffOptions::default());

    let code = dispatch(&command, &db, &models, config, &mut std::io::stdout()).await;
    db.close().await;
    std::process::exit(code);
}
