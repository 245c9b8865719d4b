use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use ghwatch::config::new_config;
use ghwatch::store::{self, migrate, PgEventStore};
use ghwatch::{setup_app, setup_tracing, shutdown_signal};
use std::time::Duration;
use tracing::info;

/// GitHub webhook receiver and CI/CD event store
#[derive(Parser, Debug)]
#[command(name = "ghwatch", version, about)]
struct Cli {
    /// TOML configuration file; GHWATCH_* environment variables override it
    #[arg(short, long, env = "GHWATCH_CONFIG_FILE")]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receive webhooks and serve the query tools (default)
    Serve,
    /// Import the JSON events file into PostgreSQL
    Migrate {
        /// Count the events without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Source file, defaults to the configured events_file
        #[arg(long)]
        events_file: Option<Utf8PathBuf>,
    },
    /// Delete all but the newest events from the configured store
    Cleanup {
        /// Number of events to keep, defaults to the configured keep_count
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let app = new_config(cli.config.as_deref())?;
    setup_tracing(&app.base)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&app).await,
        Command::Migrate {
            dry_run,
            events_file,
        } => run_migration(&app, dry_run, events_file).await,
        Command::Cleanup { keep } => cleanup(&app, keep).await,
    }
}

async fn serve(app: &ghwatch::config::Application) -> Result<()> {
    let router = setup_app(app).await?;
    let addr = app.base.address;
    info!(%addr, backend = ?app.base.backend, "Starting webhook server");

    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_migration(
    app: &ghwatch::config::Application,
    dry_run: bool,
    events_file: Option<Utf8PathBuf>,
) -> Result<()> {
    let source = events_file.unwrap_or_else(|| app.base.events_file.clone());
    let destination = PgEventStore::from_config(&app.base)?;
    let lock_timeout = Duration::from_millis(app.base.lock_timeout_ms);

    let report = migrate(&source, &destination, dry_run, lock_timeout).await?;

    if dry_run {
        println!("Dry run: would migrate {} events from {source}", report.total);
    } else {
        println!(
            "Migrated {} of {} events from {source} ({} failed)",
            report.migrated, report.total, report.failed
        );
    }
    Ok(())
}

async fn cleanup(app: &ghwatch::config::Application, keep: Option<usize>) -> Result<()> {
    let keep_count = keep.unwrap_or(app.base.keep_count);
    let store = store::from_config(&app.base)?;
    store.init().await?;

    let deleted = store.cleanup(keep_count).await?;
    println!("Deleted {deleted} events, kept the newest {keep_count}");
    Ok(())
}
