use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crux_sync::ImportConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "crux-cli")]
#[command(about = "Crux board import command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply database migrations.
    Migrate,
    /// Run the HTTP API (and the sync scheduler when enabled).
    Serve,
    /// Import one connection's board history now.
    Sync {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        connection: Uuid,
    },
    /// Import every sync-enabled connection once.
    SyncAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crux=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ImportConfig::from_env();

    match cli.command {
        Commands::Migrate => {
            let pool = crux_storage::create_pool(&config.database_url).await?;
            crux_storage::run_migrations(&pool).await?;
            info!("migrations applied");
        }
        Commands::Serve => {
            crux_web::serve_from_env().await?;
        }
        Commands::Sync { user, connection } => {
            let services = crux_sync::connect_from_env(&config).await?;
            let result = services
                .importer
                .import_history(user, connection)
                .await
                .with_context(|| format!("importing connection {connection}"))?;
            info!(
                %connection,
                sessions_created = result.sessions_created,
                ascents_imported = result.ascents_imported,
                duplicates_skipped = result.duplicates_skipped,
                "sync complete"
            );
        }
        Commands::SyncAll => {
            let services = crux_sync::connect_from_env(&config).await?;
            let summary =
                crux_sync::sync_enabled_connections(&services.registry, &services.importer).await?;
            info!(
                attempted = summary.attempted,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "sweep complete"
            );
        }
    }

    Ok(())
}
