use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use brief::app::App;
use brief::config::Config;
use brief::storage::DatabaseError;
use brief::util::unix_now;

#[derive(Parser, Debug)]
#[command(name = "brief", about = "Incremental news enrichment pipeline")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE", default_value = "brief.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch one feed page and insert new items as pending
    Ingest,
    /// Run one enrichment batch, then refresh the cache
    Enrich {
        /// Skip the cache refresh after the batch
        #[arg(long)]
        no_refresh: bool,
    },
    /// Rebuild the cache snapshot from the item store
    RefreshCache,
    /// Run the read service
    Serve,
    /// Run the read service plus periodic ingest and enrich
    Schedule,
    /// Print item counts per state
    Status,
    /// List quarantined items with their last error
    Quarantined {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("brief=info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let app = match App::open(config).await {
        Ok(app) => app,
        Err(brief::app::AppError::Database(DatabaseError::Busy)) => {
            eprintln!("Error: the item database is busy. Another writer may be stuck; try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to open stores"),
    };

    match args.command {
        Command::Ingest => {
            let report = app.ingest().await.context("Ingest failed")?;
            println!(
                "Fetched {}, inserted {}, duplicates {}, skipped {}",
                report.fetched, report.inserted, report.duplicates, report.skipped
            );
        }
        Command::Enrich { no_refresh } => {
            let consumer = app.consumer()?;
            let report = consumer.run_batch().await.context("Enrichment batch failed")?;
            println!(
                "Claimed {}, enriched {}, failed {}, quarantined {}, conflicts {}, lost leases {}",
                report.claimed,
                report.enriched,
                report.failed,
                report.quarantined,
                report.conflicts,
                report.lost_leases
            );
            if !no_refresh {
                let count = app.refresh_cache().await.context("Cache refresh failed")?;
                println!("Cache snapshot holds {} items", count);
            }
        }
        Command::RefreshCache => {
            let count = app.refresh_cache().await.context("Cache refresh failed")?;
            println!("Cache snapshot holds {} items", count);
        }
        Command::Serve => {
            brief::server::serve(&app.config.server.listen, app.server_state())
                .await
                .context("Read service failed")?;
        }
        Command::Schedule => schedule(app).await?,
        Command::Status => {
            let counts = app
                .db
                .state_counts(app.config.consumer.max_failures, unix_now())
                .await?;
            println!("pending      {}", counts.pending);
            println!("enriched     {}", counts.enriched);
            println!("quarantined  {}", counts.quarantined);
            println!("leased       {}", counts.leased);
            println!("total        {}", counts.total());
        }
        Command::Quarantined { limit } => {
            let items = app
                .db
                .quarantined_items(app.config.consumer.max_failures, limit)
                .await?;
            if items.is_empty() {
                println!("No quarantined items.");
            }
            for item in items {
                println!(
                    "{}  {}  {}",
                    item.id,
                    item.last_error.as_deref().unwrap_or("-"),
                    item.source_url
                );
            }
        }
    }

    Ok(())
}

/// Serve plus interval-driven ingest and enrich.
///
/// Each loop awaits its own run before the next tick, and missed ticks are
/// skipped, so batches never overlap inside this process.
async fn schedule(app: App) -> Result<()> {
    let consumer = app.consumer()?;
    let ingest_every = Duration::from_secs(app.config.schedule.ingest_interval_secs.max(1));
    let enrich_every = Duration::from_secs(app.config.schedule.enrich_interval_secs.max(1));
    let app = std::sync::Arc::new(app);

    let ingest_app = app.clone();
    let ingest_loop = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ingest_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = ingest_app.ingest().await {
                tracing::warn!(error = %e, "Scheduled ingest failed");
            }
        }
    });

    let enrich_app = app.clone();
    let enrich_loop = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(enrich_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match consumer.run_batch().await {
                Ok(report) if report.claimed > 0 => {
                    if let Err(e) = enrich_app.refresh_cache().await {
                        tracing::warn!(error = %e, "Scheduled cache refresh failed");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Scheduled enrichment failed"),
            }
        }
    });

    let served = brief::server::serve(&app.config.server.listen, app.server_state()).await;
    ingest_loop.abort();
    enrich_loop.abort();
    served.context("Read service failed")
}
