use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::{info, level_filters::LevelFilter, warn};

use beacon_monitor::config::Config;
use beacon_monitor::database::{LibsqlStore, initialize_database};
use beacon_monitor::monitoring::{MonitoringScheduler, ProbeEngine, SchedulerSettings};
use beacon_monitor::notify::{EmailNotifier, LogNotifier, Notifier};
use beacon_monitor::pool::open_pool;

#[derive(Debug, Parser)]
#[command(version, about = "Reachability monitor for HTTP, HTTPS and ICMP targets")]
struct Cli {
    /// Path to the config file (defaults to $XDG_CONFIG_HOME/beacon/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the monitor until interrupted
    Run,
    /// Run a single cycle and exit
    Once,
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to load .env: {e}");
        }
    }

    logger::init_with_level(if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO });

    let config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::ShowConfig => {
            print!("{config}");
            Ok(())
        }
        Command::Once => {
            let scheduler = build_scheduler(&config).await?;
            let summary = scheduler.run_cycle().await?;
            info!("{:?}", summary);
            Ok(())
        }
        Command::Run => {
            let scheduler = build_scheduler(&config).await?;

            // Listen from the start so an interrupt during the first cycle is not lost
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(());
            });

            scheduler
                .run(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            Ok(())
        }
    }
}

async fn build_scheduler(config: &Config) -> Result<MonitoringScheduler> {
    info!("Opening database at {}", config.database.path);
    let pool = open_pool(&config.database.path, config.database.max_connections).await?;

    let conn = pool.get().await?;
    initialize_database(&conn).await?;
    drop(conn);

    let store = Arc::new(LibsqlStore::new(pool));
    let prober = Arc::new(ProbeEngine::new(config.monitor.probe_timeout())?);

    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => {
            info!("Alerts will be emailed through {}:{}", smtp.host, smtp.port);
            Arc::new(EmailNotifier::new(smtp)?)
        }
        None => {
            warn!("No SMTP server configured, alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };

    Ok(MonitoringScheduler::new(
        store.clone(),
        prober,
        notifier,
        store,
        SchedulerSettings::from(&config.monitor),
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, finishing current cycle");
}
