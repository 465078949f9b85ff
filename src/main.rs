use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dragnet::config::AppConfig;
use dragnet::events::EventBus;
use dragnet::fetch::HttpFetcher;
use dragnet::keywords::RegexKeywordScanner;
use dragnet::phases::dns::TokioDnsResolver;
use dragnet::reconciler::Reconciler;
use dragnet::scheduler::PhaseScheduler;
use dragnet::server::{AppState, serve};
use dragnet::store::{Store, StoreHandle};

#[derive(Parser)]
#[command(name = "dragnet", version, about = "Lead-generation campaign engine")]
struct Cli {
    /// Path to the TOML config file (falls back to DRAGNET_CONFIG, then
    /// ./dragnet.toml, then built-in defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server, scheduler, and background reconciler.
    Serve {
        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one reconciliation pass and exit.
    Reconcile,
    /// Print campaign status and counters.
    Status {
        /// Campaign id.
        campaign_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => {
            let store = StoreHandle::new(
                Store::open(&config.server.db_path).context("Failed to open database")?,
            );
            let bus = EventBus::new();
            let scanner = Arc::new(RegexKeywordScanner::new(store.clone()));
            let scheduler = Arc::new(PhaseScheduler::new(
                store.clone(),
                bus.clone(),
                config.flags,
                Arc::new(HttpFetcher::new()),
                Arc::new(TokioDnsResolver),
                Some(scanner),
            ));

            let reconciler = Reconciler::new(store.clone(), config.reconciler);
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                reconciler.run(shutdown_rx).await;
            });

            let state = Arc::new(AppState {
                store,
                scheduler,
                bus,
            });
            let port = port.unwrap_or(config.server.port);
            let result = serve(state, port).await;
            let _ = shutdown_tx.send(true);
            result
        }
        Commands::Reconcile => {
            let store = StoreHandle::new(
                Store::open(&config.server.db_path).context("Failed to open database")?,
            );
            let reconciler = Reconciler::new(store, config.reconciler);
            let reports = reconciler.run_once()?;
            if reports.is_empty() {
                info!("no drift detected");
            }
            for report in reports {
                info!(
                    campaign_id = report.campaign_id,
                    max_delta = report.max_delta,
                    drift_ratio = report.drift_ratio,
                    corrected = report.corrected,
                    "drift report"
                );
            }
            Ok(())
        }
        Commands::Status { campaign_id } => {
            let store = StoreHandle::new(
                Store::open(&config.server.db_path).context("Failed to open database")?,
            );
            let guard = store.lock().map_err(anyhow::Error::from)?;
            let campaign = guard
                .get_campaign(campaign_id)?
                .with_context(|| format!("Campaign {} not found", campaign_id))?;
            let phases = guard.list_campaign_phases(campaign_id)?;
            let counters = guard.get_counters(campaign_id)?;

            println!("campaign {} ({})", campaign.id, campaign.owner);
            println!(
                "  status: {}  phases: {}/{}",
                campaign.status, campaign.completed_phases, campaign.total_phases
            );
            for phase in phases {
                println!(
                    "  {:<26} {:<12} {:>6.1}%  {}/{}{}",
                    phase.phase_type.as_str(),
                    phase.status.as_str(),
                    phase.progress_pct,
                    phase.items_processed,
                    phase.items_total,
                    phase
                        .last_error
                        .map(|e| format!("  ({})", e))
                        .unwrap_or_default(),
                );
            }
            println!(
                "  domains: {} total | dns ok/err/to: {}/{}/{} | http ok/err/to: {}/{}/{} | leads match/no: {}/{}",
                counters.total,
                counters.dns_ok,
                counters.dns_error,
                counters.dns_timeout,
                counters.http_ok,
                counters.http_error,
                counters.http_timeout,
                counters.lead_match,
                counters.lead_no_match,
            );
            Ok(())
        }
    }
}
