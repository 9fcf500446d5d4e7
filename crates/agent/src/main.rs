//! Inventory Agent - Kubernetes workload inventory reporter
//!
//! Collects namespaces, nodes, pods and container images from the cluster
//! and reports them to the management service, either once or on a schedule.

use agent_lib::{
    delivery::Reporter,
    health::GatedReportInfo,
    observability::{AgentMetrics, StructuredLogger},
    remote::RemoteClient,
    server::{self, AppState},
    status::{AgentStatus, RegistrationPhase},
    InventoryEngine, KubeApi, KubeClient,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod runner;

use runner::Runner;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Collect and report once, then exit
    Adhoc,
    /// Register, then report on every polling interval
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "inventory-agent", version, about = "Kubernetes workload inventory agent")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "INVENTORY_CONFIG_FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value = "adhoc")]
    mode: Mode,

    /// Overrides the configured polling interval
    #[arg(long)]
    polling_interval_seconds: Option<u64>,

    /// Print each report to stdout
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let mut config = config::AgentConfig::load(cli.config.as_deref())?;
    if let Some(secs) = cli.polling_interval_seconds {
        config.polling_interval_seconds = secs;
    }

    let logger = StructuredLogger::new(&config.cluster_name);
    let mode = match cli.mode {
        Mode::Adhoc => "adhoc",
        Mode::Periodic => "periodic",
    };
    logger.log_startup(AGENT_VERSION, mode);

    let kube: Arc<dyn KubeApi> = Arc::new(
        KubeClient::try_default()
            .await
            .context("failed to create Kubernetes client")?,
    );
    let engine = InventoryEngine::new(kube.clone(), config.collection_config());

    let report_info = GatedReportInfo::new();
    let remote = config
        .remote_config()
        .map(|remote| RemoteClient::new(&remote))
        .transpose()
        .context("failed to create management service client")?;
    if remote.is_none() {
        warn!("No management service URL configured, reports will not be delivered");
    }
    let reporter = remote
        .clone()
        .map(|client| Reporter::new(client, report_info.clone(), config.delivery_config()));

    let status = AgentStatus::new();
    let print_report = cli.output == Some(OutputFormat::Json) || remote.is_none();
    let runner = Runner::new(engine, reporter, print_report, logger.clone(), status.clone());

    if cli.mode == Mode::Adhoc {
        let result = runner.run_cycle().await;
        logger.log_shutdown("adhoc cycle finished");
        return result.map(|_| ());
    }

    let metrics = AgentMetrics::new();
    let app_state = Arc::new(AppState::new(status.clone(), metrics.clone()));
    let port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = server::serve(port, app_state).await {
            warn!(error = %e, "API server stopped");
        }
    });

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        let logger = logger.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                logger.log_shutdown("SIGINT received");
                let _ = shutdown_tx.send(());
            }
        }
    });

    let start = match remote {
        Some(client) => {
            let enabled = runner::spawn_registration(
                &config,
                client,
                kube,
                report_info,
                status.clone(),
                logger.clone(),
                &shutdown_tx,
            );
            runner::wait_for_inventory_enabled(enabled, &status, &mut shutdown_rx).await
        }
        None => {
            status.set_registration(RegistrationPhase::Disabled).await;
            metrics.set_registration_phase(RegistrationPhase::Disabled);
            true
        }
    };

    if start {
        info!(
            interval_secs = config.polling_interval().as_secs(),
            "Starting periodic inventory"
        );
        runner::run_periodic(&runner, config.polling_interval(), &mut shutdown_rx).await;
    }

    info!("Shutting down");
    Ok(())
}
