//! Inventory cycle scheduling
//!
//! One-shot mode runs a single cycle and surfaces its failure to the caller.
//! Periodic mode registers with the management service in the background,
//! waits for inventory reporting to be enabled and then runs a cycle on every
//! tick, logging failures and carrying on.

use crate::config::AgentConfig;
use agent_lib::{
    delivery::Reporter,
    health::{GatedReportInfo, HealthReporter},
    models::Report,
    observability::{AgentMetrics, StructuredLogger},
    registration::{lifecycle_channels, Registrar, RegistrationError},
    remote::RemoteClient,
    status::{AgentStatus, RegistrationPhase},
    InventoryEngine, KubeApi,
};
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Everything one cycle needs
pub struct Runner {
    engine: InventoryEngine,
    reporter: Option<Reporter>,
    print_report: bool,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    status: AgentStatus,
}

impl Runner {
    pub fn new(
        engine: InventoryEngine,
        reporter: Option<Reporter>,
        print_report: bool,
        logger: StructuredLogger,
        status: AgentStatus,
    ) -> Self {
        Self {
            engine,
            reporter,
            print_report,
            metrics: AgentMetrics::new(),
            logger,
            status,
        }
    }

    /// Collect one report, print it if asked and deliver it when a service is configured
    pub async fn run_cycle(&self) -> Result<Report> {
        self.metrics.inc_cycles();
        let started = Instant::now();

        let outcome = self.collect_and_deliver().await;
        let elapsed = started.elapsed();
        self.metrics.observe_cycle_duration(elapsed);

        match &outcome {
            Ok(report) => {
                self.metrics.record_report(report);
                self.logger.log_cycle_completed(report, elapsed);
                self.status.record_cycle_success().await;
            }
            Err(e) => {
                self.metrics.inc_cycle_failures();
                self.logger.log_cycle_failed(e);
                self.status.record_cycle_failure(format!("{e:#}")).await;
            }
        }
        outcome
    }

    async fn collect_and_deliver(&self) -> Result<Report> {
        let report = self.engine.collect().await.context("inventory collection failed")?;

        if self.print_report {
            print_json(&report)?;
        }

        match &self.reporter {
            Some(reporter) => {
                let delivered = reporter.deliver(&report).await?;
                for outcome in &delivered {
                    self.logger
                        .log_delivery(&outcome.account, outcome.batches, outcome.sent == outcome.batches);
                }
            }
            None => debug!("No management service configured, skipping delivery"),
        }
        Ok(report)
    }
}

fn print_json(report: &Report) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, report).context("failed to write report")?;
    writeln!(stdout)?;
    Ok(())
}

/// Start registration and health reporting.
///
/// Returns the receiver the inventory loop waits on before its first cycle.
pub fn spawn_registration(
    config: &AgentConfig,
    client: RemoteClient,
    kube: Arc<dyn KubeApi>,
    report_info: GatedReportInfo,
    status: AgentStatus,
    logger: StructuredLogger,
    shutdown: &broadcast::Sender<()>,
) -> oneshot::Receiver<()> {
    let (signals, receivers) = lifecycle_channels();

    let health = HealthReporter::new(client.clone(), report_info, config.health_config());
    tokio::spawn(health.run(receivers.integration, shutdown.subscribe()));

    let registrar = Registrar::new(client, config.registration_config()).with_kube(kube);
    let metrics = AgentMetrics::new();
    tokio::spawn(async move {
        let phase = match registrar.run(signals).await {
            Ok(_) => {
                logger.log_registration_state(RegistrationPhase::Registered, None);
                RegistrationPhase::Registered
            }
            Err(e) => {
                let detail = registration_failure_detail(&e);
                logger.log_registration_state(RegistrationPhase::Failed, Some(&detail));
                RegistrationPhase::Failed
            }
        };
        metrics.set_registration_phase(phase);
        status.set_registration(phase).await;
    });

    receivers.inventory_reporting_enabled
}

fn registration_failure_detail(err: &RegistrationError) -> String {
    if err.is_configuration_problem() {
        format!("{err}; check the configured credentials and account permissions")
    } else {
        err.to_string()
    }
}

/// Wait until inventory reporting may start.
///
/// A closed channel means registration ended without enabling it; inventory
/// is still reported so a registration failure never stops collection.
pub async fn wait_for_inventory_enabled(
    receiver: oneshot::Receiver<()>,
    status: &AgentStatus,
    shutdown: &mut broadcast::Receiver<()>,
) -> bool {
    tokio::select! {
        result = receiver => {
            match result {
                Ok(()) => info!("Inventory reporting enabled"),
                Err(_) => warn!("Registration finished without enabling inventory reporting, reporting anyway"),
            }
            if status.registration().await == RegistrationPhase::Pending {
                status.set_registration(RegistrationPhase::InventoryOnly).await;
            }
            true
        }
        _ = shutdown.recv() => false,
    }
}

/// Run cycles on a fixed interval until shutdown
pub async fn run_periodic(
    runner: &Runner,
    interval: std::time::Duration,
    shutdown: &mut broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Failures are logged and recorded by run_cycle
                let _ = runner.run_cycle().await;
            }
            _ = shutdown.recv() => {
                info!("Inventory loop shutting down");
                return;
            }
        }
    }
}
