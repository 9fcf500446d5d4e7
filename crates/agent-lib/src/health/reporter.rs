//! Periodic health reports for a registered integration

use super::gated::{AccountReportInfo, GatedReportInfo};
use crate::models::{duration_secs, now_utc, rfc3339};
use crate::observability::AgentMetrics;
use crate::registration::{Integration, AGENT_TYPE};
use crate::remote::{server_lacks_agent_health_api_support, RemoteClient, RemoteError, HEALTH_REPORT_PATH};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const HEALTH_PROTOCOL_VERSION: u32 = 1;

/// Body of `POST v2/system/integrations/{{id}}/health-report`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub uuid: String,
    pub protocol_version: u32,
    #[serde(with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub integration_id: String,
    #[serde(with = "duration_secs")]
    pub uptime: Duration,
    pub health_data: HealthData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthData {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub errors: Vec<String>,
    pub account_k8s_inventory_reports: AccountReportInfo,
}

#[derive(Debug, Clone)]
pub struct HealthReporterConfig {
    /// Inventory polling interval, used to age out account reports
    pub polling_interval: Duration,
    /// Used when the integration carries no interval
    pub default_interval: Duration,
    pub agent_version: String,
}

impl Default for HealthReporterConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(300),
            default_interval: Duration::from_secs(60),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub struct HealthReporter {
    client: RemoteClient,
    report_info: GatedReportInfo,
    config: HealthReporterConfig,
    metrics: AgentMetrics,
}

impl HealthReporter {
    pub fn new(client: RemoteClient, report_info: GatedReportInfo, config: HealthReporterConfig) -> Self {
        Self {
            client,
            report_info,
            config,
            metrics: AgentMetrics::new(),
        }
    }

    /// Seconds from the integration, or the configured default
    pub fn interval_for(&self, integration: &Integration) -> Duration {
        match integration.health_report_interval {
            0 => self.config.default_interval,
            secs => Duration::from_secs(secs),
        }
    }

    pub fn build_report(&self, integration: &Integration) -> HealthReport {
        let accounts = self
            .report_info
            .account_report_info_no_blocking(self.config.polling_interval);
        let errors = collect_errors(&accounts);
        let uptime = Utc::now()
            .signed_duration_since(integration.started_at)
            .to_std()
            .unwrap_or_default();

        HealthReport {
            uuid: Uuid::new_v4().to_string(),
            protocol_version: HEALTH_PROTOCOL_VERSION,
            timestamp: now_utc(),
            kind: AGENT_TYPE.to_string(),
            integration_id: integration.uuid.clone(),
            uptime,
            health_data: HealthData {
                kind: AGENT_TYPE.to_string(),
                version: self.config.agent_version.clone(),
                errors,
                account_k8s_inventory_reports: accounts,
            },
        }
    }

    pub async fn send(&self, integration: &Integration, report: &HealthReport) -> Result<(), RemoteError> {
        self.client
            .post(report, HEALTH_REPORT_PATH, &integration.uuid)
            .await
            .map(|_| ())
    }

    /// Report until shutdown, the registration channel closes, or the
    /// service turns out not to support health reports
    pub async fn run(self, integration_rx: oneshot::Receiver<Integration>, mut shutdown: broadcast::Receiver<()>) {
        let integration = tokio::select! {
            received = integration_rx => match received {
                Ok(integration) => integration,
                Err(_) => {
                    info!("No integration registered, health reporting disabled");
                    return;
                }
            },
            _ = shutdown.recv() => return,
        };

        let interval = self.interval_for(&integration);
        info!(
            integration_id = %integration.uuid,
            interval_secs = interval.as_secs(),
            "Health reporting started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => {
                    info!("Health reporter shutting down");
                    return;
                }
            }

            let report = self.build_report(&integration);
            match self.send(&integration, &report).await {
                Ok(()) => {
                    self.metrics.inc_health_reports_sent();
                    debug!(report_id = %report.uuid, "Health report sent");
                }
                Err(e) if server_lacks_agent_health_api_support(&e) => {
                    self.metrics.inc_health_report_failures();
                    warn!(error = %e, "Management service does not accept health reports, stopping");
                    return;
                }
                Err(e) => {
                    self.metrics.inc_health_report_failures();
                    warn!(error = %e, "Failed to send health report");
                }
            }
        }
    }
}

/// One entry per failed batch, sorted by account
fn collect_errors(accounts: &AccountReportInfo) -> Vec<String> {
    let mut names: Vec<&String> = accounts.keys().collect();
    names.sort();

    names
        .into_iter()
        .flat_map(|account| {
            accounts[account].batches.iter().filter_map(move |batch| {
                batch
                    .error
                    .as_ref()
                    .map(|e| format!("account {account} batch {}: {e}", batch.batch_index))
            })
        })
        .collect()
}
