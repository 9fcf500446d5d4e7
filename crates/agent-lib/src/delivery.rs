//! Report delivery
//!
//! Splits a collected report per destination account, sends each account's
//! share in namespace batches and records the outcome for health reporting.

use crate::health::{GatedReportInfo, InventoryReportInfo};
use crate::models::{Namespace, Report};
use crate::observability::AgentMetrics;
use crate::remote::{Credentials, RemoteClient, RemoteError};
use crate::routing::{route_namespaces, route_namespaces_by_label, AccountRoute, LabelRouting};
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct DeliveryConfig {
    /// Account and credentials used for unrouted namespaces
    pub default_credentials: Credentials,
    pub routes: Vec<AccountRoute>,
    /// Takes precedence over `routes` when set
    pub label_routing: Option<LabelRouting>,
    /// Namespaces per request; 0 sends everything at once
    pub batch_size: usize,
}

/// Outcome of delivering to one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDelivery {
    pub account: String,
    pub batches: usize,
    pub sent: usize,
}

pub struct Reporter {
    client: RemoteClient,
    report_info: GatedReportInfo,
    config: DeliveryConfig,
    metrics: AgentMetrics,
}

impl Reporter {
    pub fn new(client: RemoteClient, report_info: GatedReportInfo, config: DeliveryConfig) -> Self {
        Self {
            client,
            report_info,
            config,
            metrics: AgentMetrics::new(),
        }
    }

    /// Deliver a report to every routed account.
    ///
    /// A failing account does not stop delivery to the others; the error
    /// names every account that failed.
    pub async fn deliver(&self, report: &Report) -> Result<Vec<AccountDelivery>> {
        let buckets = self.route(&report.namespaces);

        let mut delivered = Vec::with_capacity(buckets.len());
        let mut failed = Vec::new();
        for (account, namespaces) in &buckets {
            match self.deliver_account(report, account, namespaces).await {
                Ok(outcome) => delivered.push(outcome),
                Err(e) => {
                    warn!(account = %account, error = %e, "Failed to deliver inventory report");
                    failed.push(account.clone());
                }
            }
        }

        if !failed.is_empty() {
            bail!("failed to deliver inventory for accounts: {}", failed.join(", "));
        }
        Ok(delivered)
    }

    fn route(&self, namespaces: &[Namespace]) -> BTreeMap<String, Vec<Namespace>> {
        let default_account = &self.config.default_credentials.account;
        let mut buckets = match &self.config.label_routing {
            Some(routing) => route_namespaces_by_label(default_account, namespaces, routing),
            None => route_namespaces(default_account, namespaces, &self.config.routes),
        };
        // Node data is still worth sending when nothing is in scope
        if buckets.is_empty() {
            buckets.insert(default_account.clone(), Vec::new());
        }
        buckets
    }

    fn credentials_for(&self, account: &str) -> Credentials {
        let default = &self.config.default_credentials;
        match self.config.routes.iter().find(|r| r.account == account) {
            Some(route) => route.credentials(default),
            None => Credentials {
                account: account.to_string(),
                ..default.clone()
            },
        }
    }

    async fn deliver_account(
        &self,
        report: &Report,
        account: &str,
        namespaces: &[Namespace],
    ) -> Result<AccountDelivery, RemoteError> {
        let credentials = self.credentials_for(account);
        let client = self.client.for_account(credentials.clone());
        let batches = split_batches(namespaces, self.config.batch_size);

        let mut info =
            InventoryReportInfo::new(report.timestamp, account, &credentials.user, batches.len());
        let mut sent = 0;

        for (index, batch) in batches.iter().enumerate() {
            let scoped = report.scoped_to(batch);
            let result = client.post_inventory(&scoped).await;

            info.record_batch(index, result.as_ref().err().map(ToString::to_string));
            self.report_info
                .set_report_info_no_blocking(account, index, info.clone());

            match result {
                Ok(()) => {
                    sent += 1;
                    self.metrics.inc_batches_sent();
                    debug!(
                        account = %account,
                        batch = index,
                        namespaces = batch.len(),
                        pods = scoped.pods.len(),
                        "Inventory batch delivered"
                    );
                }
                Err(e) => {
                    self.metrics.inc_batch_failures();
                    return Err(e);
                }
            }
        }

        info!(account = %account, batches = batches.len(), "Inventory delivered");
        Ok(AccountDelivery {
            account: account.to_string(),
            batches: batches.len(),
            sent,
        })
    }
}

/// Split namespaces into batches of at most `size`; always at least one batch
pub fn split_batches(namespaces: &[Namespace], size: usize) -> Vec<Vec<Namespace>> {
    if size == 0 || namespaces.len() <= size {
        return vec![namespaces.to_vec()];
    }
    namespaces.chunks(size).map(<[Namespace]>::to_vec).collect()
}
