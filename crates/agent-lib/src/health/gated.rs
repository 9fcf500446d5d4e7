//! Delivery bookkeeping shared between report delivery and health reporting
//!
//! The map is only touched under `try_lock`. A caller that loses the race
//! skips its read or write instead of waiting; stale bookkeeping is accepted
//! in exchange for never stalling report delivery or the health cadence.

use crate::models::rfc3339;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Outcome of sending one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub batch_index: usize,
    #[serde(with = "rfc3339")]
    pub send_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Audit trail of one report delivery to one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReportInfo {
    #[serde(with = "rfc3339")]
    pub report_timestamp: DateTime<Utc>,
    pub account_name: String,
    pub sent_as_user: String,
    /// Number of batches the report was split into
    pub batch_size: usize,
    /// Index of the last batch accepted by the service, -1 if none
    pub last_successful_index: i64,
    pub has_errors: bool,
    pub batches: Vec<BatchInfo>,
}

impl InventoryReportInfo {
    pub fn new(
        report_timestamp: DateTime<Utc>,
        account_name: impl Into<String>,
        sent_as_user: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            report_timestamp,
            account_name: account_name.into(),
            sent_as_user: sent_as_user.into(),
            batch_size,
            last_successful_index: -1,
            has_errors: false,
            batches: Vec::with_capacity(batch_size),
        }
    }

    /// Record the outcome of sending batch `batch_index`
    pub fn record_batch(&mut self, batch_index: usize, error: Option<String>) {
        match &error {
            Some(_) => self.has_errors = true,
            None => self.last_successful_index = batch_index as i64,
        }
        self.batches.push(BatchInfo {
            batch_index,
            send_timestamp: crate::models::now_utc(),
            error,
        });
    }
}

/// Most recent delivery status per account
pub type AccountReportInfo = HashMap<String, InventoryReportInfo>;

/// Try-lock guarded [`AccountReportInfo`]
#[derive(Debug, Clone, Default)]
pub struct GatedReportInfo {
    access_gate: Arc<Mutex<AccountReportInfo>>,
}

impl GatedReportInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the account's entry unless another caller holds the gate.
    ///
    /// Returns false when the update was dropped.
    pub fn set_report_info_no_blocking(
        &self,
        account: &str,
        batch_index: usize,
        info: InventoryReportInfo,
    ) -> bool {
        match self.access_gate.try_lock() {
            Ok(mut reports) => {
                reports.insert(account.to_string(), info);
                true
            }
            Err(_) => {
                debug!(account = %account, batch_index = batch_index, "Report info busy, dropping update");
                false
            }
        }
    }

    /// Prune entries older than twice the polling interval and return the rest.
    ///
    /// Returns an empty map, without touching the store, when the gate is held.
    pub fn account_report_info_no_blocking(&self, polling_interval: Duration) -> AccountReportInfo {
        let Ok(mut reports) = self.access_gate.try_lock() else {
            debug!("Report info busy, skipping account reports for this health report");
            return AccountReportInfo::new();
        };

        let max_age = polling_interval * 2;
        let now = Utc::now();
        reports.retain(|account, info| {
            // Future timestamps count as fresh
            let age = now
                .signed_duration_since(info.report_timestamp)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let keep = age <= max_age;
            if !keep {
                debug!(account = %account, "Pruning report info for inactive account");
            }
            keep
        });

        reports.clone()
    }
}
