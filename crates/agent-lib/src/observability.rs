//! Observability infrastructure for the inventory agent
//!
//! Provides:
//! - Prometheus metrics (cycle latency, inventory sizes, delivery and health report outcomes)
//! - Structured JSON logging with tracing

use crate::models::Report;
use crate::status::RegistrationPhase;
use prometheus::{register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

/// Histogram buckets for inventory cycle latency (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    cycle_duration_seconds: Histogram,
    cycles_total: IntCounter,
    cycle_failures_total: IntCounter,
    namespaces: IntGauge,
    nodes: IntGauge,
    pods: IntGauge,
    containers: IntGauge,
    batches_sent_total: IntCounter,
    batch_failures_total: IntCounter,
    health_reports_sent_total: IntCounter,
    health_report_failures_total: IntCounter,
    registration_state: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "inventory_agent_cycle_duration_seconds",
                "Time spent collecting one inventory report",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            cycles_total: register_int_counter!(
                "inventory_agent_cycles_total",
                "Inventory cycles started"
            )
            .expect("Failed to register cycles_total"),

            cycle_failures_total: register_int_counter!(
                "inventory_agent_cycle_failures_total",
                "Inventory cycles that failed to collect or deliver"
            )
            .expect("Failed to register cycle_failures_total"),

            namespaces: register_int_gauge!(
                "inventory_agent_namespaces",
                "Namespaces in the last report"
            )
            .expect("Failed to register namespaces"),

            nodes: register_int_gauge!("inventory_agent_nodes", "Nodes in the last report")
                .expect("Failed to register nodes"),

            pods: register_int_gauge!("inventory_agent_pods", "Pods in the last report")
                .expect("Failed to register pods"),

            containers: register_int_gauge!(
                "inventory_agent_containers",
                "Containers in the last report"
            )
            .expect("Failed to register containers"),

            batches_sent_total: register_int_counter!(
                "inventory_agent_report_batches_sent_total",
                "Report batches accepted by the management service"
            )
            .expect("Failed to register report_batches_sent_total"),

            batch_failures_total: register_int_counter!(
                "inventory_agent_report_batch_failures_total",
                "Report batches rejected or not delivered"
            )
            .expect("Failed to register report_batch_failures_total"),

            health_reports_sent_total: register_int_counter!(
                "inventory_agent_health_reports_sent_total",
                "Health reports accepted by the management service"
            )
            .expect("Failed to register health_reports_sent_total"),

            health_report_failures_total: register_int_counter!(
                "inventory_agent_health_report_failures_total",
                "Health reports that failed to send"
            )
            .expect("Failed to register health_report_failures_total"),

            registration_state: register_int_gauge!(
                "inventory_agent_registration_state",
                "0 pending, 1 inventory only, 2 registered, 3 disabled, -1 failed"
            )
            .expect("Failed to register registration_state"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn inc_cycles(&self) {
        self.inner().cycles_total.inc();
    }

    pub fn inc_cycle_failures(&self) {
        self.inner().cycle_failures_total.inc();
    }

    pub fn observe_cycle_duration(&self, duration: Duration) {
        self.inner().cycle_duration_seconds.observe(duration.as_secs_f64());
    }

    /// Update inventory size gauges from a collected report
    pub fn record_report(&self, report: &Report) {
        let inner = self.inner();
        inner.namespaces.set(report.namespaces.len() as i64);
        inner.nodes.set(report.nodes.len() as i64);
        inner.pods.set(report.pods.len() as i64);
        inner.containers.set(report.containers.len() as i64);
    }

    pub fn inc_batches_sent(&self) {
        self.inner().batches_sent_total.inc();
    }

    pub fn inc_batch_failures(&self) {
        self.inner().batch_failures_total.inc();
    }

    pub fn inc_health_reports_sent(&self) {
        self.inner().health_reports_sent_total.inc();
    }

    pub fn inc_health_report_failures(&self) {
        self.inner().health_report_failures_total.inc();
    }

    pub fn set_registration_phase(&self, phase: RegistrationPhase) {
        let value = match phase {
            RegistrationPhase::Pending => 0,
            RegistrationPhase::InventoryOnly => 1,
            RegistrationPhase::Registered => 2,
            RegistrationPhase::Disabled => 3,
            RegistrationPhase::Failed => -1,
        };
        self.inner().registration_state.set(value);
    }
}

/// Structured logger for agent events
///
/// Every record carries an `event` name and the cluster it describes.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster_name: String,
}

impl StructuredLogger {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, mode: &str) {
        info!(
            event = "agent_started",
            cluster = %self.cluster_name,
            agent_version = %version,
            mode = %mode,
            "Inventory agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            cluster = %self.cluster_name,
            reason = %reason,
            "Inventory agent shutting down"
        );
    }

    pub fn log_cycle_completed(&self, report: &Report, elapsed: Duration) {
        info!(
            event = "inventory_cycle_completed",
            cluster = %self.cluster_name,
            namespaces = report.namespaces.len(),
            nodes = report.nodes.len(),
            pods = report.pods.len(),
            containers = report.containers.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Inventory cycle completed"
        );
    }

    pub fn log_cycle_failed(&self, error: &anyhow::Error) {
        error!(
            event = "inventory_cycle_failed",
            cluster = %self.cluster_name,
            error = %format!("{error:#}"),
            "Inventory cycle failed"
        );
    }

    pub fn log_delivery(&self, account: &str, batches: usize, success: bool) {
        if success {
            info!(
                event = "report_delivered",
                cluster = %self.cluster_name,
                account = %account,
                batches = batches,
                "Inventory report delivered"
            );
        } else {
            warn!(
                event = "report_delivered",
                cluster = %self.cluster_name,
                account = %account,
                batches = batches,
                success = false,
                "Inventory report delivery failed"
            );
        }
    }

    pub fn log_registration_state(&self, phase: RegistrationPhase, detail: Option<&str>) {
        match phase {
            RegistrationPhase::Failed => warn!(
                event = "registration_state",
                cluster = %self.cluster_name,
                phase = ?phase,
                detail = detail.unwrap_or_default(),
                "Registration failed, continuing without health reporting"
            ),
            _ => info!(
                event = "registration_state",
                cluster = %self.cluster_name,
                phase = ?phase,
                detail = detail.unwrap_or_default(),
                "Registration state changed"
            ),
        }
    }
}
