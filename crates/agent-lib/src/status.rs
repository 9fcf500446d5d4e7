//! Agent status for Kubernetes liveness and readiness probes
//!
//! Tracks the registration phase and the outcome of recent inventory cycles.

use crate::models::{now_utc, rfc3339};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failed cycles before the agent reports itself unhealthy
pub const FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Operational, but the last cycle or registration failed
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPhase {
    Pending,
    /// Service too old to register against; reports are still sent
    InventoryOnly,
    Registered,
    Failed,
    /// No management service configured
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleOutcome {
    #[serde(with = "rfc3339")]
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: HealthStatus,
    pub registration: RegistrationPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<CycleOutcome>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct StatusState {
    registration: RegistrationPhase,
    last_cycle: Option<CycleOutcome>,
    last_success: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

#[derive(Debug, Clone)]
pub struct AgentStatus {
    state: Arc<RwLock<StatusState>>,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStatus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StatusState {
                registration: RegistrationPhase::Pending,
                last_cycle: None,
                last_success: None,
                consecutive_failures: 0,
            })),
        }
    }

    pub async fn set_registration(&self, phase: RegistrationPhase) {
        self.state.write().await.registration = phase;
    }

    pub async fn registration(&self) -> RegistrationPhase {
        self.state.read().await.registration
    }

    pub async fn record_cycle_success(&self) {
        let mut state = self.state.write().await;
        let now = now_utc();
        state.last_cycle = Some(CycleOutcome {
            finished_at: now,
            success: true,
            error: None,
        });
        state.last_success = Some(now);
        state.consecutive_failures = 0;
    }

    pub async fn record_cycle_failure(&self, error: impl Into<String>) {
        let mut state = self.state.write().await;
        state.last_cycle = Some(CycleOutcome {
            finished_at: now_utc(),
            success: false,
            error: Some(error.into()),
        });
        state.consecutive_failures += 1;
    }

    pub async fn health(&self) -> StatusResponse {
        let state = self.state.read().await;
        let last_failed = state.last_cycle.as_ref().map(|c| !c.success).unwrap_or(false);

        let status = if state.consecutive_failures >= FAILURE_THRESHOLD {
            HealthStatus::Unhealthy
        } else if last_failed || state.registration == RegistrationPhase::Failed {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        StatusResponse {
            status,
            registration: state.registration,
            last_cycle: state.last_cycle.clone(),
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Ready once a cycle has succeeded, until failures cross the threshold
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        if state.last_success.is_none() {
            ReadinessResponse {
                ready: false,
                reason: Some("No inventory cycle completed yet".to_string()),
            }
        } else if state.consecutive_failures >= FAILURE_THRESHOLD {
            ReadinessResponse {
                ready: false,
                reason: Some(format!(
                    "Last {} inventory cycles failed",
                    state.consecutive_failures
                )),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}
