//! Agent registration with the management service
//!
//! Registration waits for a compatible service version, registers the agent
//! as an integration and publishes the result on one-time lifecycle signals:
//! - the registered [`Integration`], which starts health reporting
//! - health reporting enabled
//! - inventory reporting enabled, which may fire early when the service is
//!   too old to register against

mod backoff;
mod lifecycle;
mod registrar;
mod version;


pub use backoff::{attempts_remaining, Backoff};
pub use lifecycle::{lifecycle_channels, LifecycleReceivers, LifecycleSignals};
pub use registrar::{Registrar, RegistrationConfig};
pub use version::{ServiceVersion, VersionResponse};

use crate::models::{duration_secs, rfc3339};
use crate::remote::RemoteError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Integration type reported for this agent
pub const AGENT_TYPE: &str = "k8s_inventory_agent";

/// Minimum management service version that supports integrations
pub const MIN_SERVICE_VERSION: &str = "5.11";

/// Request body for `POST v2/system/integrations/registration`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub registration_id: String,
    pub registration_instance_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub version: String,
    #[serde(with = "rfc3339")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub uptime: Duration,
    pub username: String,
    pub account_name: String,
    pub explicitly_account_bound: Vec<String>,
    pub namespaces: Vec<String>,
    pub cluster_name: String,
    pub namespace: String,
    /// Seconds between health reports
    pub health_report_interval: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<serde_json::Value>,
}

/// The agent's identity as known to the management service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub uuid: String,
    #[serde(default)]
    pub registration_id: String,
    #[serde(default)]
    pub registration_instance_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_status: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_status: Option<serde_json::Value>,
    #[serde(with = "rfc3339", default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    #[serde(with = "duration_secs", default)]
    pub uptime: Duration,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub explicitly_account_bound: Vec<String>,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub health_report_interval: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<serde_json::Value>,
}

/// Terminal registration outcomes
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("user lacks the API privileges required to register the agent")]
    InsufficientPrivileges(#[source] RemoteError),

    #[error("incorrect credentials for the management service")]
    IncorrectCredentials(#[source] RemoteError),

    #[error("management service does not support agent registration")]
    UnsupportedRemote(#[source] RemoteError),

    #[error("giving up after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: String },

    #[error("malformed service version {0:?}")]
    Malformed(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl RegistrationError {
    /// Whether the failure needs operator action rather than time
    pub fn is_configuration_problem(&self) -> bool {
        matches!(
            self,
            Self::InsufficientPrivileges(_) | Self::IncorrectCredentials(_)
        )
    }
}
