//! Management service client
//!
//! This module provides:
//! - Authenticated HTTP client with `{{id}}` path substitution
//! - Error classification (offline, missing API, privileges, credentials)
//! - One-time detection of the inventory API generation

mod client;
mod error;

#[cfg(test)]
mod tests;

pub use client::{
    substitute_id, Credentials, InventoryApiVersion, RemoteClient, RemoteConfig, ACCOUNT_HEADER,
};
pub use error::{
    incorrect_credentials, server_is_offline, server_lacks_agent_health_api_support,
    user_lacks_api_privileges, ApiErrorDetail, ControllerErrorDetail, ErrorDetail, RemoteError,
};

/// Placeholder substituted with an integration UUID
pub const ID_PLACEHOLDER: &str = "{{id}}";

pub const VERSION_PATH: &str = "version";
pub const REGISTRATION_PATH: &str = "v2/system/integrations/registration";
pub const HEALTH_REPORT_PATH: &str = "v2/system/integrations/{{id}}/health-report";
pub const INVENTORY_PATH_V1: &str = "v1/enterprise/kubernetes-inventory";
pub const INVENTORY_PATH_V2: &str = "v2/kubernetes-inventory";

/// Only v2-capable services answer here
pub const API_VERSION_PROBE_PATH: &str = "v2/version";
