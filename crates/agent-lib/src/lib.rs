//! Kubernetes inventory agent library
//!
//! This crate provides the core functionality for:
//! - Collecting namespaces, nodes, pods and containers into inventory reports
//! - Namespace selection and account routing
//! - Delivering reports to the management service
//! - Agent registration and health reporting
//! - Probes and observability

pub mod collector;
pub mod delivery;
pub mod filter;
pub mod health;
pub mod models;
pub mod observability;
pub mod registration;
pub mod remote;
pub mod routing;
pub mod server;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use collector::{CollectionConfig, InventoryEngine, InventoryEngineBuilder, KubeApi, KubeClient};
pub use delivery::{DeliveryConfig, Reporter};
pub use health::{GatedReportInfo, HealthReporter, HealthReporterConfig};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use registration::{lifecycle_channels, Integration, Registrar, RegistrationConfig, RegistrationError};
pub use remote::{Credentials, RemoteClient, RemoteConfig, RemoteError};
pub use status::{AgentStatus, RegistrationPhase};
