//! Health reporting to the management service
//!
//! Delivery writes per-account outcomes into [`GatedReportInfo`]; the
//! [`HealthReporter`] reads them back without blocking and posts a
//! [`HealthReport`] on the integration's interval.

mod gated;
mod reporter;


pub use gated::{AccountReportInfo, BatchInfo, GatedReportInfo, InventoryReportInfo};
pub use reporter::{HealthData, HealthReport, HealthReporter, HealthReporterConfig, HEALTH_PROTOCOL_VERSION};
