//! Inventory collection from the Kubernetes API
//!
//! This module provides the [`KubeApi`] capability the engine is written
//! against, a kube-rs implementation of it, conversions from API objects to
//! report models, and the [`InventoryEngine`] that fans pod retrieval out
//! across a worker pool.

mod convert;
mod engine;
mod kube_client;
mod pagination;

#[cfg(test)]
mod tests;

pub use convert::{
    containers_from_pod, digest_from_image_id, namespace_from, node_from, normalize_image,
    pod_from, server_version_from, MetadataConfig, MetadataFilter,
};
pub use engine::{CollectionConfig, InventoryEngine, InventoryEngineBuilder};
pub use kube_client::KubeClient;
pub use pagination::list_all;

use crate::models::ServerVersionMetadata;
use anyhow::Result;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use std::sync::Arc;

pub use async_trait::async_trait;

/// Options for one page of a list call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Maximum items per page (0 = server default)
    pub limit: u32,
    /// Continuation token from the previous page
    pub continue_token: Option<String>,
    /// Server-side timeout for the list call
    pub timeout_seconds: u32,
}

/// One page of a list call
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Token for the next page; `None` or empty when this was the last page
    pub continue_token: Option<String>,
}

/// The slice of the Kubernetes API the agent consumes
#[async_trait]
pub trait KubeApi: Send + Sync {
    /// API server build information
    async fn server_version(&self) -> Result<ServerVersionMetadata>;

    async fn list_namespaces(&self, options: &ListOptions) -> Result<Page<Namespace>>;

    async fn list_nodes(&self, options: &ListOptions) -> Result<Page<Node>>;

    async fn list_pods(&self, namespace: &str, options: &ListOptions) -> Result<Page<Pod>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    /// A client handle for one collection worker
    fn handle(&self) -> Arc<dyn KubeApi>;
}
