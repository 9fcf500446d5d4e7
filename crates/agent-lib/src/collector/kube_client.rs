//! kube-rs backed implementation of [`KubeApi`]

use super::{KubeApi, ListOptions, Page};
use crate::collector::server_version_from;
use crate::models::ServerVersionMetadata;
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::api::{Api, ListParams};
use kube::Client;
use std::sync::Arc;
use tracing::info;

/// Kubernetes API client
///
/// Cloning shares the underlying connection pool, so every worker handle is
/// a cheap clone.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        info!("Kubernetes client initialized");
        Ok(Self::new(client))
    }
}

fn list_params(options: &ListOptions) -> ListParams {
    let mut params = ListParams::default();
    if options.limit > 0 {
        params = params.limit(options.limit);
    }
    if let Some(token) = options.continue_token.as_deref().filter(|t| !t.is_empty()) {
        params = params.continue_token(token);
    }
    if options.timeout_seconds > 0 {
        params.timeout = Some(options.timeout_seconds);
    }
    params
}

#[async_trait]
impl KubeApi for KubeClient {
    async fn server_version(&self) -> Result<ServerVersionMetadata> {
        let info = self
            .client
            .apiserver_version()
            .await
            .context("Failed to get Kubernetes server version")?;
        Ok(server_version_from(info))
    }

    async fn list_namespaces(&self, options: &ListOptions) -> Result<Page<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api
            .list(&list_params(options))
            .await
            .context("Failed to list namespaces")?;
        Ok(Page {
            items: list.items,
            continue_token: list.metadata.continue_,
        })
    }

    async fn list_nodes(&self, options: &ListOptions) -> Result<Page<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api
            .list(&list_params(options))
            .await
            .context("Failed to list nodes")?;
        Ok(Page {
            items: list.items,
            continue_token: list.metadata.continue_,
        })
    }

    async fn list_pods(&self, namespace: &str, options: &ListOptions) -> Result<Page<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&list_params(options))
            .await
            .with_context(|| format!("Failed to list pods in namespace {namespace}"))?;
        Ok(Page {
            items: list.items,
            continue_token: list.metadata.continue_,
        })
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .with_context(|| format!("Failed to get pod {namespace}/{name}"))
    }

    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .with_context(|| format!("Failed to get replicaset {namespace}/{name}"))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .with_context(|| format!("Failed to get deployment {namespace}/{name}"))
    }

    fn handle(&self) -> Arc<dyn KubeApi> {
        Arc::new(self.clone())
    }
}
