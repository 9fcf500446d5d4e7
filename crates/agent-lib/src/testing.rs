//! In-memory Kubernetes API used by unit tests

use crate::collector::{KubeApi, ListOptions, Page};
use crate::models::ServerVersionMetadata;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, Namespace, Node, NodeStatus, NodeSystemInfo, Pod, PodSpec,
    PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Declarative cluster contents
#[derive(Default)]
pub(crate) struct FakeCluster {
    namespaces: Vec<Namespace>,
    nodes: Vec<Node>,
    pods: HashMap<String, Vec<Pod>>,
    replica_sets: HashMap<(String, String), ReplicaSet>,
    deployments: HashMap<(String, String), Deployment>,
    failing_namespace: Option<String>,
    pod_list_delay: Duration,
    pod_list_delays: HashMap<String, Duration>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, name: &str) -> Self {
        self.namespaces.push(k8s_namespace(name));
        self.pods.entry(name.to_string()).or_default();
        self
    }

    pub fn labelled_namespace(mut self, name: &str, key: &str, value: &str) -> Self {
        let mut ns = k8s_namespace(name);
        ns.metadata.labels = Some([(key.to_string(), value.to_string())].into());
        self.namespaces.push(ns);
        self.pods.entry(name.to_string()).or_default();
        self
    }

    pub fn node(mut self, name: &str) -> Self {
        self.nodes.push(k8s_node(name));
        self
    }

    /// Add a running pod with `(container name, image)` pairs
    pub fn pod(mut self, namespace: &str, name: &str, node: &str, containers: &[(&str, &str)]) -> Self {
        self.pods
            .entry(namespace.to_string())
            .or_default()
            .push(k8s_pod(name, node, containers));
        self
    }

    pub fn raw_pod(mut self, namespace: &str, pod: Pod) -> Self {
        self.pods.entry(namespace.to_string()).or_default().push(pod);
        self
    }

    pub fn replica_set(mut self, namespace: &str, rs: ReplicaSet) -> Self {
        let name = rs.metadata.name.clone().unwrap_or_default();
        self.replica_sets.insert((namespace.to_string(), name), rs);
        self
    }

    pub fn deployment(mut self, namespace: &str, deployment: Deployment) -> Self {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        self.deployments.insert((namespace.to_string(), name), deployment);
        self
    }

    /// Pod listing in this namespace fails
    pub fn failing_namespace(mut self, namespace: &str) -> Self {
        self.failing_namespace = Some(namespace.to_string());
        self
    }

    /// Every pod list call sleeps this long
    pub fn pod_list_delay(mut self, delay: Duration) -> Self {
        self.pod_list_delay = delay;
        self
    }

    /// Pod list calls for one namespace sleep this long
    pub fn namespace_delay(mut self, namespace: &str, delay: Duration) -> Self {
        self.pod_list_delays.insert(namespace.to_string(), delay);
        self
    }

    pub fn build(self) -> Arc<FakeKube> {
        Arc::new(FakeKube {
            cluster: Arc::new(self),
            pod_list_calls: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

/// [`KubeApi`] over a [`FakeCluster`]; handles share call counters
pub(crate) struct FakeKube {
    cluster: Arc<FakeCluster>,
    pod_list_calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeKube {
    pub fn pod_list_calls(&self, namespace: &str) -> usize {
        self.pod_list_calls
            .lock()
            .unwrap()
            .get(namespace)
            .copied()
            .unwrap_or(0)
    }
}

fn paginate<T: Clone>(items: &[T], options: &ListOptions) -> Page<T> {
    let start: usize = options
        .continue_token
        .as_deref()
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);
    let limit = if options.limit == 0 {
        items.len()
    } else {
        options.limit as usize
    };
    let end = (start + limit).min(items.len());
    Page {
        items: items[start.min(end)..end].to_vec(),
        continue_token: (end < items.len()).then(|| end.to_string()),
    }
}

#[async_trait]
impl KubeApi for FakeKube {
    async fn server_version(&self) -> Result<ServerVersionMetadata> {
        Ok(ServerVersionMetadata {
            major: "1".to_string(),
            minor: "28".to_string(),
            git_version: "v1.28.2".to_string(),
            platform: "linux/amd64".to_string(),
            ..Default::default()
        })
    }

    async fn list_namespaces(&self, options: &ListOptions) -> Result<Page<Namespace>> {
        Ok(paginate(&self.cluster.namespaces, options))
    }

    async fn list_nodes(&self, options: &ListOptions) -> Result<Page<Node>> {
        Ok(paginate(&self.cluster.nodes, options))
    }

    async fn list_pods(&self, namespace: &str, options: &ListOptions) -> Result<Page<Pod>> {
        *self
            .pod_list_calls
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default() += 1;

        let delay = self
            .cluster
            .pod_list_delays
            .get(namespace)
            .copied()
            .unwrap_or(self.cluster.pod_list_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.cluster.failing_namespace.as_deref() == Some(namespace) {
            bail!("pods is forbidden in namespace {namespace}");
        }
        let pods = self.cluster.pods.get(namespace).cloned().unwrap_or_default();
        Ok(paginate(&pods, options))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.cluster
            .pods
            .get(namespace)
            .and_then(|pods| {
                pods.iter()
                    .find(|p| p.metadata.name.as_deref() == Some(name))
                    .cloned()
            })
            .ok_or_else(|| anyhow!("pod {namespace}/{name} not found"))
    }

    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet> {
        self.cluster
            .replica_sets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("replicaset {namespace}/{name} not found"))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.cluster
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("deployment {namespace}/{name} not found"))
    }

    fn handle(&self) -> Arc<dyn KubeApi> {
        Arc::new(FakeKube {
            cluster: self.cluster.clone(),
            pod_list_calls: self.pod_list_calls.clone(),
        })
    }
}

pub(crate) fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        uid: Some(format!("uid-{name}")),
        ..Default::default()
    }
}

pub(crate) fn owner(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{name}"),
        controller: Some(true),
        ..Default::default()
    }
}

pub(crate) fn k8s_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: meta(name),
        ..Default::default()
    }
}

pub(crate) fn k8s_node(name: &str) -> Node {
    Node {
        metadata: meta(name),
        status: Some(NodeStatus {
            node_info: Some(NodeSystemInfo {
                architecture: "amd64".to_string(),
                container_runtime_version: "containerd://1.7.2".to_string(),
                kernel_version: "6.1.0".to_string(),
                kube_proxy_version: "v1.28.2".to_string(),
                kubelet_version: "v1.28.2".to_string(),
                operating_system: "linux".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A running pod whose status carries a digest and runtime ID per container
pub(crate) fn k8s_pod(name: &str, node: &str, containers: &[(&str, &str)]) -> Pod {
    let spec_containers = containers
        .iter()
        .map(|(c, image)| Container {
            name: c.to_string(),
            image: Some(image.to_string()),
            ..Default::default()
        })
        .collect();
    let statuses = containers
        .iter()
        .map(|(c, image)| ContainerStatus {
            name: c.to_string(),
            image: image.to_string(),
            image_id: format!("{image}@sha256:{name}{c}"),
            container_id: Some(format!("containerd://{name}-{c}")),
            ready: true,
            ..Default::default()
        })
        .collect();

    Pod {
        metadata: meta(name),
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            containers: spec_containers,
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: Some(statuses),
            ..Default::default()
        }),
    }
}
