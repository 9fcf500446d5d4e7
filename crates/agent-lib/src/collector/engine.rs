//! Inventory collection engine
//!
//! One cycle lists namespaces and nodes, then fans pod retrieval out across
//! a fixed pool of workers pulling namespaces off a pre-filled queue. The
//! coordinator waits for one result per namespace, failing the whole cycle
//! on the first worker error or when no result arrives within the request
//! timeout.

use super::convert::{containers_from_pod, namespace_from, node_from, pod_from, MetadataConfig, MetadataFilter};
use super::pagination::list_all;
use super::KubeApi;
use crate::filter::{build_exclusion_checklist, filter_namespaces, ExclusionCheck};
use crate::models::{now_utc, Namespace, Node, Report, ReportItem, INVENTORY_TYPE};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const POD_PHASE_RUNNING: &str = "Running";

/// Configuration for an inventory cycle
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Cluster name stamped on every report
    pub cluster_name: String,
    /// Items per list page (default: 100)
    pub page_size: u32,
    /// Per-page API timeout, also the quiescence timeout between worker results
    pub request_timeout: Duration,
    /// Number of pod-collection workers (default: 100)
    pub worker_count: usize,
    /// Only these namespaces are reported when non-empty
    pub include_namespaces: Vec<String>,
    /// Exact names or regexes of namespaces to skip
    pub exclude_namespaces: Vec<String>,
    /// Drop namespaces that have no pods
    pub ignore_empty: bool,
    /// Skip containers of pods that are not running
    pub ignore_not_running: bool,
    /// Pod label/annotation selection
    pub metadata: MetadataConfig,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            page_size: 100,
            request_timeout: Duration::from_secs(60),
            worker_count: 100,
            include_namespaces: Vec::new(),
            exclude_namespaces: Vec::new(),
            ignore_empty: false,
            ignore_not_running: false,
            metadata: MetadataConfig::default(),
        }
    }
}

/// Shared read-only state handed to every worker
struct WorkerContext {
    page_size: u32,
    request_timeout: Duration,
    nodes: HashMap<String, Node>,
    metadata: MetadataFilter,
    ignore_not_running: bool,
}

/// Produces one [`Report`] per call to [`InventoryEngine::collect`]
pub struct InventoryEngine {
    kube: Arc<dyn KubeApi>,
    config: CollectionConfig,
    exclusions: Vec<ExclusionCheck>,
    metadata: MetadataFilter,
}

impl InventoryEngine {
    pub fn new(kube: Arc<dyn KubeApi>, config: CollectionConfig) -> Self {
        let exclusions = build_exclusion_checklist(&config.exclude_namespaces);
        let metadata = MetadataFilter::new(&config.metadata);
        Self {
            kube,
            config,
            exclusions,
            metadata,
        }
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Run one inventory cycle
    pub async fn collect(&self) -> Result<Report> {
        let start = Instant::now();

        let server_version_metadata = self.kube.server_version().await?;
        let namespaces = self.fetch_namespaces().await?;
        let nodes = self.fetch_nodes().await?;
        let node_count = nodes.len();

        let items = self.collect_namespaces(&namespaces, nodes.clone()).await?;

        let mut report = Report {
            timestamp: now_utc(),
            cluster_name: self.config.cluster_name.clone(),
            inventory_type: INVENTORY_TYPE.to_string(),
            namespaces: Vec::with_capacity(items.len()),
            nodes: nodes.into_values().collect(),
            pods: Vec::new(),
            containers: Vec::new(),
            server_version_metadata,
        };
        report.nodes.sort_by(|a, b| a.name.cmp(&b.name));

        for item in items {
            if item.pods.is_empty() && self.config.ignore_empty {
                debug!(namespace = %item.namespace.name, "Dropping empty namespace");
                continue;
            }
            report.namespaces.push(item.namespace);
            report.pods.extend(item.pods);
            report.containers.extend(item.containers);
        }

        info!(
            namespaces = report.namespaces.len(),
            nodes = node_count,
            pods = report.pods.len(),
            containers = report.containers.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Inventory collected"
        );

        Ok(report)
    }

    async fn fetch_namespaces(&self) -> Result<Vec<Namespace>> {
        let kube = self.kube.as_ref();
        let raw = list_all(
            "namespaces",
            self.config.page_size,
            self.config.request_timeout,
            |opts| async move { kube.list_namespaces(&opts).await },
        )
        .await?;

        let all: Vec<Namespace> = raw.iter().map(namespace_from).collect();
        let total = all.len();
        let selected = filter_namespaces(all, &self.config.include_namespaces, &self.exclusions);
        debug!(total = total, selected = selected.len(), "Filtered namespaces");
        Ok(selected)
    }

    async fn fetch_nodes(&self) -> Result<HashMap<String, Node>> {
        let kube = self.kube.as_ref();
        let raw = list_all(
            "nodes",
            self.config.page_size,
            self.config.request_timeout,
            |opts| async move { kube.list_nodes(&opts).await },
        )
        .await?;

        Ok(raw
            .iter()
            .map(node_from)
            .map(|node| (node.name.clone(), node))
            .collect())
    }

    /// Fan namespaces out to the worker pool and gather one item per namespace.
    ///
    /// Items are returned in the order of `namespaces`.
    async fn collect_namespaces(
        &self,
        namespaces: &[Namespace],
        nodes: HashMap<String, Node>,
    ) -> Result<Vec<ReportItem>> {
        if namespaces.is_empty() {
            return Ok(Vec::new());
        }

        let expected = namespaces.len();
        let (queue_tx, queue_rx) = mpsc::channel::<Namespace>(expected);
        for namespace in namespaces {
            queue_tx
                .try_send(namespace.clone())
                .map_err(|e| anyhow!("failed to queue namespace: {e}"))?;
        }
        drop(queue_tx);

        let queue = Arc::new(Mutex::new(queue_rx));
        let (results_tx, mut results_rx) = mpsc::channel::<Result<ReportItem>>(expected);
        let (stop_tx, stop_rx) = watch::channel(false);
        let context = Arc::new(WorkerContext {
            page_size: self.config.page_size,
            request_timeout: self.config.request_timeout,
            nodes,
            metadata: self.metadata.clone(),
            ignore_not_running: self.config.ignore_not_running,
        });

        let workers = self.config.worker_count.clamp(1, expected);
        for worker_id in 0..workers {
            tokio::spawn(run_worker(
                worker_id,
                self.kube.handle(),
                queue.clone(),
                results_tx.clone(),
                stop_rx.clone(),
                context.clone(),
            ));
        }
        drop(results_tx);

        let timeout = self.config.request_timeout;
        let mut received: HashMap<String, ReportItem> = HashMap::with_capacity(expected);

        // The deadline restarts on every result: it bounds quiet time, not the cycle
        while received.len() < expected {
            match tokio::time::timeout(timeout, results_rx.recv()).await {
                Ok(Some(Ok(item))) => {
                    received.insert(item.namespace.name.clone(), item);
                }
                Ok(Some(Err(e))) => {
                    let _ = stop_tx.send(true);
                    return Err(e);
                }
                Ok(None) => {
                    bail!(
                        "collection workers exited after {} of {} namespaces",
                        received.len(),
                        expected
                    );
                }
                Err(_) => {
                    let _ = stop_tx.send(true);
                    warn!(
                        received = received.len(),
                        expected = expected,
                        timeout_secs = timeout.as_secs_f64(),
                        "Timed out waiting for namespace results"
                    );
                    bail!(
                        "timed out after {:?} waiting for namespace results ({} of {} received)",
                        timeout,
                        received.len(),
                        expected
                    );
                }
            }
        }

        Ok(namespaces
            .iter()
            .filter_map(|ns| received.remove(&ns.name))
            .collect())
    }
}

async fn run_worker(
    worker_id: usize,
    kube: Arc<dyn KubeApi>,
    queue: Arc<Mutex<mpsc::Receiver<Namespace>>>,
    results: mpsc::Sender<Result<ReportItem>>,
    stop: watch::Receiver<bool>,
    context: Arc<WorkerContext>,
) {
    loop {
        if *stop.borrow() {
            debug!(worker_id = worker_id, "Worker stopping on signal");
            return;
        }

        let next = queue.lock().await.recv().await;
        let Some(namespace) = next else {
            return;
        };

        let result = collect_namespace(kube.as_ref(), namespace, &context).await;
        let failed = result.is_err();
        if results.send(result).await.is_err() || failed {
            return;
        }
    }
}

async fn collect_namespace(
    kube: &dyn KubeApi,
    namespace: Namespace,
    context: &WorkerContext,
) -> Result<ReportItem> {
    let name = namespace.name.clone();
    let raw_pods = list_all(
        "pods",
        context.page_size,
        context.request_timeout,
        |opts| {
            let name = name.clone();
            async move { kube.list_pods(&name, &opts).await }
        },
    )
    .await
    .with_context(|| format!("failed to collect pods in namespace {name}"))?;

    let mut pods = Vec::with_capacity(raw_pods.len());
    let mut containers = Vec::new();
    for raw in &raw_pods {
        pods.push(pod_from(raw, &namespace.uid, &context.nodes, &context.metadata));

        let running = raw
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(|phase| phase == POD_PHASE_RUNNING)
            .unwrap_or(false);
        if context.ignore_not_running && !running {
            continue;
        }
        containers.extend(containers_from_pod(raw));
    }

    Ok(ReportItem {
        namespace,
        pods,
        containers,
    })
}

/// Builder for [`InventoryEngine`]
pub struct InventoryEngineBuilder {
    kube: Option<Arc<dyn KubeApi>>,
    config: CollectionConfig,
}

impl InventoryEngineBuilder {
    pub fn new() -> Self {
        Self {
            kube: None,
            config: CollectionConfig::default(),
        }
    }

    pub fn kube(mut self, kube: Arc<dyn KubeApi>) -> Self {
        self.kube = Some(kube);
        self
    }

    pub fn config(mut self, config: CollectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.config.cluster_name = name.into();
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.config.page_size = size;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn build(self) -> Result<InventoryEngine> {
        let kube = self
            .kube
            .ok_or_else(|| anyhow!("Kubernetes client is required"))?;
        if self.config.cluster_name.is_empty() {
            bail!("cluster name is required");
        }
        Ok(InventoryEngine::new(kube, self.config))
    }
}

impl Default for InventoryEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
