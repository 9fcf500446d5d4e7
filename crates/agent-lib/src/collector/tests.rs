//! Integration tests for the inventory engine
//!
//! These run full cycles against an in-memory cluster to check fan-out,
//! aggregation, filtering and failure semantics.

use super::*;
use crate::testing::{k8s_pod, FakeCluster};
use std::time::Duration;

fn config(cluster: &str) -> CollectionConfig {
    CollectionConfig {
        cluster_name: cluster.to_string(),
        page_size: 100,
        request_timeout: Duration::from_secs(5),
        worker_count: 4,
        ..Default::default()
    }
}

fn namespace_names(report: &crate::models::Report) -> Vec<&str> {
    report.namespaces.iter().map(|n| n.name.as_str()).collect()
}

#[tokio::test]
async fn test_cycle_drops_empty_namespace_and_unknown_node() {
    let kube = FakeCluster::new()
        .node("worker-1")
        .namespace("ns1")
        .namespace("ns2")
        .namespace("ns3")
        .pod("ns1", "web-0", "worker-1", &[("web", "nginx:1.25"), ("log", "fluentbit:2.1")])
        .pod("ns1", "web-1", "worker-1", &[("web", "nginx:1.25")])
        .pod("ns3", "batch-0", "worker-gone", &[("job", "busybox")])
        .build();

    let mut cfg = config("test-cluster");
    cfg.ignore_empty = true;
    let engine = InventoryEngine::new(kube, cfg);

    let report = engine.collect().await.unwrap();

    assert_eq!(namespace_names(&report), vec!["ns1", "ns3"]);
    assert_eq!(report.pods.len(), 3);
    assert_eq!(report.containers.len(), 4);
    assert_eq!(report.nodes.len(), 1);
    assert_eq!(report.cluster_name, "test-cluster");
    assert_eq!(report.server_version_metadata.git_version, "v1.28.2");

    let orphan = report.pods.iter().find(|p| p.name == "batch-0").unwrap();
    assert_eq!(orphan.node_uid, "");
    assert_eq!(orphan.namespace_uid, "uid-ns3");

    let scheduled = report.pods.iter().find(|p| p.name == "web-0").unwrap();
    assert_eq!(scheduled.node_uid, "uid-worker-1");

    for container in &report.containers {
        assert!(!container.image_tag.is_empty());
        assert!(!container.image_digest.is_empty());
    }
}

#[tokio::test]
async fn test_empty_namespace_kept_without_ignore_empty() {
    let kube = FakeCluster::new()
        .namespace("ns1")
        .namespace("empty")
        .pod("ns1", "p", "n", &[("c", "alpine")])
        .build();

    let report = InventoryEngine::new(kube, config("c")).collect().await.unwrap();
    assert_eq!(namespace_names(&report), vec!["ns1", "empty"]);
}

#[tokio::test]
async fn test_each_namespace_processed_once() {
    let mut cluster = FakeCluster::new().node("n");
    for i in 0..25 {
        let ns = format!("ns-{i}");
        cluster = cluster.namespace(&ns).pod(&ns, &format!("pod-{i}"), "n", &[("c", "alpine")]);
    }
    let kube = cluster.build();

    let mut cfg = config("c");
    cfg.worker_count = 8;
    let report = InventoryEngine::new(kube.clone(), cfg).collect().await.unwrap();

    assert_eq!(report.namespaces.len(), 25);
    for i in 0..25 {
        assert_eq!(kube.pod_list_calls(&format!("ns-{i}")), 1);
    }
    // Output order follows the namespace listing, not completion order
    assert_eq!(report.namespaces[0].name, "ns-0");
    assert_eq!(report.namespaces[24].name, "ns-24");
}

#[tokio::test]
async fn test_small_pages_collect_everything() {
    let kube = FakeCluster::new()
        .node("a")
        .node("b")
        .node("c")
        .namespace("ns1")
        .namespace("ns2")
        .pod("ns1", "p1", "a", &[("c", "alpine")])
        .pod("ns1", "p2", "b", &[("c", "alpine")])
        .pod("ns1", "p3", "c", &[("c", "alpine")])
        .build();

    let mut cfg = config("c");
    cfg.page_size = 1;
    let report = InventoryEngine::new(kube.clone(), cfg).collect().await.unwrap();

    assert_eq!(report.nodes.len(), 3);
    assert_eq!(report.pods.len(), 3);
    // One call per single-pod page
    assert_eq!(kube.pod_list_calls("ns1"), 3);
}

#[tokio::test]
async fn test_worker_error_aborts_cycle() {
    let kube = FakeCluster::new()
        .namespace("bad")
        .namespace("good-1")
        .namespace("good-2")
        .pod("good-1", "p", "n", &[("c", "alpine")])
        .failing_namespace("bad")
        .build();

    let mut cfg = config("c");
    cfg.worker_count = 1;
    let err = InventoryEngine::new(kube.clone(), cfg)
        .collect()
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("forbidden"));
    // The single worker exits after the failure, so nothing else is fetched
    assert_eq!(kube.pod_list_calls("good-1"), 0);
    assert_eq!(kube.pod_list_calls("good-2"), 0);
}

#[tokio::test]
async fn test_stalled_namespace_times_out() {
    let kube = FakeCluster::new()
        .namespace("fast")
        .namespace("stuck")
        .namespace_delay("stuck", Duration::from_secs(2))
        .build();

    let mut cfg = config("c");
    cfg.request_timeout = Duration::from_millis(100);
    let err = InventoryEngine::new(kube, cfg).collect().await.unwrap_err();
    assert!(format!("{err:#}").contains("timed out"));
}

/// The aggregation deadline restarts on every result, so a steady trickle of
/// results may run well past the configured timeout in total.
#[tokio::test]
async fn test_timeout_bounds_quiet_time_not_total_time() {
    let mut cluster = FakeCluster::new().pod_list_delay(Duration::from_millis(60));
    for i in 0..5 {
        cluster = cluster.namespace(&format!("ns-{i}"));
    }
    let kube = cluster.build();

    let mut cfg = config("c");
    cfg.worker_count = 1;
    cfg.request_timeout = Duration::from_millis(150);

    let started = tokio::time::Instant::now();
    let report = InventoryEngine::new(kube, cfg).collect().await.unwrap();

    assert_eq!(report.namespaces.len(), 5);
    assert!(started.elapsed() > Duration::from_millis(150));
}

#[tokio::test]
async fn test_include_and_exclude_selection() {
    let kube = FakeCluster::new()
        .namespace("default")
        .namespace("kube-system")
        .namespace("payments")
        .build();

    let mut cfg = config("c");
    cfg.exclude_namespaces = vec!["^kube-".to_string(), "default".to_string()];
    let report = InventoryEngine::new(kube.clone(), cfg.clone())
        .collect()
        .await
        .unwrap();
    assert_eq!(namespace_names(&report), vec!["payments"]);
    assert_eq!(kube.pod_list_calls("kube-system"), 0);

    cfg.include_namespaces = vec!["kube-system".to_string()];
    let report = InventoryEngine::new(kube, cfg).collect().await.unwrap();
    assert_eq!(namespace_names(&report), vec!["kube-system"]);
}

#[tokio::test]
async fn test_ignore_not_running_skips_containers() {
    let mut pending = k8s_pod("pending-0", "n", &[("c", "alpine")]);
    pending.status.as_mut().unwrap().phase = Some("Pending".to_string());

    let kube = FakeCluster::new()
        .namespace("ns")
        .pod("ns", "running-0", "n", &[("c", "alpine")])
        .raw_pod("ns", pending)
        .build();

    let mut cfg = config("c");
    cfg.ignore_not_running = true;
    let report = InventoryEngine::new(kube, cfg).collect().await.unwrap();

    assert_eq!(report.pods.len(), 2);
    assert_eq!(report.containers.len(), 1);
    assert_eq!(report.containers[0].pod_uid, "uid-running-0");
}

#[tokio::test]
async fn test_no_namespaces_yields_empty_report() {
    let kube = FakeCluster::new().node("n").build();
    let report = InventoryEngine::new(kube, config("c")).collect().await.unwrap();
    assert!(report.namespaces.is_empty());
    assert_eq!(report.nodes.len(), 1);
}

#[test]
fn test_builder_requires_kube_and_cluster_name() {
    assert!(InventoryEngineBuilder::new().cluster_name("c").build().is_err());

    let kube = FakeCluster::new().build();
    assert!(InventoryEngineBuilder::new().kube(kube.clone()).build().is_err());

    let engine = InventoryEngineBuilder::new()
        .kube(kube)
        .cluster_name("c")
        .worker_count(3)
        .page_size(50)
        .request_timeout(Duration::from_secs(9))
        .build()
        .unwrap();
    assert_eq!(engine.config().worker_count, 3);
    assert_eq!(engine.config().page_size, 50);
}
