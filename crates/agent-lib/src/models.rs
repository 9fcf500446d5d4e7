//! Core data models for the inventory agent
//!
//! Everything in here is built once per inventory cycle and treated as
//! immutable after the cycle returns its [`Report`].

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inventory type tag expected by the management service
pub const INVENTORY_TYPE: &str = "kubernetes";

/// A cluster namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub uid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A cluster node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub uid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub container_runtime_version: String,
    #[serde(default)]
    pub kernel_version: String,
    #[serde(default)]
    pub kube_proxy_version: String,
    #[serde(default)]
    pub kubelet_version: String,
    #[serde(default)]
    pub operating_system: String,
}

/// A pod. `node_uid` is empty when the pod's node was not in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub uid: String,
    pub name: String,
    pub namespace_uid: String,
    #[serde(default)]
    pub node_uid: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A container merged from the pod spec (tag) and pod status (digest, id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub pod_uid: String,
    pub image_tag: String,
    #[serde(default)]
    pub image_digest: String,
}

/// Kubernetes API server build information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersionMetadata {
    pub major: String,
    pub minor: String,
    pub git_version: String,
    pub git_commit: String,
    pub git_tree_state: String,
    pub build_date: String,
    pub go_version: String,
    pub compiler: String,
    pub platform: String,
}

/// One inventory cycle's result, the unit of delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    #[serde(with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    pub cluster_name: String,
    #[serde(default = "default_inventory_type")]
    pub inventory_type: String,
    pub namespaces: Vec<Namespace>,
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub containers: Vec<Container>,
    pub server_version_metadata: ServerVersionMetadata,
}

fn default_inventory_type() -> String {
    INVENTORY_TYPE.to_string()
}

impl Report {
    /// Copy of this report restricted to the given namespaces.
    ///
    /// Pods are kept when their namespace is retained, containers when their
    /// pod is retained. Nodes are cluster-scoped and kept whole.
    pub fn scoped_to(&self, namespaces: &[Namespace]) -> Report {
        let namespace_uids: std::collections::HashSet<&str> =
            namespaces.iter().map(|ns| ns.uid.as_str()).collect();
        let pods: Vec<Pod> = self
            .pods
            .iter()
            .filter(|p| namespace_uids.contains(p.namespace_uid.as_str()))
            .cloned()
            .collect();
        let pod_uids: std::collections::HashSet<&str> =
            pods.iter().map(|p| p.uid.as_str()).collect();
        let containers = self
            .containers
            .iter()
            .filter(|c| pod_uids.contains(c.pod_uid.as_str()))
            .cloned()
            .collect();

        Report {
            timestamp: self.timestamp,
            cluster_name: self.cluster_name.clone(),
            inventory_type: self.inventory_type.clone(),
            namespaces: namespaces.to_vec(),
            nodes: self.nodes.clone(),
            pods,
            containers,
            server_version_metadata: self.server_version_metadata.clone(),
        }
    }
}

/// Output of one collection worker for one namespace
#[derive(Debug, Clone)]
pub struct ReportItem {
    pub namespace: Namespace,
    pub pods: Vec<Pod>,
    pub containers: Vec<Container>,
}

/// Current UTC time truncated to whole seconds so it survives the wire format
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// `2006-01-02T15:04:05Z` timestamps
pub mod rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Durations as a JSON number of seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
