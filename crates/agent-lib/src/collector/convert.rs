//! Conversions from Kubernetes API objects to report models

use crate::models::{Container, Namespace, Node, Pod, ServerVersionMetadata};
use k8s_openapi::api::core::v1 as core;
use k8s_openapi::apimachinery::pkg::version::Info;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

const DEFAULT_TAG: &str = "latest";

/// Pod label/annotation selection
#[derive(Debug, Clone, Default)]
pub struct MetadataConfig {
    /// Regexes selecting annotation keys to keep (empty = keep all)
    pub include_annotations: Vec<String>,
    /// Regexes selecting label keys to keep (empty = keep all)
    pub include_labels: Vec<String>,
    /// Omit pod labels and annotations entirely
    pub disabled: bool,
}

/// Compiled form of [`MetadataConfig`]
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    annotations: Vec<Regex>,
    labels: Vec<Regex>,
    disabled: bool,
}

impl MetadataFilter {
    pub fn new(config: &MetadataConfig) -> Self {
        Self {
            annotations: compile_all(&config.include_annotations),
            labels: compile_all(&config.include_labels),
            disabled: config.disabled,
        }
    }

    pub fn annotations(&self, source: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
        self.select(source, &self.annotations)
    }

    pub fn labels(&self, source: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
        self.select(source, &self.labels)
    }

    fn select(
        &self,
        source: Option<&BTreeMap<String, String>>,
        patterns: &[Regex],
    ) -> BTreeMap<String, String> {
        let Some(source) = source else {
            return BTreeMap::new();
        };
        if self.disabled {
            return BTreeMap::new();
        }
        if patterns.is_empty() {
            return source.clone();
        }
        source
            .iter()
            .filter(|(key, _)| patterns.iter().any(|re| re.is_match(key)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn compile_all(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Ignoring invalid metadata pattern");
                None
            }
        })
        .collect()
}

pub fn namespace_from(namespace: &core::Namespace) -> Namespace {
    let meta = &namespace.metadata;
    Namespace {
        uid: meta.uid.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
    }
}

pub fn node_from(node: &core::Node) -> Node {
    let meta = &node.metadata;
    let info = node
        .status
        .as_ref()
        .and_then(|s| s.node_info.clone())
        .unwrap_or_default();

    Node {
        uid: meta.uid.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        arch: info.architecture,
        container_runtime_version: info.container_runtime_version,
        kernel_version: info.kernel_version,
        kube_proxy_version: info.kube_proxy_version,
        kubelet_version: info.kubelet_version,
        operating_system: info.operating_system,
    }
}

/// Build a pod record, resolving its node UID from the cycle's node lookup.
///
/// Pods scheduled on a node missing from the lookup get an empty node UID.
pub fn pod_from(
    pod: &core::Pod,
    namespace_uid: &str,
    nodes: &HashMap<String, Node>,
    metadata: &MetadataFilter,
) -> Pod {
    let meta = &pod.metadata;
    let node_uid = pod
        .spec
        .as_ref()
        .and_then(|s| s.node_name.as_ref())
        .and_then(|name| nodes.get(name))
        .map(|node| node.uid.clone())
        .unwrap_or_default();

    Pod {
        uid: meta.uid.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        namespace_uid: namespace_uid.to_string(),
        node_uid,
        annotations: metadata.annotations(meta.annotations.as_ref()),
        labels: metadata.labels(meta.labels.as_ref()),
    }
}

/// Extract containers from a pod, merging spec and status by container name.
///
/// The tag comes from the spec, the digest and runtime ID from the status.
/// Init containers are processed before regular ones in both passes. A status
/// entry without a spec counterpart is reported from the status image alone.
pub fn containers_from_pod(pod: &core::Pod) -> Vec<Container> {
    let pod_uid = pod.metadata.uid.clone().unwrap_or_default();
    let mut order: Vec<String> = Vec::new();
    let mut by_name: HashMap<String, Container> = HashMap::new();

    if let Some(spec) = &pod.spec {
        let spec_containers = spec.init_containers.iter().flatten().chain(spec.containers.iter());
        for c in spec_containers {
            let (image_tag, image_digest) = normalize_image(c.image.as_deref().unwrap_or_default());
            if by_name.contains_key(&c.name) {
                continue;
            }
            order.push(c.name.clone());
            by_name.insert(
                c.name.clone(),
                Container {
                    id: String::new(),
                    name: c.name.clone(),
                    pod_uid: pod_uid.clone(),
                    image_tag,
                    image_digest,
                },
            );
        }
    }

    if let Some(status) = &pod.status {
        let statuses = status
            .init_container_statuses
            .iter()
            .flatten()
            .chain(status.container_statuses.iter().flatten());
        for s in statuses {
            let digest = digest_from_image_id(&s.image_id);
            match by_name.get_mut(&s.name) {
                Some(existing) => {
                    existing.id = s.container_id.clone().unwrap_or_default();
                    if !digest.is_empty() {
                        existing.image_digest = digest;
                    }
                }
                None => {
                    let (image_tag, image_digest) = normalize_image(&s.image);
                    order.push(s.name.clone());
                    by_name.insert(
                        s.name.clone(),
                        Container {
                            id: s.container_id.clone().unwrap_or_default(),
                            name: s.name.clone(),
                            pod_uid: pod_uid.clone(),
                            image_tag,
                            image_digest: if digest.is_empty() { image_digest } else { digest },
                        },
                    );
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect()
}

/// Split an image reference into a tagged reference and an optional digest.
///
/// `nginx` becomes `nginx:latest`; `repo/app:1.2@sha256:..` keeps its tag and
/// yields the digest separately. A registry port is not mistaken for a tag.
pub fn normalize_image(image: &str) -> (String, String) {
    let image = image.trim();
    if image.is_empty() {
        return (String::new(), String::new());
    }

    let (name, digest) = match image.split_once('@') {
        Some((name, digest)) => (name, digest.to_string()),
        None => (image, String::new()),
    };

    let last_segment = name.rsplit('/').next().unwrap_or(name);
    let tag = if last_segment.contains(':') {
        name.to_string()
    } else {
        format!("{name}:{DEFAULT_TAG}")
    };

    (tag, digest)
}

/// Digest portion of a status `imageID` (e.g. `docker-pullable://nginx@sha256:..`)
pub fn digest_from_image_id(image_id: &str) -> String {
    if let Some(idx) = image_id.find("sha256:") {
        return image_id[idx..].to_string();
    }
    image_id
        .split_once('@')
        .map(|(_, digest)| digest.to_string())
        .unwrap_or_default()
}

pub fn server_version_from(info: Info) -> ServerVersionMetadata {
    ServerVersionMetadata {
        major: info.major,
        minor: info.minor,
        git_version: info.git_version,
        git_commit: info.git_commit,
        git_tree_state: info.git_tree_state,
        build_date: info.build_date,
        go_version: info.go_version,
        compiler: info.compiler,
        platform: info.platform,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn spec_container(name: &str, image: &str) -> core::Container {
        core::Container {
            name: name.to_string(),
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    fn status(name: &str, image: &str, image_id: &str, id: &str) -> core::ContainerStatus {
        core::ContainerStatus {
            name: name.to_string(),
            image: image.to_string(),
            image_id: image_id.to_string(),
            container_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    fn pod(spec: Option<core::PodSpec>, status: Option<core::PodStatus>) -> core::Pod {
        core::Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                uid: Some("pod-uid".to_string()),
                ..Default::default()
            },
            spec,
            status,
        }
    }

    #[test]
    fn test_normalize_image() {
        assert_eq!(normalize_image("nginx"), ("nginx:latest".to_string(), String::new()));
        assert_eq!(
            normalize_image("registry:5000/team/app"),
            ("registry:5000/team/app:latest".to_string(), String::new())
        );
        assert_eq!(
            normalize_image("registry:5000/team/app:1.2"),
            ("registry:5000/team/app:1.2".to_string(), String::new())
        );
        assert_eq!(
            normalize_image("app:1.2@sha256:abc"),
            ("app:1.2".to_string(), "sha256:abc".to_string())
        );
    }

    #[test]
    fn test_digest_from_image_id() {
        assert_eq!(
            digest_from_image_id("docker-pullable://nginx@sha256:0123"),
            "sha256:0123"
        );
        assert_eq!(digest_from_image_id("sha256:0123"), "sha256:0123");
        assert_eq!(digest_from_image_id(""), "");
    }

    #[test]
    fn test_spec_and_status_are_merged_by_name() {
        let p = pod(
            Some(core::PodSpec {
                init_containers: Some(vec![spec_container("init", "busybox:1.36")]),
                containers: vec![spec_container("app", "registry.local/app:2.0")],
                ..Default::default()
            }),
            Some(core::PodStatus {
                init_container_statuses: Some(vec![status(
                    "init",
                    "docker.io/library/busybox:1.36",
                    "docker.io/library/busybox@sha256:aaa",
                    "containerd://init-id",
                )]),
                container_statuses: Some(vec![status(
                    "app",
                    "registry.local/app@sha256:bbb",
                    "registry.local/app@sha256:bbb",
                    "containerd://app-id",
                )]),
                ..Default::default()
            }),
        );

        let containers = containers_from_pod(&p);
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "init");
        assert_eq!(containers[1].name, "app");

        for c in &containers {
            assert!(!c.image_tag.is_empty());
            assert!(!c.image_digest.is_empty());
            assert_eq!(c.pod_uid, "pod-uid");
        }
        // Spec tag wins over the status image
        assert_eq!(containers[1].image_tag, "registry.local/app:2.0");
        assert_eq!(containers[1].image_digest, "sha256:bbb");
        assert_eq!(containers[1].id, "containerd://app-id");
    }

    #[test]
    fn test_status_only_container_uses_status_image() {
        let p = pod(
            None,
            Some(core::PodStatus {
                container_statuses: Some(vec![status(
                    "sidecar",
                    "envoyproxy/envoy:v1.29",
                    "envoyproxy/envoy@sha256:ccc",
                    "containerd://side",
                )]),
                ..Default::default()
            }),
        );

        let containers = containers_from_pod(&p);
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].image_tag, "envoyproxy/envoy:v1.29");
        assert_eq!(containers[0].image_digest, "sha256:ccc");
    }

    #[test]
    fn test_spec_only_container_has_no_digest() {
        let p = pod(
            Some(core::PodSpec {
                containers: vec![spec_container("pending", "redis")],
                ..Default::default()
            }),
            None,
        );
        let containers = containers_from_pod(&p);
        assert_eq!(containers[0].image_tag, "redis:latest");
        assert!(containers[0].image_digest.is_empty());
        assert!(containers[0].id.is_empty());
    }

    #[test]
    fn test_pod_node_resolution() {
        let mut p = pod(
            Some(core::PodSpec {
                node_name: Some("worker-1".to_string()),
                ..Default::default()
            }),
            None,
        );
        let nodes = HashMap::from([(
            "worker-1".to_string(),
            node_from(&core::Node {
                metadata: ObjectMeta {
                    name: Some("worker-1".to_string()),
                    uid: Some("node-uid".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }),
        )]);

        let filter = MetadataFilter::default();
        assert_eq!(pod_from(&p, "ns-uid", &nodes, &filter).node_uid, "node-uid");

        p.spec.as_mut().unwrap().node_name = Some("gone".to_string());
        assert_eq!(pod_from(&p, "ns-uid", &nodes, &filter).node_uid, "");
    }

    #[test]
    fn test_metadata_filter() {
        let source = BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), "web".to_string()),
            ("team".to_string(), "payments".to_string()),
        ]);

        let keep_all = MetadataFilter::new(&MetadataConfig::default());
        assert_eq!(keep_all.labels(Some(&source)).len(), 2);

        let selective = MetadataFilter::new(&MetadataConfig {
            include_labels: vec!["^app\\.kubernetes\\.io/".to_string()],
            ..Default::default()
        });
        let labels = selective.labels(Some(&source));
        assert_eq!(labels.len(), 1);
        assert!(labels.contains_key("app.kubernetes.io/name"));
        // Annotations have no patterns, so everything is kept
        assert_eq!(selective.annotations(Some(&source)).len(), 2);

        let disabled = MetadataFilter::new(&MetadataConfig {
            disabled: true,
            ..Default::default()
        });
        assert!(disabled.labels(Some(&source)).is_empty());
        assert!(disabled.annotations(None).is_empty());
    }
}
