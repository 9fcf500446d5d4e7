//! Agent configuration
//!
//! Layered from an optional config file and `INVENTORY_`-prefixed
//! environment variables, with `__` separating nested keys
//! (e.g. `INVENTORY_ANCHORE__URL`).

use agent_lib::collector::{CollectionConfig, MetadataConfig};
use agent_lib::delivery::DeliveryConfig;
use agent_lib::health::HealthReporterConfig;
use agent_lib::registration::{RegistrationConfig, MIN_SERVICE_VERSION};
use agent_lib::remote::{Credentials, RemoteConfig};
use agent_lib::routing::{AccountRoute, LabelRouting};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "INVENTORY";

/// Agent configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Name stamped on every report
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    #[serde(default)]
    pub kubernetes: KubernetesConfig,

    #[serde(default)]
    pub namespace_selectors: NamespaceSelectors,

    /// Account name to namespace patterns
    #[serde(default)]
    pub account_routes: BTreeMap<String, AccountRouteConfig>,

    #[serde(default)]
    pub account_route_by_namespace_label: LabelRouteConfig,

    #[serde(default)]
    pub metadata: MetadataSettings,

    /// Skip containers of pods that are not running
    #[serde(default)]
    pub ignore_not_running: bool,

    #[serde(default)]
    pub anchore: AnchoreConfig,

    #[serde(default)]
    pub registration: RegistrationSettings,

    #[serde(default = "default_health_report_interval")]
    pub health_report_interval_seconds: u64,

    #[serde(default = "default_polling_interval")]
    pub polling_interval_seconds: u64,

    #[serde(default)]
    pub inventory_report_limits: ReportLimits,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Pod identity from the Kubernetes downward API
    #[serde(default = "default_pod_name")]
    pub pod_name: Option<String>,

    #[serde(default = "default_pod_namespace")]
    pub pod_namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KubernetesConfig {
    pub request_timeout_seconds: u64,
    /// Items per list page
    pub request_batch_size: u32,
    pub worker_pool_size: usize,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 60,
            request_batch_size: 100,
            worker_pool_size: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NamespaceSelectors {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub ignore_empty: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AccountRouteConfig {
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LabelRouteConfig {
    /// Namespace label naming the account; disabled when empty
    pub label_key: String,
    pub ignore_missing_label: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataSettings {
    pub include_annotations: Vec<String>,
    pub include_labels: Vec<String>,
    pub disable: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnchoreConfig {
    /// Management service URL; empty runs without delivery
    pub url: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub account: String,
    pub http: HttpConfig,
}

impl Default for AnchoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: String::new(),
            password: String::new(),
            account: "admin".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub insecure: bool,
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            insecure: false,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrationSettings {
    /// Fixed registration ID instead of the owning Deployment's UID
    pub registration_id: Option<String>,
    pub name: String,
    pub description: String,
    pub initial_backoff_seconds: u64,
    pub max_backoff_seconds: u64,
    /// Negative retries forever
    pub max_retries: i32,
    pub min_service_version: String,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            registration_id: None,
            name: "inventory-agent".to_string(),
            description: String::new(),
            initial_backoff_seconds: 2,
            max_backoff_seconds: 60,
            max_retries: -1,
            min_service_version: MIN_SERVICE_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportLimits {
    /// Namespaces per report batch; 0 sends one report
    pub namespaces: usize,
}

fn default_cluster_name() -> String {
    std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "default-cluster".to_string())
}

fn default_health_report_interval() -> u64 {
    60
}

fn default_polling_interval() -> u64 {
    300
}

fn default_api_port() -> u16 {
    8080
}

fn default_pod_name() -> Option<String> {
    std::env::var("POD_NAME").ok().filter(|v| !v.is_empty())
}

fn default_pod_namespace() -> Option<String> {
    std::env::var("POD_NAMESPACE").ok().filter(|v| !v.is_empty())
}

impl AgentConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?;

        config
            .try_deserialize()
            .context("invalid configuration")
    }

    pub fn remote_enabled(&self) -> bool {
        !self.anchore.url.trim().is_empty()
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_seconds.max(1))
    }

    pub fn collection_config(&self) -> CollectionConfig {
        CollectionConfig {
            cluster_name: self.cluster_name.clone(),
            page_size: self.kubernetes.request_batch_size,
            request_timeout: Duration::from_secs(self.kubernetes.request_timeout_seconds),
            worker_count: self.kubernetes.worker_pool_size,
            include_namespaces: self.namespace_selectors.include.clone(),
            exclude_namespaces: self.namespace_selectors.exclude.clone(),
            ignore_empty: self.namespace_selectors.ignore_empty,
            ignore_not_running: self.ignore_not_running,
            metadata: MetadataConfig {
                include_annotations: self.metadata.include_annotations.clone(),
                include_labels: self.metadata.include_labels.clone(),
                disabled: self.metadata.disable,
            },
        }
    }

    pub fn default_credentials(&self) -> Credentials {
        Credentials {
            user: self.anchore.user.clone(),
            password: self.anchore.password.clone(),
            account: self.anchore.account.clone(),
        }
    }

    /// Client settings, or `None` when no service URL is configured
    pub fn remote_config(&self) -> Option<RemoteConfig> {
        self.remote_enabled().then(|| RemoteConfig {
            url: self.anchore.url.clone(),
            credentials: self.default_credentials(),
            insecure_skip_verify: self.anchore.http.insecure,
            timeout: Duration::from_secs(self.anchore.http.timeout_seconds),
        })
    }

    pub fn account_routes(&self) -> Vec<AccountRoute> {
        self.account_routes
            .iter()
            .map(|(account, route)| {
                let base = AccountRoute::new(account.clone(), &route.namespaces);
                match (&route.user, &route.password) {
                    (Some(user), Some(password)) => base.with_credentials(user, password),
                    _ => base,
                }
            })
            .collect()
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        let label = &self.account_route_by_namespace_label;
        DeliveryConfig {
            default_credentials: self.default_credentials(),
            routes: self.account_routes(),
            label_routing: (!label.label_key.is_empty()).then(|| LabelRouting {
                label_key: label.label_key.clone(),
                ignore_missing_label: label.ignore_missing_label,
            }),
            batch_size: self.inventory_report_limits.namespaces,
        }
    }

    pub fn registration_config(&self) -> RegistrationConfig {
        let settings = &self.registration;
        RegistrationConfig {
            initial_backoff: Duration::from_secs(settings.initial_backoff_seconds),
            max_backoff: Duration::from_secs(settings.max_backoff_seconds),
            max_retries: settings.max_retries,
            min_service_version: settings.min_service_version.clone(),
            registration_id: settings.registration_id.clone(),
            name: settings.name.clone(),
            description: settings.description.clone(),
            cluster_name: self.cluster_name.clone(),
            account_name: self.anchore.account.clone(),
            username: self.anchore.user.clone(),
            explicitly_account_bound: self.account_routes.keys().cloned().collect(),
            namespaces: self.namespace_selectors.include.clone(),
            health_report_interval: Duration::from_secs(self.health_report_interval_seconds),
            pod_name: self.pod_name.clone(),
            pod_namespace: self.pod_namespace.clone(),
            // Secrets are skipped when serializing
            configuration: serde_json::to_value(self).ok(),
            ..Default::default()
        }
    }

    pub fn health_config(&self) -> HealthReporterConfig {
        HealthReporterConfig {
            polling_interval: self.polling_interval(),
            default_interval: Duration::from_secs(self.health_report_interval_seconds.max(1)),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = AgentConfig::load(None).unwrap();

        assert_eq!(config.kubernetes.request_batch_size, 100);
        assert_eq!(config.kubernetes.worker_pool_size, 100);
        assert_eq!(config.polling_interval_seconds, 300);
        assert_eq!(config.anchore.account, "admin");
        assert_eq!(config.registration.max_retries, -1);
        assert!(!config.remote_enabled());
        assert!(config.remote_config().is_none());
    }

    #[test]
    fn test_load_yaml_file() {
        let file = write_config(
            r#"
cluster_name: prod-east
kubernetes:
  request_timeout_seconds: 30
  worker_pool_size: 8
namespace_selectors:
  exclude: ["^kube-", "default"]
  ignore_empty: true
account_routes:
  team-a:
    user: team
    password: secret
    namespaces: ["payments", "billing-.*"]
anchore:
  url: https://anchore.example.com
  user: admin
  password: foobar
  http:
    insecure: true
inventory_report_limits:
  namespaces: 25
"#,
        );

        let config = AgentConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.cluster_name, "prod-east");

        let collection = config.collection_config();
        assert_eq!(collection.request_timeout, Duration::from_secs(30));
        assert_eq!(collection.worker_count, 8);
        assert_eq!(collection.page_size, 100);
        assert!(collection.ignore_empty);
        assert_eq!(collection.exclude_namespaces.len(), 2);

        let remote = config.remote_config().unwrap();
        assert!(remote.insecure_skip_verify);
        assert_eq!(remote.timeout, Duration::from_secs(10));

        let delivery = config.delivery_config();
        assert_eq!(delivery.batch_size, 25);
        assert_eq!(delivery.routes.len(), 1);
        assert!(delivery.routes[0].matches("billing-eu"));
        assert!(delivery.label_routing.is_none());
        assert_eq!(
            delivery.routes[0].credentials(&config.default_credentials()).user,
            "team"
        );
    }

    #[test]
    fn test_registration_config_redacts_secrets() {
        let file = write_config(
            r#"
cluster_name: c
account_routes:
  team-a:
    password: hidden
    namespaces: ["payments"]
anchore:
  url: http://anchore:8228
  user: admin
  password: foobar
"#,
        );

        let config = AgentConfig::load(Some(file.path())).unwrap();
        let registration = config.registration_config();
        assert_eq!(registration.explicitly_account_bound, vec!["team-a".to_string()]);

        let snapshot = registration.configuration.unwrap().to_string();
        assert!(!snapshot.contains("foobar"));
        assert!(!snapshot.contains("hidden"));
        assert!(snapshot.contains("http://anchore:8228"));
    }

    #[test]
    fn test_label_routing_enabled_by_key() {
        let file = write_config(
            r#"
account_route_by_namespace_label:
  label_key: anchore.io/account.name
  ignore_missing_label: true
"#,
        );

        let config = AgentConfig::load(Some(file.path())).unwrap();
        let routing = config.delivery_config().label_routing.unwrap();
        assert_eq!(routing.label_key, "anchore.io/account.name");
        assert!(routing.ignore_missing_label);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AgentConfig::load(Some(Path::new("/nonexistent/inventory.yaml")));
        assert!(result.is_err());
    }
}
