use super::backoff::{attempts_remaining, Backoff};
use super::lifecycle::LifecycleSignals;
use super::version::{ServiceVersion, VersionResponse};
use super::{Integration, Registration, RegistrationError, AGENT_TYPE, MIN_SERVICE_VERSION};
use crate::collector::KubeApi;
use crate::models::now_utc;
use crate::remote::{
    incorrect_credentials, server_is_offline, server_lacks_agent_health_api_support,
    user_lacks_api_privileges, RemoteClient, RemoteError, REGISTRATION_PATH, VERSION_PATH,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Registration settings
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Negative retries forever
    pub max_retries: i32,
    pub min_service_version: String,
    /// Fixed registration ID; derived from the owning Deployment when unset
    pub registration_id: Option<String>,
    pub name: String,
    pub description: String,
    pub agent_version: String,
    pub cluster_name: String,
    pub account_name: String,
    pub username: String,
    pub explicitly_account_bound: Vec<String>,
    pub namespaces: Vec<String>,
    pub health_report_interval: Duration,
    pub pod_name: Option<String>,
    pub pod_namespace: Option<String>,
    pub configuration: Option<serde_json::Value>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            max_retries: -1,
            min_service_version: MIN_SERVICE_VERSION.to_string(),
            registration_id: None,
            name: "inventory-agent".to_string(),
            description: String::new(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            cluster_name: String::new(),
            account_name: String::new(),
            username: String::new(),
            explicitly_account_bound: Vec::new(),
            namespaces: Vec::new(),
            health_report_interval: Duration::from_secs(60),
            pod_name: None,
            pod_namespace: None,
            configuration: None,
        }
    }
}

/// Drives the registration handshake
pub struct Registrar {
    client: RemoteClient,
    kube: Option<Arc<dyn KubeApi>>,
    config: RegistrationConfig,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Registrar {
    pub fn new(client: RemoteClient, config: RegistrationConfig) -> Self {
        Self {
            client,
            kube: None,
            config,
            started_at: now_utc(),
            started: Instant::now(),
        }
    }

    /// Resolve the registration ID from the agent's own Deployment
    pub fn with_kube(mut self, kube: Arc<dyn KubeApi>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Run the full handshake and publish the outcome.
    ///
    /// Every lifecycle signal is fired or closed before this returns.
    pub async fn run(self, mut signals: LifecycleSignals) -> Result<Integration, RegistrationError> {
        let result = self.negotiate(&mut signals).await;

        match &result {
            Ok(integration) => {
                info!(
                    integration_id = %integration.uuid,
                    registration_id = %integration.registration_id,
                    "Agent registered"
                );
                signals.publish_integration(integration.clone());
                signals.enable_health_reporting();
                if signals.enable_inventory_reporting() {
                    debug!("Inventory reporting enabled after registration");
                }
            }
            Err(e) => error!(error = %e, "Agent registration failed"),
        }

        signals.close();
        result
    }

    async fn negotiate(&self, signals: &mut LifecycleSignals) -> Result<Integration, RegistrationError> {
        self.await_compatible_version(signals).await?;
        let registration = self.build_registration().await;
        self.register(&registration).await
    }

    /// Poll the service version until it meets the minimum.
    ///
    /// A service that is reachable but too old enables inventory-only
    /// reporting once and keeps being polled.
    pub async fn await_compatible_version(
        &self,
        signals: &mut LifecycleSignals,
    ) -> Result<ServiceVersion, RegistrationError> {
        let minimum = ServiceVersion::parse(&self.config.min_service_version)
            .ok_or_else(|| RegistrationError::Malformed(self.config.min_service_version.clone()))?;
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let last = match self.client.get_json::<VersionResponse>(VERSION_PATH).await {
                Ok(response) => {
                    let raw = response.service.version;
                    let version = ServiceVersion::parse(&raw)
                        .ok_or_else(|| RegistrationError::Malformed(raw.clone()))?;
                    if version >= minimum {
                        info!(version = %version, "Management service version is compatible");
                        return Ok(version);
                    }

                    warn!(
                        version = %version,
                        required = %minimum,
                        "Management service too old for registration"
                    );
                    if signals.enable_inventory_reporting() {
                        info!("Enabling inventory reporting without registration");
                    }
                    format!("service version {version} is below {minimum}")
                }
                Err(e) if server_is_offline(&e) => {
                    warn!(error = %e, attempt = attempts, "Management service offline");
                    e.to_string()
                }
                Err(e) => return Err(e.into()),
            };

            if !attempts_remaining(self.config.max_retries, attempts) {
                return Err(RegistrationError::MaxRetriesExceeded { attempts, last });
            }
            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis(), "Retrying version check");
            tokio::time::sleep(delay).await;
        }
    }

    /// POST the registration, retrying only while the service is offline
    pub async fn register(&self, registration: &Registration) -> Result<Integration, RegistrationError> {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let err = match self
                .client
                .post_json::<_, Integration>(registration, REGISTRATION_PATH, "")
                .await
            {
                Ok(integration) => return Ok(integration),
                Err(e) => e,
            };

            let last = classify_register_error(err)?;
            warn!(error = %last, attempt = attempts, "Management service offline during registration");

            if !attempts_remaining(self.config.max_retries, attempts) {
                return Err(RegistrationError::MaxRetriesExceeded { attempts, last });
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }

    /// Build the registration request from config and deployment metadata
    pub async fn build_registration(&self) -> Registration {
        let instance_id = self
            .config
            .pod_name
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let registration_id = match &self.config.registration_id {
            Some(id) => id.clone(),
            None => self.deployment_uid_or_random().await,
        };

        Registration {
            registration_id,
            registration_instance_id: instance_id,
            kind: AGENT_TYPE.to_string(),
            name: self.config.name.clone(),
            description: self.config.description.clone(),
            version: self.config.agent_version.clone(),
            started_at: self.started_at,
            uptime: self.started.elapsed(),
            username: self.config.username.clone(),
            account_name: self.config.account_name.clone(),
            explicitly_account_bound: self.config.explicitly_account_bound.clone(),
            namespaces: self.config.namespaces.clone(),
            cluster_name: self.config.cluster_name.clone(),
            namespace: self.config.pod_namespace.clone().unwrap_or_default(),
            health_report_interval: self.config.health_report_interval.as_secs(),
            configuration: self.config.configuration.clone(),
        }
    }

    async fn deployment_uid_or_random(&self) -> String {
        match self.deployment_uid().await {
            Ok(Some(uid)) => uid,
            Ok(None) => {
                debug!("No owning Deployment found, using a random registration ID");
                Uuid::new_v4().to_string()
            }
            Err(e) => {
                warn!(error = %e, "Failed to resolve owning Deployment, using a random registration ID");
                Uuid::new_v4().to_string()
            }
        }
    }

    /// Walk Pod -> ReplicaSet -> Deployment owner references
    async fn deployment_uid(&self) -> Result<Option<String>> {
        let (Some(kube), Some(pod_name), Some(namespace)) = (
            self.kube.as_ref(),
            self.config.pod_name.as_deref(),
            self.config.pod_namespace.as_deref(),
        ) else {
            return Ok(None);
        };

        let pod = kube.get_pod(namespace, pod_name).await?;
        let Some(rs_name) = owner_name(&pod.metadata, "ReplicaSet") else {
            return Ok(None);
        };
        let replica_set = kube.get_replica_set(namespace, &rs_name).await?;
        let Some(deployment_name) = owner_name(&replica_set.metadata, "Deployment") else {
            return Ok(None);
        };
        let deployment = kube.get_deployment(namespace, &deployment_name).await?;
        Ok(deployment.metadata.uid)
    }
}

/// Map a registration failure to a terminal error, or to the retry message when offline
fn classify_register_error(err: RemoteError) -> Result<String, RegistrationError> {
    if user_lacks_api_privileges(&err) {
        return Err(RegistrationError::InsufficientPrivileges(err));
    }
    if incorrect_credentials(&err) {
        return Err(RegistrationError::IncorrectCredentials(err));
    }
    if server_lacks_agent_health_api_support(&err) {
        return Err(RegistrationError::UnsupportedRemote(err));
    }
    if server_is_offline(&err) {
        return Ok(err.to_string());
    }
    Err(RegistrationError::Remote(err))
}

fn owner_name(metadata: &ObjectMeta, kind: &str) -> Option<String> {
    metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|owner| owner.kind == kind)
        .map(|owner| owner.name.clone())
}
