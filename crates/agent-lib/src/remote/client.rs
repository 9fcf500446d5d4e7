//! HTTP client for the management service
//!
//! All requests carry HTTP Basic credentials and the `x-anchore-account`
//! header. Paths are relative to the configured base URL and may contain an
//! `{{id}}` placeholder that is substituted per call.

use super::error::{ErrorDetail, RemoteError};
use super::{API_VERSION_PROBE_PATH, ID_PLACEHOLDER, INVENTORY_PATH_V1, INVENTORY_PATH_V2};
use crate::models::Report;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

/// Header naming the account a request acts on
pub const ACCOUNT_HEADER: &str = "x-anchore-account";

/// Credentials used for one account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub account: String,
}

/// Configuration for the management service client
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the service (e.g., "https://anchore.example.com")
    pub url: String,
    /// Default credentials
    pub credentials: Credentials,
    /// Skip TLS certificate verification
    pub insecure_skip_verify: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            credentials: Credentials::default(),
            insecure_skip_verify: false,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Inventory endpoint generation exposed by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryApiVersion {
    V1,
    V2,
}

impl InventoryApiVersion {
    pub fn inventory_path(&self) -> &'static str {
        match self {
            InventoryApiVersion::V1 => INVENTORY_PATH_V1,
            InventoryApiVersion::V2 => INVENTORY_PATH_V2,
        }
    }
}

/// Client for the management service
///
/// Cloning is cheap; clones share the connection pool and the detected
/// inventory API version.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: Client,
    base_url: Url,
    credentials: Credentials,
    api_version: Arc<OnceCell<InventoryApiVersion>>,
}

impl RemoteClient {
    /// Create a new client from configuration
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .map_err(|e| RemoteError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;

        // Url::join drops the last path segment unless the base ends in '/'
        let mut raw = config.url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw)
            .map_err(|e| RemoteError::InvalidRequest(format!("invalid service URL {raw:?}: {e}")))?;

        Ok(Self {
            http,
            base_url,
            credentials: config.credentials.clone(),
            api_version: Arc::new(OnceCell::new()),
        })
    }

    /// Clone of this client that acts as another account
    pub fn for_account(&self, credentials: Credentials) -> Self {
        Self {
            credentials,
            ..self.clone()
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// GET a path, returning the raw (JSON) body
    pub async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        self.execute(Method::GET, path, None).await
    }

    /// GET a path and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let body = self.get(path).await?;
        decode(path, &body)
    }

    /// POST a JSON body, substituting `{{id}}` in the path with `id`
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        body: &B,
        path: &str,
        id: &str,
    ) -> Result<Vec<u8>, RemoteError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| RemoteError::InvalidRequest(format!("failed to encode body: {e}")))?;
        let path = substitute_id(path, id);
        self.execute(Method::POST, &path, Some(payload)).await
    }

    /// POST a JSON body and decode the JSON response
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        body: &B,
        path: &str,
        id: &str,
    ) -> Result<T, RemoteError> {
        let response = self.post(body, path, id).await?;
        decode(path, &response)
    }

    /// Inventory API generation, probed once per client family
    pub async fn inventory_api_version(&self) -> Result<InventoryApiVersion, RemoteError> {
        let version = self
            .api_version
            .get_or_try_init(|| async {
                let detected = match self.get(API_VERSION_PROBE_PATH).await {
                    Ok(_) => InventoryApiVersion::V2,
                    Err(e) if matches!(e.status(), Some(404) | Some(405)) => InventoryApiVersion::V1,
                    Err(e) => return Err(e),
                };
                info!(version = ?detected, "Detected inventory API version");
                Ok(detected)
            })
            .await?;
        Ok(*version)
    }

    /// POST a report to the inventory endpoint for the detected API version
    pub async fn post_inventory(&self, report: &Report) -> Result<(), RemoteError> {
        let version = self.inventory_api_version().await?;
        self.post(report, version.inventory_path(), "").await?;
        Ok(())
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, RemoteError> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| RemoteError::InvalidRequest(format!("invalid path {path:?}: {e}")))?;

        debug!(method = %method, url = %url, account = %self.credentials.account, "Sending request");

        let mut request = self
            .http
            .request(method.clone(), url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .header(ACCOUNT_HEADER, &self.credentials.account);
        if let Some(payload) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(payload);
        }

        let transport = |source: reqwest::Error| RemoteError::Transport {
            method: method.to_string(),
            path: path.to_string(),
            source,
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport)?;

        if !status.is_success() {
            return Err(RemoteError::Api {
                status: status.as_u16(),
                method: method.to_string(),
                path: path.to_string(),
                detail: serde_json::from_slice::<ErrorDetail>(&bytes).ok(),
            });
        }

        if !bytes.is_empty() && serde_json::from_slice::<IgnoredAny>(&bytes).is_err() {
            return Err(RemoteError::MalformedResponse {
                method: method.to_string(),
                path: path.to_string(),
            });
        }

        Ok(bytes.to_vec())
    }
}

/// Replace the `{{id}}` placeholder in a path
pub fn substitute_id(path: &str, id: &str) -> String {
    path.replace(ID_PLACEHOLDER, id)
}

fn decode<T: DeserializeOwned>(path: &str, body: &[u8]) -> Result<T, RemoteError> {
    serde_json::from_slice(body).map_err(|source| RemoteError::Decode {
        path: path.to_string(),
        source,
    })
}
