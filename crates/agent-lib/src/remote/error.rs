//! Error taxonomy for management service requests
//!
//! Classification is done by pure functions over [`RemoteError`] so callers
//! can decide between "retry later" and "give up" without side effects.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// HTTP statuses that mean the service (or its gateway) is temporarily gone
const OFFLINE_STATUSES: &[u16] = &[502, 503, 504];

/// Errors returned by [`super::RemoteClient`]
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The request never produced an HTTP response
    #[error("{method} {path} failed: {source}")]
    Transport {
        method: String,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-2xx status
    #[error("{method} {path} returned HTTP {status}{}", render_detail(.detail))]
    Api {
        status: u16,
        method: String,
        path: String,
        detail: Option<ErrorDetail>,
    },

    /// A 2xx body that is not JSON, usually a login page or proxy wall
    #[error("{method} {path} returned a response body that is not valid JSON")]
    MalformedResponse { method: String, path: String },

    /// Valid JSON that does not match the expected shape
    #[error("failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The request could not be built
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    /// HTTP status for [`RemoteError::Api`] errors
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human readable message carried by the error payload, if any
    pub fn detail_message(&self) -> Option<&str> {
        match self {
            RemoteError::Api {
                detail: Some(detail),
                ..
            } => Some(detail.message()),
            _ => None,
        }
    }
}

fn render_detail(detail: &Option<ErrorDetail>) -> String {
    match detail {
        Some(d) => format!(": {}", d.message()),
        None => String::new(),
    }
}

/// Decoded error payload of a non-2xx response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Api(ApiErrorDetail),
    Controller(ControllerErrorDetail),
}

impl ErrorDetail {
    pub fn message(&self) -> &str {
        match self {
            ErrorDetail::Api(api) => &api.message,
            ErrorDetail::Controller(ctrl) if !ctrl.detail.is_empty() => &ctrl.detail,
            ErrorDetail::Controller(ctrl) => &ctrl.title,
        }
    }
}

/// Error body produced by the service's API layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub message: String,
    #[serde(default)]
    pub httpcode: Option<u16>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// Error body produced by the service's HTTP controller (problem+json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerErrorDetail {
    #[serde(default)]
    pub detail: String,
    pub status: u16,
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// True when the service is unreachable or its gateway reports it down
pub fn server_is_offline(err: &RemoteError) -> bool {
    match err {
        RemoteError::Transport { source, .. } => {
            source.is_timeout() || source.is_connect() || io_error_is_offline(source)
        }
        RemoteError::Api { status, .. } => OFFLINE_STATUSES.contains(status),
        _ => false,
    }
}

/// True when the service predates the agent health/integration API
pub fn server_lacks_agent_health_api_support(err: &RemoteError) -> bool {
    match err.status() {
        Some(405) => true,
        Some(404) => err
            .detail_message()
            .map(|m| m.to_ascii_lowercase().contains("not found"))
            .unwrap_or(false),
        _ => false,
    }
}

/// True when the credentials are valid but lack the required permissions
pub fn user_lacks_api_privileges(err: &RemoteError) -> bool {
    if err.status() != Some(403) {
        return false;
    }
    err.detail_message()
        .map(|m| {
            let m = m.to_ascii_lowercase();
            m.contains("not authorized") || m.contains("permission")
        })
        .unwrap_or(false)
}

/// True when the service rejected the credentials
pub fn incorrect_credentials(err: &RemoteError) -> bool {
    err.status() == Some(401)
}

fn io_error_is_offline(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::AddrNotAvailable
            );
        }
        source = inner.source();
    }
    false
}
