//! Account routing
//!
//! Maps in-scope namespaces onto destination accounts. Routing is fan-out:
//! a namespace matching several routes is delivered to each of them.

use crate::filter::NamespaceMatcher;
use crate::models::Namespace;
use crate::remote::Credentials;
use std::collections::BTreeMap;
use tracing::debug;

/// Namespace patterns (and optional credentials) for one account
#[derive(Debug, Clone)]
pub struct AccountRoute {
    pub account: String,
    /// Credentials to deliver as; the default user is used when absent
    pub user: Option<String>,
    pub password: Option<String>,
    matcher: NamespaceMatcher,
}

impl AccountRoute {
    pub fn new<S: AsRef<str>>(account: impl Into<String>, namespaces: &[S]) -> Self {
        Self {
            account: account.into(),
            user: None,
            password: None,
            matcher: NamespaceMatcher::new(namespaces),
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn matches(&self, namespace: &str) -> bool {
        self.matcher.matches(namespace)
    }

    /// Credentials for this account, falling back to the default user
    pub fn credentials(&self, default: &Credentials) -> Credentials {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Credentials {
                user: user.clone(),
                password: password.clone(),
                account: self.account.clone(),
            },
            _ => Credentials {
                account: self.account.clone(),
                ..default.clone()
            },
        }
    }
}

/// Route namespaces by the value of a namespace label
#[derive(Debug, Clone)]
pub struct LabelRouting {
    pub label_key: String,
    /// Drop namespaces without the label instead of using the default account
    pub ignore_missing_label: bool,
}

/// Assign namespaces to accounts by pattern routes
///
/// Namespaces matching no route go to `default_account`.
pub fn route_namespaces(
    default_account: &str,
    namespaces: &[Namespace],
    routes: &[AccountRoute],
) -> BTreeMap<String, Vec<Namespace>> {
    let mut buckets: BTreeMap<String, Vec<Namespace>> = BTreeMap::new();

    for namespace in namespaces {
        let mut routed = false;
        for route in routes.iter().filter(|r| r.matches(&namespace.name)) {
            buckets
                .entry(route.account.clone())
                .or_default()
                .push(namespace.clone());
            routed = true;
        }
        if !routed {
            buckets
                .entry(default_account.to_string())
                .or_default()
                .push(namespace.clone());
        }
    }

    debug!(accounts = buckets.len(), "Routed namespaces to accounts");
    buckets
}

/// Assign namespaces to accounts by a namespace label
pub fn route_namespaces_by_label(
    default_account: &str,
    namespaces: &[Namespace],
    routing: &LabelRouting,
) -> BTreeMap<String, Vec<Namespace>> {
    let mut buckets: BTreeMap<String, Vec<Namespace>> = BTreeMap::new();

    for namespace in namespaces {
        let account = match namespace.labels.get(&routing.label_key) {
            Some(account) if !account.is_empty() => account.clone(),
            _ if routing.ignore_missing_label => {
                debug!(namespace = %namespace.name, label = %routing.label_key, "Namespace has no account label, skipping");
                continue;
            }
            _ => default_account.to_string(),
        };
        buckets.entry(account).or_default().push(namespace.clone());
    }

    buckets
}
