//! Namespace selection
//!
//! Patterns that are valid DNS-1123 labels are matched exactly; anything
//! else is compiled as a regular expression. An explicit include list always
//! wins over exclusion rules.

use crate::models::Namespace;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::warn;

const DNS1123_LABEL_MAX_LEN: usize = 63;

fn dns1123_label() -> &'static Regex {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    LABEL.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static DNS-1123 label pattern")
    })
}

/// True if `value` is a syntactically valid DNS-1123 label
pub fn is_dns1123_label(value: &str) -> bool {
    value.len() <= DNS1123_LABEL_MAX_LEN && dns1123_label().is_match(value)
}

/// A single compiled exclusion rule
#[derive(Debug, Clone)]
pub enum ExclusionCheck {
    /// Exact namespace names, collected into one set
    Exact(HashSet<String>),
    /// A regex tested against the full namespace name
    Pattern(Regex),
}

impl ExclusionCheck {
    pub fn matches(&self, namespace: &str) -> bool {
        match self {
            ExclusionCheck::Exact(names) => names.contains(namespace),
            ExclusionCheck::Pattern(re) => re.is_match(namespace),
        }
    }
}

/// Compile exclusion patterns into checks.
///
/// Invalid regular expressions are logged and skipped.
pub fn build_exclusion_checklist<S: AsRef<str>>(patterns: &[S]) -> Vec<ExclusionCheck> {
    let mut exact = HashSet::new();
    let mut checks = Vec::new();

    for pattern in patterns {
        let pattern = pattern.as_ref();
        if is_dns1123_label(pattern) {
            exact.insert(pattern.to_string());
            continue;
        }
        match Regex::new(pattern) {
            Ok(re) => checks.push(ExclusionCheck::Pattern(re)),
            Err(e) => warn!(pattern = %pattern, error = %e, "Ignoring invalid namespace exclusion pattern"),
        }
    }

    if !exact.is_empty() {
        checks.insert(0, ExclusionCheck::Exact(exact));
    }
    checks
}

/// True if any check matches the namespace name
pub fn is_excluded(checks: &[ExclusionCheck], namespace: &str) -> bool {
    checks.iter().any(|check| check.matches(namespace))
}

/// Apply include/exclude selection to a namespace snapshot
///
/// A non-empty `include` list yields exactly the namespaces named in it
/// (exclusion is not consulted). Otherwise every namespace matching an
/// exclusion check is dropped. Input order is preserved.
pub fn filter_namespaces<S: AsRef<str>>(
    namespaces: Vec<Namespace>,
    include: &[S],
    checks: &[ExclusionCheck],
) -> Vec<Namespace> {
    if !include.is_empty() {
        let wanted: HashSet<&str> = include.iter().map(|s| s.as_ref()).collect();
        return namespaces
            .into_iter()
            .filter(|ns| wanted.contains(ns.name.as_str()))
            .collect();
    }

    namespaces
        .into_iter()
        .filter(|ns| !is_excluded(checks, &ns.name))
        .collect()
}

/// Matcher for namespace-name pattern lists (exact or regex), used by routing
#[derive(Debug, Clone)]
pub struct NamespaceMatcher {
    checks: Vec<ExclusionCheck>,
}

impl NamespaceMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            checks: build_exclusion_checklist(patterns),
        }
    }

    pub fn matches(&self, namespace: &str) -> bool {
        is_excluded(&self.checks, namespace)
    }
}
