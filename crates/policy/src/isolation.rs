//! Declarative allow/block-list evaluators for the sandbox.
//!
//! Each evaluator is pure: request counters live on the caller's sandbox
//! context, so two concurrent sandboxes never share a budget.

use thiserror::Error;
use toolgate_core::{IsolationConfig, ViolationKind};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PolicyViolation {
    pub kind: ViolationKind,
    pub message: String,
}

impl PolicyViolation {
    fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileSystemIsolation {
    allowed_paths: Vec<String>,
    blocked_paths: Vec<String>,
}

impl FileSystemIsolation {
    pub fn new(allowed_paths: Vec<String>, blocked_paths: Vec<String>) -> Self {
        Self {
            allowed_paths: allowed_paths.iter().map(|p| normalize_path(p)).collect(),
            blocked_paths: blocked_paths.iter().map(|p| normalize_path(p)).collect(),
        }
    }

    pub fn from_config(config: &IsolationConfig) -> Self {
        Self::new(config.allowed_paths.clone(), config.blocked_paths.clone())
    }

    pub fn check(&self, path: &str) -> Result<(), PolicyViolation> {
        let normalized = normalize_path(path);

        if let Some(blocked) = self
            .blocked_paths
            .iter()
            .find(|b| path_matches(&normalized, b))
        {
            return Err(PolicyViolation::new(
                ViolationKind::Filesystem,
                format!("Access to blocked path: {} (matches {})", path, blocked),
            ));
        }

        if !self.allowed_paths.is_empty()
            && !self.allowed_paths.iter().any(|a| path_matches(&normalized, a))
        {
            return Err(PolicyViolation::new(
                ViolationKind::Filesystem,
                format!("Path not in allow-list: {}", path),
            ));
        }

        Ok(())
    }
}

/// Component-wise prefix: `/tmp/sandbox` covers `/tmp/sandbox/a` but not `/tmp/sandbox-b`.
fn path_matches(path: &str, entry: &str) -> bool {
    if entry == "/" {
        return path.starts_with('/');
    }
    path.strip_prefix(entry)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Resolves `.` and `..` lexically so traversal cannot sidestep a block entry.
fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkIsolation {
    allowed_domains: Vec<String>,
    blocked_domains: Vec<String>,
    max_requests: Option<u32>,
}

impl NetworkIsolation {
    pub fn new(
        allowed_domains: Vec<String>,
        blocked_domains: Vec<String>,
        max_requests: Option<u32>,
    ) -> Self {
        Self {
            allowed_domains: allowed_domains.iter().map(|d| d.to_lowercase()).collect(),
            blocked_domains: blocked_domains.iter().map(|d| d.to_lowercase()).collect(),
            max_requests,
        }
    }

    pub fn from_config(config: &IsolationConfig) -> Self {
        Self::new(
            config.allowed_domains.clone(),
            config.blocked_domains.clone(),
            config.max_network_requests,
        )
    }

    /// Accepts full URLs as well as bare hosts such as `api.example.com/v1`.
    pub fn extract_domain(raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let host = |url: Url| url.host_str().map(|h| h.to_lowercase());
        Url::parse(raw)
            .ok()
            .and_then(host)
            .or_else(|| Url::parse(&format!("http://{}", raw)).ok().and_then(host))
    }

    pub fn check_domain(&self, domain: &str) -> Result<(), PolicyViolation> {
        let domain = domain.to_lowercase();

        if let Some(blocked) = self
            .blocked_domains
            .iter()
            .find(|b| domain_matches(&domain, b))
        {
            return Err(PolicyViolation::new(
                ViolationKind::Network,
                format!("Network access to blocked domain: {} (matches {})", domain, blocked),
            ));
        }

        if !self.allowed_domains.is_empty()
            && !self.allowed_domains.iter().any(|a| domain_matches(&domain, a))
        {
            return Err(PolicyViolation::new(
                ViolationKind::Network,
                format!("Domain not in allow-list: {}", domain),
            ));
        }

        Ok(())
    }

    /// Returns the extracted domain on success.
    pub fn check_url(&self, raw: &str) -> Result<String, PolicyViolation> {
        let domain = Self::extract_domain(raw).ok_or_else(|| {
            PolicyViolation::new(
                ViolationKind::Network,
                format!("Could not determine domain of: {}", raw),
            )
        })?;
        self.check_domain(&domain)?;
        Ok(domain)
    }

    /// `performed` is the number of requests already made in this sandbox.
    pub fn check_request_budget(&self, performed: u32) -> Result<(), PolicyViolation> {
        match self.max_requests {
            Some(max) if performed >= max => Err(PolicyViolation::new(
                ViolationKind::Network,
                format!("Network request limit reached ({} per sandbox)", max),
            )),
            _ => Ok(()),
        }
    }
}

fn domain_matches(domain: &str, entry: &str) -> bool {
    domain == entry || domain.ends_with(&format!(".{}", entry))
}

#[derive(Debug, Clone, Default)]
pub struct ApiRestrictions {
    allowed_apis: Vec<String>,
    blocked_apis: Vec<String>,
    max_calls: Option<u32>,
}

impl ApiRestrictions {
    pub fn new(allowed_apis: Vec<String>, blocked_apis: Vec<String>, max_calls: Option<u32>) -> Self {
        Self {
            allowed_apis,
            blocked_apis,
            max_calls,
        }
    }

    pub fn from_config(config: &IsolationConfig) -> Self {
        Self::new(
            config.allowed_apis.clone(),
            config.blocked_apis.clone(),
            config.max_api_calls,
        )
    }

    pub fn is_allowed(&self, api: &str) -> bool {
        if self.blocked_apis.iter().any(|b| b == api) {
            return false;
        }
        self.allowed_apis.is_empty() || self.allowed_apis.iter().any(|a| a == api)
    }

    pub fn check(&self, api: &str) -> Result<(), PolicyViolation> {
        if self.is_allowed(api) {
            Ok(())
        } else {
            Err(PolicyViolation::new(
                ViolationKind::Api,
                format!("API not permitted in sandbox: {}", api),
            ))
        }
    }

    pub fn check_call_budget(&self, performed: u32) -> Result<(), PolicyViolation> {
        match self.max_calls {
            Some(max) if performed >= max => Err(PolicyViolation::new(
                ViolationKind::Api,
                format!("API call limit reached ({} per sandbox)", max),
            )),
            _ => Ok(()),
        }
    }
}
