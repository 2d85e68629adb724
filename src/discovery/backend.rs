use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// One entry returned by a service watch: the instance's URL and the tags
/// it was registered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
}

impl ServiceEntry {
    /// Canonical instance URL for this entry (§3, §6): absent scheme filled
    /// from `default_scheme`, default ports omitted, blank address rejected.
    pub fn to_url(&self, default_scheme: &str) -> Result<String, ServiceError> {
        canonicalize("", &self.address, Some(self.port), default_scheme)
    }
}

fn is_default_port(scheme: &str, port: u16) -> bool {
    matches!((scheme, port), ("http", 80) | ("https", 443))
}

/// Canonicalizes a scheme/host/port triple into the instance string form
/// used throughout the system: `scheme://host[:port]`. Default ports are
/// omitted, an absent scheme is filled from `default_scheme` (itself
/// defaulting to `"https"`), and a blank host or scheme is rejected (§3, §6).
pub fn canonicalize(
    scheme: &str,
    host: &str,
    port: Option<u16>,
    default_scheme: &str,
) -> Result<String, ServiceError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ServiceError::Config("instance host is blank".to_string()));
    }

    let scheme = if scheme.is_empty() {
        if default_scheme.is_empty() {
            "https"
        } else {
            default_scheme
        }
    } else {
        scheme
    };
    if scheme.is_empty() {
        return Err(ServiceError::Config("instance scheme is blank".to_string()));
    }

    match port {
        Some(p) if !is_default_port(scheme, p) => Ok(format!("{scheme}://{host}:{p}")),
        _ => Ok(format!("{scheme}://{host}")),
    }
}

/// Re-canonicalizes an already-formatted instance URL. Proves
/// `normalize(format(scheme, host, port)) == format(scheme, host, port)`
/// for valid inputs (§8 testable property).
pub fn normalize(raw: &str, default_scheme: &str) -> Result<String, ServiceError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ServiceError::Config("instance url is blank".to_string()));
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        let scheme = if default_scheme.is_empty() { "https" } else { default_scheme };
        format!("{scheme}://{raw}")
    };

    let parsed = url::Url::parse(&with_scheme)
        .map_err(|e| ServiceError::Config(format!("invalid instance url {raw:?}: {e}")))?;
    let scheme = parsed.scheme();
    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ServiceError::Config(format!("instance url {raw:?} has no host")))?;

    canonicalize(scheme, host, parsed.port(), default_scheme)
}

/// Query parameters for a blocking service lookup (§6).
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub datacenter: Option<String>,
    pub wait_index: u64,
}

/// Registration payload for self-advertisement (§4.7).
#[derive(Debug, Clone)]
pub struct Registration {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub check_ids: Vec<String>,
}

/// A child key observed under a tree path, for tree-based backends serving
/// the datacenter-filter feed (§6, "treated as a generic key-value feed
/// source").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// The interface the core consumes from a discovery backend (§9 design
/// note: "a local trait/interface `Backend` declaring only what the core
/// consumes; adapter structs wrap vendor clients"). Nothing here leaks a
/// vendor-specific type.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Long-poll a named service. Blocks (server-side) until `wait_index` is
    /// superseded or a timeout elapses.
    async fn service(
        &self,
        name: &str,
        tag: Option<&str>,
        passing_only: bool,
        opts: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, u64), ServiceError>;

    /// Enumerate known datacenters.
    async fn datacenters(&self) -> Result<Vec<String>, ServiceError>;

    async fn register(&self, reg: &Registration) -> Result<(), ServiceError>;

    async fn deregister(&self, id: &str) -> Result<(), ServiceError>;

    async fn update_ttl(&self, check_id: &str, output: &str, passing: bool)
        -> Result<(), ServiceError>;

    /// List children under a tree path, for tree-based backends.
    async fn entries(&self, path: &str) -> Result<Vec<TreeEntry>, ServiceError>;
}
