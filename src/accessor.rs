use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::gate::Gate;
use crate::layered::LayeredAccessor;
use crate::ring::Ring;
use crate::updatable::UpdatableAccessor;

/// The result of an `Accessor::get` call: an instance string (possibly empty)
/// paired with an optional error. Unlike a plain `Result`, the instance may
/// be populated even when `error` is `Some` — several variants (Gated,
/// Layered) report the last candidate instance alongside the reason it was
/// rejected (§3, §4.4, §4.6).
#[derive(Debug, Clone)]
pub struct AccessResult {
    pub instance: String,
    pub error: Option<ServiceError>,
}

impl AccessResult {
    pub fn ok(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            error: None,
        }
    }

    pub fn err(error: ServiceError) -> Self {
        Self {
            instance: String::new(),
            error: Some(error),
        }
    }

    pub fn with_instance_and_error(instance: impl Into<String>, error: ServiceError) -> Self {
        Self {
            instance: instance.into(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Uniform `Get(key) -> (instance, error)` abstraction (§3 "Accessor variants").
///
/// No trait objects: every variant of the key->instance lookup problem is
/// enumerated here and dispatched via an exhaustive match, the same way the
/// upstream load balancer in this codebase's ancestry enumerates its
/// strategies instead of boxing a trait object per request.
#[derive(Clone)]
pub enum Accessor {
    Empty,
    MapStatic(Arc<HashMap<String, String>>),
    Ring(Arc<Ring>),
    HostHashed(Arc<Ring>, Arc<HashMap<Arc<str>, Arc<str>>>),
    Gated(Arc<Gate>, Box<Accessor>),
    Updatable(Arc<UpdatableAccessor>),
    Layered(Arc<LayeredAccessor>),
}

impl Accessor {
    pub fn get(&self, key: &[u8]) -> AccessResult {
        match self {
            Accessor::Empty => AccessResult::err(ServiceError::NoInstances),
            Accessor::MapStatic(m) => {
                let k = String::from_utf8_lossy(key);
                match m.get(k.as_ref()) {
                    Some(v) => AccessResult::ok(v.clone()),
                    None => AccessResult::err(ServiceError::NoSuchKey),
                }
            }
            Accessor::Ring(ring) => match ring.get(key) {
                Some(inst) => AccessResult::ok(inst.to_string()),
                None => AccessResult::err(ServiceError::NoInstances),
            },
            Accessor::HostHashed(ring, host_to_url) => match ring.get(key) {
                Some(host) => match host_to_url.get(&*host) {
                    Some(url) => AccessResult::ok(url.to_string()),
                    None => AccessResult::err(ServiceError::NoInstances),
                },
                None => AccessResult::err(ServiceError::NoInstances),
            },
            Accessor::Gated(gate, inner) => {
                let res = inner.get(key);
                if gate.open() {
                    res
                } else {
                    AccessResult {
                        instance: res.instance,
                        error: Some(ServiceError::GateClosed),
                    }
                }
            }
            Accessor::Updatable(u) => u.get(key),
            Accessor::Layered(l) => l.get(key),
        }
    }

    pub fn map_static(m: HashMap<String, String>) -> Self {
        Accessor::MapStatic(Arc::new(m))
    }

    pub fn ring(ring: Ring) -> Self {
        Accessor::Ring(Arc::new(ring))
    }

    pub fn gated(gate: Arc<Gate>, inner: Accessor) -> Self {
        Accessor::Gated(gate, Box::new(inner))
    }

    /// Build a ring-of-hosts accessor from a list of instances by extracting
    /// each instance's host and hashing on it, while still returning the
    /// full instance URL from `get`.
    pub fn build_host_hashed<I, S>(urls: I, vnodes: i64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = HostHashedBuilder::default();
        for url in urls {
            builder.add(url.as_ref());
        }
        builder.build(vnodes)
    }
}

/// Incrementally collects `(host, url)` pairs before finalizing a `HostHashed`
/// accessor. `add` panics if a URL lacks a scheme or host, mirroring the
/// reference implementation's construction-time validation (§3).
#[derive(Default)]
pub struct HostHashedBuilder {
    hosts: Vec<String>,
    host_to_url: HashMap<String, String>,
}

impl HostHashedBuilder {
    pub fn add(&mut self, raw_url: &str) {
        let parsed = url::Url::parse(raw_url)
            .unwrap_or_else(|e| panic!("HostHashed: invalid instance url {raw_url:?}: {e}"));
        if parsed.scheme().is_empty() {
            panic!("HostHashed: instance url {raw_url:?} has no scheme");
        }
        let host = parsed
            .host_str()
            .unwrap_or_else(|| panic!("HostHashed: instance url {raw_url:?} has no host"))
            .to_string();
        self.hosts.push(host.clone());
        self.host_to_url.insert(host, raw_url.to_string());
    }

    pub fn build(self, vnodes: i64) -> Accessor {
        let ring = Ring::build(self.hosts, vnodes);
        let host_to_url: HashMap<Arc<str>, Arc<str>> = self
            .host_to_url
            .into_iter()
            .map(|(h, u)| (Arc::from(h.as_str()), Arc::from(u.as_str())))
            .collect();
        Accessor::HostHashed(Arc::new(ring), Arc::new(host_to_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_always_fails() {
        let a = Accessor::Empty;
        let r = a.get(b"k");
        assert!(matches!(r.error, Some(ServiceError::NoInstances)));
        assert_eq!(r.instance, "");
    }

    #[test]
    fn map_static_lookup() {
        let mut m = HashMap::new();
        m.insert("k".to_string(), "v".to_string());
        let a = Accessor::map_static(m);
        assert_eq!(a.get(b"k").instance, "v");
        assert!(matches!(a.get(b"missing").error, Some(ServiceError::NoSuchKey)));
    }

    #[test]
    fn gated_open_passes_through() {
        let gate = Arc::new(Gate::new(true));
        let mut m = HashMap::new();
        m.insert("k".to_string(), "u1".to_string());
        let inner = Accessor::map_static(m);
        let gated = Accessor::gated(gate.clone(), inner);

        let r = gated.get(b"k");
        assert_eq!(r.instance, "u1");
        assert!(r.error.is_none());

        gate.lower();
        let r = gated.get(b"k");
        assert_eq!(r.instance, "u1");
        assert!(matches!(r.error, Some(ServiceError::GateClosed)));
    }

    #[test]
    fn host_hashed_returns_full_url() {
        let a = Accessor::build_host_hashed(vec!["https://example.com:8443/path"], 50);
        let r = a.get(b"any-key");
        assert_eq!(r.instance, "https://example.com:8443/path");
    }

    #[test]
    #[should_panic(expected = "no host")]
    fn host_hashed_add_panics_on_missing_host() {
        let mut b = HostHashedBuilder::default();
        b.add("file:///etc/passwd");
    }
}
