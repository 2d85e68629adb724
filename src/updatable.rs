use std::sync::RwLock;

use crate::accessor::{AccessResult, Accessor};
use crate::error::ServiceError;

/// Thread-safe swap point for a delegate accessor and/or a sticky error (C3).
///
/// `Get` takes the read lock; writers (`set_instances`/`set_error`/`update`)
/// take the write lock only long enough to swap both fields, never while
/// calling into the delegate. Readers observe either the pre-update or
/// post-update state, never a torn mix of the two (§4.5, §5 invariant ii).
pub struct UpdatableAccessor {
    inner: RwLock<Inner>,
}

struct Inner {
    delegate: Option<Accessor>,
    sticky_error: Option<ServiceError>,
}

impl UpdatableAccessor {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                delegate: None,
                sticky_error: None,
            }),
        }
    }

    pub fn get(&self, key: &[u8]) -> AccessResult {
        let inner = self.inner.read().unwrap();
        if let Some(err) = &inner.sticky_error {
            return AccessResult::err(err.clone());
        }
        match &inner.delegate {
            Some(delegate) => delegate.get(key),
            None => AccessResult::err(ServiceError::NotInitialized),
        }
    }

    /// Atomically set `(delegate=Some(a), error=None)`.
    pub fn set_instances(&self, a: Accessor) {
        let mut inner = self.inner.write().unwrap();
        inner.delegate = Some(a);
        inner.sticky_error = None;
    }

    /// Atomically set `(delegate=None, error=Some(e))`.
    pub fn set_error(&self, e: ServiceError) {
        let mut inner = self.inner.write().unwrap();
        inner.delegate = None;
        inner.sticky_error = Some(e);
    }

    /// Atomically set both delegate and sticky error (either may be absent).
    pub fn update(&self, a: Option<Accessor>, e: Option<ServiceError>) {
        let mut inner = self.inner.write().unwrap();
        inner.delegate = a;
        inner.sticky_error = e;
    }
}

impl Default for UpdatableAccessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lifecycle_matches_scenario_3() {
        let u = UpdatableAccessor::new();
        assert!(matches!(u.get(b"k").error, Some(ServiceError::NotInitialized)));

        let mut m = HashMap::new();
        m.insert("k".to_string(), "v".to_string());
        u.set_instances(Accessor::map_static(m));
        assert_eq!(u.get(b"k").instance, "v");

        u.set_error(ServiceError::NoDatacenters);
        assert!(matches!(u.get(b"k").error, Some(ServiceError::NoDatacenters)));
        assert!(matches!(u.get(b"anything").error, Some(ServiceError::NoDatacenters)));

        let mut m2 = HashMap::new();
        m2.insert("k".to_string(), "v2".to_string());
        u.update(Some(Accessor::map_static(m2)), None);
        assert_eq!(u.get(b"k").instance, "v2");
    }

    #[test]
    fn concurrent_readers_and_writer_never_observe_torn_state() {
        use std::sync::Arc;
        use std::thread;

        let u = Arc::new(UpdatableAccessor::new());
        let mut m = HashMap::new();
        m.insert("k".to_string(), "v0".to_string());
        u.set_instances(Accessor::map_static(m));

        let writer = {
            let u = Arc::clone(&u);
            thread::spawn(move || {
                for i in 0..100 {
                    let mut m = HashMap::new();
                    m.insert("k".to_string(), format!("v{i}"));
                    u.set_instances(Accessor::map_static(m));
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let u = Arc::clone(&u);
            readers.push(thread::spawn(move || {
                for _ in 0..200 {
                    let r = u.get(b"k");
                    assert!(r.instance.starts_with('v'));
                }
            }));
        }

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
