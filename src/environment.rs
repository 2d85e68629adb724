use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::accessor::Accessor;
use crate::discovery::backend::Backend;
use crate::discovery::instancer::{Instancer, InstancerEvent, Watch};
use crate::error::ServiceError;
use crate::registrar::Registrar;

/// Builds an [`Accessor`] from a snapshot of instance URLs. Supplied by
/// callers so the environment stays agnostic to which accessor shape a
/// watch should produce (plain ring, host-hashed, etc.) (§3 "Environment").
pub type AccessorFactory = Arc<dyn Fn(&[String]) -> Accessor + Send + Sync>;

struct WatchedInstancer {
    instancer: Arc<Instancer>,
    listener: tokio::sync::mpsc::Sender<InstancerEvent>,
}

/// Root composite owning registrars, instancers, and the accessor factory
/// (§3, C7). Created once, closed once.
pub struct Environment {
    backend: Arc<dyn Backend>,
    default_scheme: String,
    accessor_factory: AccessorFactory,
    registrars: DashMap<String, Arc<Registrar>>,
    instancers: DashMap<String, WatchedInstancer>,
    updatables: DashMap<String, Arc<crate::updatable::UpdatableAccessor>>,
    closed: RwLock<bool>,
}

impl Environment {
    pub fn new(
        backend: Arc<dyn Backend>,
        default_scheme: String,
        accessor_factory: AccessorFactory,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            default_scheme,
            accessor_factory,
            registrars: DashMap::new(),
            instancers: DashMap::new(),
            updatables: DashMap::new(),
            closed: RwLock::new(false),
        })
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// Fetches (or lazily creates) the updatable accessor that always
    /// reflects the latest instance set for a watch (§4.5, C3).
    pub fn accessor_for(&self, key: &str) -> Arc<crate::updatable::UpdatableAccessor> {
        self.updatables
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(crate::updatable::UpdatableAccessor::new()))
            .clone()
    }

    pub fn instancer_keys(&self) -> HashSet<String> {
        self.instancers.iter().map(|e| e.key().clone()).collect()
    }

    /// Ensures a watch has a running instancer, wiring its events into the
    /// matching updatable accessor.
    pub async fn ensure_watch(&self, watch: Watch) -> String {
        let key = watch.key();
        if self.instancers.contains_key(&key) {
            return key;
        }

        let instancer = Instancer::start(watch, self.backend.clone(), self.default_scheme.clone());
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        instancer.register(tx.clone()).await;

        let accessor = self.accessor_for(&key);
        let factory = self.accessor_factory.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event.error {
                    Some(err) => accessor.set_error(err),
                    None => accessor.set_instances(factory(&event.instances)),
                }
            }
        });

        self.instancers.insert(
            key.clone(),
            WatchedInstancer {
                instancer,
                listener: tx,
            },
        );
        key
    }

    /// Atomically reconciles the instancer set against a reconciliation
    /// scan (§4.8): instancers not in `retained` and not in `to_add` are
    /// stopped and removed; instancers in `to_add` are created.
    pub async fn update_instancers(&self, retained: &HashSet<String>, to_add: Vec<Watch>) {
        let stale: Vec<String> = self
            .instancers
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| !retained.contains(k))
            .collect();

        for key in stale {
            if let Some((_, entry)) = self.instancers.remove(&key) {
                entry.instancer.deregister(&entry.listener).await;
                entry.instancer.stop();
            }
        }

        for watch in to_add {
            self.ensure_watch(watch).await;
        }
    }

    pub async fn register(
        &self,
        backend: Arc<dyn Backend>,
        name: String,
        id: Option<String>,
        address: String,
        port: u16,
        tags: Vec<String>,
        checks: &[crate::config::TtlCheckConfig],
    ) -> Result<(), ServiceError> {
        let registrar = Arc::new(Registrar::new(backend, name, id, address.clone(), port, tags, checks)?);
        let instance_key = registrar.instance_key();
        registrar.register().await?;
        self.registrars.insert(instance_key, registrar);
        Ok(())
    }

    pub async fn deregister(&self, instance_key: &str) -> Result<(), ServiceError> {
        if let Some((_, registrar)) = self.registrars.remove(instance_key) {
            registrar.deregister().await?;
        }
        Ok(())
    }

    /// Idempotent close: stops every instancer and registrar even if a
    /// prior close attempt partially failed (§3 "Lifecycles").
    pub async fn close(&self) {
        let mut closed = self.closed.write().await;
        if *closed {
            return;
        }
        *closed = true;
        drop(closed);

        for entry in self.instancers.iter() {
            entry.instancer.stop();
        }
        self.instancers.clear();

        for entry in self.registrars.iter() {
            let _ = entry.deregister().await;
        }
        self.registrars.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::backend::{QueryOptions, Registration, ServiceEntry, TreeEntry};
    use async_trait::async_trait;

    struct EmptyBackend;

    #[async_trait]
    impl Backend for EmptyBackend {
        async fn service(
            &self,
            _n: &str,
            _t: Option<&str>,
            _p: bool,
            _o: &QueryOptions,
        ) -> Result<(Vec<ServiceEntry>, u64), ServiceError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
        async fn datacenters(&self) -> Result<Vec<String>, ServiceError> {
            Ok(Vec::new())
        }
        async fn register(&self, _r: &Registration) -> Result<(), ServiceError> {
            Ok(())
        }
        async fn deregister(&self, _id: &str) -> Result<(), ServiceError> {
            Ok(())
        }
        async fn update_ttl(&self, _c: &str, _o: &str, _p: bool) -> Result<(), ServiceError> {
            Ok(())
        }
        async fn entries(&self, _p: &str) -> Result<Vec<TreeEntry>, ServiceError> {
            Ok(Vec::new())
        }
    }

    fn factory() -> AccessorFactory {
        Arc::new(|instances: &[String]| {
            Accessor::ring(crate::ring::Ring::build(instances.to_vec(), 211))
        })
    }

    #[tokio::test]
    async fn ensure_watch_is_idempotent_on_key() {
        let env = Environment::new(Arc::new(EmptyBackend), "http".to_string(), factory());
        let watch = Watch {
            service: "payments".to_string(),
            tag: None,
            other_tags: vec![],
            passing_only: true,
            datacenter: None,
        };
        let key1 = env.ensure_watch(watch.clone()).await;
        let key2 = env.ensure_watch(watch).await;
        assert_eq!(key1, key2);
        assert_eq!(env.instancer_keys().len(), 1);
        env.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let env = Environment::new(Arc::new(EmptyBackend), "http".to_string(), factory());
        env.close().await;
        env.close().await;
    }
}
