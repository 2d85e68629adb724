use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;

use crate::discovery::backend::Backend;
use crate::discovery::instancer::Watch;
use crate::environment::Environment;

/// One configured cross-datacenter watch template, before it is expanded
/// across the currently-active datacenter list (§4.8, C9).
#[derive(Debug, Clone)]
pub struct CrossDcWatch {
    pub service: String,
    pub tag: Option<String>,
    pub other_tags: Vec<String>,
    pub passing_only: bool,
}

/// Periodically enumerates datacenters and reconciles the environment's
/// instancer set against the Cartesian product
/// `(cross-DC watches × active DCs) − inactive DCs` (§4.8, C9).
pub struct DatacenterWatcher {
    environment: Arc<Environment>,
    backend: Arc<dyn Backend>,
    watches: Vec<CrossDcWatch>,
    watch_interval: Duration,
    datacenter_retries: u32,
    inactive_dcs: ArcSwap<HashSet<String>>,
    stop: Arc<Notify>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
}

impl DatacenterWatcher {
    pub fn start(
        environment: Arc<Environment>,
        backend: Arc<dyn Backend>,
        watches: Vec<CrossDcWatch>,
        watch_interval: Duration,
        datacenter_retries: u32,
    ) -> Arc<Self> {
        let watcher = Arc::new(Self {
            environment,
            backend,
            watches,
            watch_interval,
            datacenter_retries,
            inactive_dcs: ArcSwap::from_pointee(HashSet::new()),
            stop: Arc::new(Notify::new()),
            stopped: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });

        let task = watcher.clone();
        tokio::spawn(async move {
            task.run().await;
        });

        watcher
    }

    /// Feed one `(name, inactive)` update from the external datacenter
    /// liveness listener into the inactive set (§4.8).
    pub fn set_datacenter_active(&self, name: &str, inactive: bool) {
        let current = self.inactive_dcs.load();
        let mut next: HashSet<String> = (**current).clone();
        if inactive {
            next.insert(name.to_string());
        } else {
            next.remove(name);
        }
        self.inactive_dcs.store(Arc::new(next));
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.stop.notify_waiters();
        }
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.watch_interval);
        loop {
            tokio::select! {
                _ = self.stop.notified() => return,
                _ = ticker.tick() => {
                    if self.stopped.load(std::sync::atomic::Ordering::SeqCst) {
                        return;
                    }
                    self.reconcile_once().await;
                }
            }
        }
    }

    async fn reconcile_once(&self) {
        metrics::counter!("service_datacenter_watcher_ticks_total").increment(1);

        let dcs = match self.active_datacenters().await {
            Some(dcs) => dcs,
            None => {
                metrics::counter!("service_datacenter_watcher_errors_total").increment(1);
                tracing::error!("datacenter watcher: no datacenters after retries");
                return;
            }
        };

        let inactive = self.inactive_dcs.load();
        let existing = self.environment.instancer_keys();
        let mut retained = HashSet::new();
        let mut to_add = Vec::new();

        for w in &self.watches {
            for dc in &dcs {
                if inactive.contains(dc) {
                    continue;
                }
                let watch = Watch {
                    service: w.service.clone(),
                    tag: w.tag.clone(),
                    other_tags: w.other_tags.clone(),
                    passing_only: w.passing_only,
                    datacenter: Some(dc.clone()),
                };
                let key = watch.key();
                if retained.contains(&key) {
                    continue;
                }
                if existing.contains(&key) {
                    retained.insert(key);
                } else {
                    retained.insert(key);
                    to_add.push(watch);
                }
            }
        }

        self.environment.update_instancers(&retained, to_add).await;
    }

    async fn active_datacenters(&self) -> Option<Vec<String>> {
        let mut backoff = Duration::from_millis(10);
        for attempt in 0..self.datacenter_retries.max(1) {
            match self.backend.datacenters().await {
                Ok(dcs) => return Some(dcs),
                Err(err) => {
                    tracing::warn!(attempt, %err, "datacenter enumeration failed");
                    if attempt + 1 >= self.datacenter_retries.max(1) {
                        break;
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, Duration::from_secs(5));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::Accessor;
    use crate::discovery::backend::{QueryOptions, Registration, ServiceEntry, TreeEntry};
    use crate::environment::AccessorFactory;
    use crate::error::ServiceError;
    use crate::ring::Ring;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Mutex as TokioMutex;

    struct TickingDcBackend {
        ticks: AtomicU32,
        dc_sets: TokioMutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Backend for TickingDcBackend {
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
            let mut sets = self.dc_sets.lock().await;
            if sets.is_empty() {
                return Ok(Vec::new());
            }
            let idx = (self.ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst) as usize)
                .min(sets.len() - 1);
            Ok(sets[idx].clone())
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
        Arc::new(|instances: &[String]| Accessor::ring(Ring::build(instances.to_vec(), 211)))
    }

    #[tokio::test]
    async fn reconciliation_follows_dc_set_across_ticks() {
        let backend = Arc::new(TickingDcBackend {
            ticks: AtomicU32::new(0),
            dc_sets: TokioMutex::new(vec![
                vec!["dc1".to_string(), "dc2".to_string()],
                vec!["dc1".to_string(), "dc3".to_string()],
            ]),
        });

        let env = Environment::new(backend.clone(), "http".to_string(), factory());
        let watcher = DatacenterWatcher::start(
            env.clone(),
            backend,
            vec![CrossDcWatch {
                service: "payments".to_string(),
                tag: None,
                other_tags: vec![],
                passing_only: false,
            }],
            Duration::from_millis(20),
            10,
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        let keys = env.instancer_keys();
        assert!(keys.iter().any(|k| k.ends_with("dc1")));
        assert!(keys.iter().any(|k| k.ends_with("dc2")));

        tokio::time::sleep(Duration::from_millis(60)).await;
        let keys = env.instancer_keys();
        assert!(keys.iter().any(|k| k.ends_with("dc1")));
        assert!(keys.iter().any(|k| k.ends_with("dc3")));
        assert!(!keys.iter().any(|k| k.ends_with("dc2")));

        watcher.stop();
        env.close().await;
    }
}
