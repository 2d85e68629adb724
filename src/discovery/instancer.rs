use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify, RwLock};

use crate::discovery::backend::{Backend, QueryOptions};
use crate::error::ServiceError;

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One `{instances[], err}` update published by an instancer (§4.2, C5).
#[derive(Debug, Clone, Default)]
pub struct InstancerEvent {
    pub instances: Vec<String>,
    pub error: Option<ServiceError>,
}

impl InstancerEvent {
    fn stopped() -> Self {
        Self {
            instances: Vec::new(),
            error: None,
        }
    }

    /// Whether two consecutive events are indistinguishable (§4.2
    /// "Deduplication": instance lists are sorted before comparison).
    fn same_as(&self, other: &InstancerEvent) -> bool {
        let mut a = self.instances.clone();
        let mut b = other.instances.clone();
        a.sort();
        b.sort();
        if a != b {
            return false;
        }
        match (&self.error, &other.error) {
            (None, None) => true,
            (Some(x), Some(y)) => x.to_string() == y.to_string(),
            _ => false,
        }
    }
}

/// Identity of one `(service, tags, passingOnly, datacenter)` subscription
/// (§3 "Watch key").
#[derive(Debug, Clone)]
pub struct Watch {
    pub service: String,
    pub tag: Option<String>,
    pub other_tags: Vec<String>,
    pub passing_only: bool,
    pub datacenter: Option<String>,
}

impl Watch {
    pub fn key(&self) -> String {
        format!(
            "{}{:?}{}{}",
            self.service,
            self.other_tags,
            if self.passing_only { "T" } else { "F" },
            self.datacenter.as_deref().unwrap_or("")
        )
    }
}

struct Inner {
    listeners: Vec<mpsc::Sender<InstancerEvent>>,
    last: InstancerEvent,
}

/// Long-lived watcher producing a stream of instance-set events for a
/// single watch (§4.2, C5). Owns one background task, stopped by `stop()`.
pub struct Instancer {
    watch: Watch,
    inner: Arc<RwLock<Inner>>,
    stop: Arc<Notify>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
}

impl Instancer {
    pub fn start(watch: Watch, backend: Arc<dyn Backend>, default_scheme: String) -> Arc<Self> {
        let inner = Arc::new(RwLock::new(Inner {
            listeners: Vec::new(),
            last: InstancerEvent::default(),
        }));
        let stop = Arc::new(Notify::new());
        let stopped = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let instancer = Arc::new(Self {
            watch: watch.clone(),
            inner: inner.clone(),
            stop: stop.clone(),
            stopped: stopped.clone(),
        });

        tokio::spawn(async move {
            run_loop(watch, backend, default_scheme, inner, stop, stopped).await;
        });

        instancer
    }

    pub fn watch_key(&self) -> String {
        self.watch.key()
    }

    /// Add a listener. The current state is pushed to it immediately
    /// (§4.2 "the current state MUST be pushed to it immediately on
    /// registration").
    pub async fn register(&self, tx: mpsc::Sender<InstancerEvent>) {
        let mut inner = self.inner.write().await;
        let _ = tx.send(inner.last.clone()).await;
        inner.listeners.push(tx);
    }

    pub async fn deregister(&self, tx: &mpsc::Sender<InstancerEvent>) {
        let mut inner = self.inner.write().await;
        inner.listeners.retain(|l| !l.same_channel(tx));
    }

    /// Signal the loop to exit. Idempotent (§9).
    pub fn stop(&self) {
        if !self.stopped.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.stop.notify_waiters();
        }
    }
}

async fn publish(inner: &Arc<RwLock<Inner>>, event: InstancerEvent) {
    let mut guard = inner.write().await;
    if guard.last.same_as(&event) {
        return;
    }
    guard.last = event.clone();
    metrics::counter!("service_instancer_updates_total").increment(1);
    if event.error.is_some() {
        metrics::counter!("service_instancer_errors_total").increment(1);
    }
    metrics::gauge!("service_instancer_instances").set(event.instances.len() as f64);
    for listener in &guard.listeners {
        let _ = listener.send(event.clone()).await;
    }
}

fn entries_to_instances(
    entries: Vec<crate::discovery::backend::ServiceEntry>,
    other_tags: &[String],
    scheme: &str,
) -> Vec<String> {
    let mut instances: Vec<String> = entries
        .into_iter()
        .filter(|e| other_tags.iter().all(|t| e.tags.contains(t)))
        .filter_map(|e| match e.to_url(scheme) {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::warn!(address = %e.address, port = e.port, %err, "skipping malformed instance entry");
                None
            }
        })
        .collect();
    instances.sort();
    instances
}

async fn run_loop(
    watch: Watch,
    backend: Arc<dyn Backend>,
    scheme: String,
    inner: Arc<RwLock<Inner>>,
    stop: Arc<Notify>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
) {
    let mut wait_index: u64 = 0;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if stopped.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }

        let opts = QueryOptions {
            datacenter: watch.datacenter.clone(),
            wait_index,
        };

        let fetch = backend.service(
            &watch.service,
            watch.tag.as_deref(),
            watch.passing_only,
            &opts,
        );

        tokio::select! {
            _ = stop.notified() => return,
            result = fetch => {
                match result {
                    Ok((entries, new_index)) => {
                        wait_index = new_index;
                        backoff = INITIAL_BACKOFF;
                        let instances = entries_to_instances(entries, &watch.other_tags, &scheme);
                        publish(&inner, InstancerEvent { instances, error: None }).await;
                    }
                    Err(err) => {
                        publish(&inner, InstancerEvent { instances: Vec::new(), error: Some(err) }).await;
                        tokio::select! {
                            _ = stop.notified() => return,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
                    }
                }
            }
        }
    }
}

impl Drop for Instancer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::backend::{Registration, ServiceEntry, TreeEntry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    struct ScriptedBackend {
        calls: AtomicU64,
        responses: TokioMutex<Vec<Result<(Vec<ServiceEntry>, u64), ServiceError>>>,
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn service(
            &self,
            _name: &str,
            _tag: Option<&str>,
            _passing_only: bool,
            _opts: &QueryOptions,
        ) -> Result<(Vec<ServiceEntry>, u64), ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                std::future::pending::<()>().await;
                unreachable!()
            } else {
                responses.remove(0)
            }
        }

        async fn datacenters(&self) -> Result<Vec<String>, ServiceError> {
            Ok(Vec::new())
        }

        async fn register(&self, _reg: &Registration) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn deregister(&self, _id: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn update_ttl(&self, _c: &str, _o: &str, _p: bool) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn entries(&self, _path: &str) -> Result<Vec<TreeEntry>, ServiceError> {
            Ok(Vec::new())
        }
    }

    fn watch() -> Watch {
        Watch {
            service: "payments".to_string(),
            tag: None,
            other_tags: Vec::new(),
            passing_only: true,
            datacenter: None,
        }
    }

    #[tokio::test]
    async fn new_subscriber_gets_immediate_snapshot() {
        let backend = Arc::new(ScriptedBackend {
            calls: AtomicU64::new(0),
            responses: TokioMutex::new(vec![Ok((
                vec![ServiceEntry {
                    address: "10.0.0.1".to_string(),
                    port: 8080,
                    tags: vec![],
                }],
                1,
            ))]),
        });

        let instancer = Instancer::start(watch(), backend, "https".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (tx, mut rx) = mpsc::channel(4);
        instancer.register(tx).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.instances, vec!["https://10.0.0.1:8080".to_string()]);

        instancer.stop();
    }

    #[tokio::test]
    async fn duplicate_events_are_suppressed() {
        let backend = Arc::new(ScriptedBackend {
            calls: AtomicU64::new(0),
            responses: TokioMutex::new(vec![
                Ok((
                    vec![ServiceEntry {
                        address: "10.0.0.1".to_string(),
                        port: 8080,
                        tags: vec![],
                    }],
                    1,
                )),
                Ok((
                    vec![ServiceEntry {
                        address: "10.0.0.1".to_string(),
                        port: 8080,
                        tags: vec![],
                    }],
                    2,
                )),
            ]),
        });

        let instancer = Instancer::start(watch(), backend.clone(), "https".to_string());
        let (tx, mut rx) = mpsc::channel(8);
        tokio::time::sleep(Duration::from_millis(20)).await;
        instancer.register(tx).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.instances, vec!["https://10.0.0.1:8080".to_string()]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        instancer.stop();
    }
}
