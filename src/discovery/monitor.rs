use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, Mutex, RwLock};

use crate::discovery::instancer::{Instancer, InstancerEvent};

/// Counters and gauges tracked per watch key (§4.3: "update, error,
/// instance-count gauge, last-update-ts, last-error-ts").
#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    pub updates: u64,
    pub errors: u64,
    pub instance_count: usize,
    pub last_update_at: Option<SystemTime>,
    pub last_error_at: Option<SystemTime>,
}

struct State {
    stats: MonitorStats,
    stopped: bool,
}

/// Subscribes to an [`Instancer`] and fans events out to N listeners, with
/// optional settle-timeout debouncing (§4.3, C6).
pub struct Monitor {
    watch_key: String,
    instancer: Arc<Instancer>,
    subscription: mpsc::Sender<InstancerEvent>,
    listeners: Arc<RwLock<Vec<mpsc::Sender<InstancerEvent>>>>,
    state: Arc<Mutex<State>>,
    settle: Duration,
}

impl Monitor {
    pub fn start(watch_key: String, instancer: Arc<Instancer>, settle: Duration) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(16);

        let monitor = Arc::new(Self {
            watch_key,
            instancer: instancer.clone(),
            subscription: tx.clone(),
            listeners: Arc::new(RwLock::new(Vec::new())),
            state: Arc::new(Mutex::new(State {
                stats: MonitorStats::default(),
                stopped: false,
            })),
            settle,
        });

        tokio::spawn(async move {
            instancer.register(tx).await;
        });

        let monitor_for_task = monitor.clone();
        tokio::spawn(async move {
            monitor_for_task.pump(rx).await;
        });

        monitor
    }

    pub fn watch_key(&self) -> &str {
        &self.watch_key
    }

    pub async fn add_listener(&self, tx: mpsc::Sender<InstancerEvent>) {
        self.listeners.write().await.push(tx);
    }

    pub async fn stats(&self) -> MonitorStats {
        self.state.lock().await.stats.clone()
    }

    /// Stop dispatching. Emits a synthetic "stopped" event to each listener
    /// exactly once, then deregisters from the instancer (§4.3).
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.stopped {
            return;
        }
        state.stopped = true;
        drop(state);

        let stopped_event = InstancerEvent {
            instances: Vec::new(),
            error: None,
        };
        for listener in self.listeners.read().await.iter() {
            let _ = listener.send(stopped_event.clone()).await;
        }

        self.instancer.deregister(&self.subscription).await;
    }

    async fn pump(self: Arc<Self>, mut rx: mpsc::Receiver<InstancerEvent>) {
        if self.settle.is_zero() {
            while let Some(event) = rx.recv().await {
                if self.state.lock().await.stopped {
                    break;
                }
                self.record(&event).await;
                self.dispatch(event).await;
            }
        } else {
            let mut pending: Option<InstancerEvent> = None;
            loop {
                let sleep = tokio::time::sleep(self.settle);
                tokio::pin!(sleep);
                tokio::select! {
                    maybe_event = rx.recv() => {
                        match maybe_event {
                            Some(event) => pending = Some(event),
                            None => break,
                        }
                    }
                    _ = &mut sleep, if pending.is_some() => {
                        if let Some(event) = pending.take() {
                            if self.state.lock().await.stopped {
                                break;
                            }
                            self.record(&event).await;
                            self.dispatch(event).await;
                        }
                    }
                }
            }
        }
    }

    async fn record(&self, event: &InstancerEvent) {
        metrics::counter!("service_monitor_dispatch_total").increment(1);
        let mut state = self.state.lock().await;
        if event.error.is_some() {
            state.stats.errors += 1;
            state.stats.last_error_at = Some(SystemTime::now());
        } else {
            state.stats.updates += 1;
            state.stats.instance_count = event.instances.len();
            state.stats.last_update_at = Some(SystemTime::now());
        }
    }

    async fn dispatch(&self, event: InstancerEvent) {
        for listener in self.listeners.read().await.iter() {
            let _ = listener.send(event.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::backend::{Backend, QueryOptions, Registration, ServiceEntry, TreeEntry};
    use crate::discovery::instancer::Watch;
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use tokio::sync::Mutex as TokioMutex;

    struct OnceBackend {
        response: TokioMutex<Option<(Vec<ServiceEntry>, u64)>>,
    }

    #[async_trait]
    impl Backend for OnceBackend {
        async fn service(
            &self,
            _name: &str,
            _tag: Option<&str>,
            _passing_only: bool,
            _opts: &QueryOptions,
        ) -> Result<(Vec<ServiceEntry>, u64), ServiceError> {
            let mut guard = self.response.lock().await;
            match guard.take() {
                Some(r) => Ok(r),
                None => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
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
    async fn undebounced_events_pass_straight_through() {
        let backend = Arc::new(OnceBackend {
            response: TokioMutex::new(Some((
                vec![ServiceEntry {
                    address: "10.0.0.1".to_string(),
                    port: 80,
                    tags: vec![],
                }],
                1,
            ))),
        });
        let instancer = Instancer::start(watch(), backend, "http".to_string());
        let monitor = Monitor::start("k".to_string(), instancer.clone(), Duration::ZERO);

        let (tx, mut rx) = mpsc::channel(4);
        monitor.add_listener(tx).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.stop().await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.instances, vec!["http://10.0.0.1".to_string()]);

        instancer.stop();
    }

    #[tokio::test]
    async fn stop_emits_synthetic_event_once() {
        let backend = Arc::new(OnceBackend {
            response: TokioMutex::new(None),
        });
        let instancer = Instancer::start(watch(), backend, "http".to_string());
        let monitor = Monitor::start("k".to_string(), instancer.clone(), Duration::ZERO);

        let (tx, mut rx) = mpsc::channel(4);
        monitor.add_listener(tx).await;
        monitor.stop().await;
        monitor.stop().await;

        let event = rx.recv().await.unwrap();
        assert!(event.instances.is_empty());
        assert!(event.error.is_none());
        assert!(rx.try_recv().is_err());

        instancer.stop();
    }
}
