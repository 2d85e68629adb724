use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::Engine as _;
use rand::RngCore;
use tokio::sync::Notify;

use crate::config::TtlCheckConfig;
use crate::discovery::backend::{Backend, Registration};
use crate::error::ServiceError;

fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

struct TtlCheck {
    check_id: String,
    ttl: std::time::Duration,
    notes: String,
    stopped: Arc<AtomicBool>,
    stop: Arc<Notify>,
}

/// Self-advertisement with TTL heartbeats (§4.7, C8). One background task
/// per check, ticking at `TTL/2`.
pub struct Registrar {
    registration: Registration,
    backend: Arc<dyn Backend>,
    checks: Vec<TtlCheck>,
    registered: AtomicBool,
}

impl Registrar {
    /// Builds a registrar for one service registration. Fails at
    /// construction if any TTL is malformed or not a positive duration
    /// (§4.7 "Validation").
    pub fn new(
        backend: Arc<dyn Backend>,
        name: String,
        mut id: Option<String>,
        address: String,
        port: u16,
        tags: Vec<String>,
        ttl_checks: &[TtlCheckConfig],
    ) -> Result<Self, ServiceError> {
        if name.is_empty() {
            return Err(ServiceError::Config("registration name is empty".to_string()));
        }
        if id.is_none() {
            id = Some(random_id());
        }

        let mut checks = Vec::with_capacity(ttl_checks.len());
        let mut check_ids = Vec::with_capacity(ttl_checks.len());
        for raw in ttl_checks {
            let ttl = humantime::parse_duration(&raw.ttl)
                .map_err(|e| ServiceError::Config(format!("invalid ttl {:?}: {e}", raw.ttl)))?;
            if ttl.is_zero() {
                return Err(ServiceError::Config("ttl must be positive".to_string()));
            }
            let check_id = raw.id.clone().unwrap_or_else(random_id);
            check_ids.push(check_id.clone());
            checks.push(TtlCheck {
                check_id,
                ttl,
                notes: raw.notes.clone().unwrap_or_default(),
                stopped: Arc::new(AtomicBool::new(false)),
                stop: Arc::new(Notify::new()),
            });
        }

        let registration = Registration {
            id: id.unwrap(),
            name,
            address,
            port,
            tags,
            check_ids,
        };

        Ok(Self {
            registration,
            backend,
            checks,
            registered: AtomicBool::new(false),
        })
    }

    pub fn instance_key(&self) -> String {
        format!("{}:{}", self.registration.address, self.registration.port)
    }

    /// Register the service and start one heartbeat task per TTL check.
    /// Idempotent: a second call while already registered is a no-op
    /// (§4.7).
    pub async fn register(self: &Arc<Self>) -> Result<(), ServiceError> {
        if self.registered.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.register(&self.registration).await?;

        for check in &self.checks {
            let backend = self.backend.clone();
            let check_id = check.check_id.clone();
            let notes = check.notes.clone();
            let ttl = check.ttl / 2;
            let ttl = if ttl.is_zero() { check.ttl } else { ttl };
            let stopped = check.stopped.clone();
            let stop = check.stop.clone();

            tokio::spawn(async move {
                heartbeat_loop(backend, check_id, notes, ttl, stopped, stop).await;
            });
        }
        Ok(())
    }

    /// Stop all TTL tasks (each performs a final failing heartbeat) and
    /// deregister. Idempotent.
    pub async fn deregister(self: &Arc<Self>) -> Result<(), ServiceError> {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for check in &self.checks {
            check.stopped.store(true, Ordering::SeqCst);
            check.stop.notify_waiters();
        }
        self.backend.deregister(&self.registration.id).await
    }
}

async fn heartbeat_loop(
    backend: Arc<dyn Backend>,
    check_id: String,
    notes: String,
    interval: std::time::Duration,
    stopped: Arc<AtomicBool>,
    stop: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut was_failing = false;

    loop {
        tokio::select! {
            _ = stop.notified() => break,
            _ = ticker.tick() => {
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                metrics::counter!("service_ttl_heartbeats_total").increment(1);
                match backend.update_ttl(&check_id, &notes, true).await {
                    Ok(()) => {
                        if was_failing {
                            tracing::info!(check_id, "ttl check recovered");
                        }
                        was_failing = false;
                    }
                    Err(err) => {
                        metrics::counter!("service_ttl_heartbeat_failures_total").increment(1);
                        if !was_failing {
                            tracing::warn!(check_id, %err, "ttl heartbeat failing");
                        }
                        was_failing = true;
                    }
                }
            }
        }
    }

    let _ = backend.update_ttl(&check_id, &notes, false).await;
}
