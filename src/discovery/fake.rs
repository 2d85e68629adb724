use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::discovery::backend::{Backend, QueryOptions, Registration, ServiceEntry, TreeEntry};
use crate::error::ServiceError;

struct WatchState {
    entries: Vec<ServiceEntry>,
    index: u64,
    error: Option<ServiceError>,
}

/// In-memory [`Backend`] for tests (§10.6): no network, no vendor wire
/// format, just a programmable set of services and datacenters.
pub struct FakeBackend {
    services: Mutex<HashMap<String, WatchState>>,
    datacenters: Mutex<Vec<String>>,
    registrations: Mutex<HashMap<String, Registration>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            datacenters: Mutex::new(Vec::new()),
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Publish a new entry set for a service, bumping its index so any
    /// outstanding long-poll sees the change.
    pub fn set_service(&self, name: &str, entries: Vec<ServiceEntry>) {
        let mut services = self.services.lock().unwrap();
        let state = services.entry(name.to_string()).or_insert(WatchState {
            entries: Vec::new(),
            index: 0,
            error: None,
        });
        state.entries = entries;
        state.index += 1;
        state.error = None;
    }

    pub fn fail_service(&self, name: &str, error: ServiceError) {
        let mut services = self.services.lock().unwrap();
        let state = services.entry(name.to_string()).or_insert(WatchState {
            entries: Vec::new(),
            index: 0,
            error: None,
        });
        state.error = Some(error);
    }

    pub fn set_datacenters(&self, dcs: Vec<String>) {
        *self.datacenters.lock().unwrap() = dcs;
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.registrations.lock().unwrap().contains_key(id)
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn service(
        &self,
        name: &str,
        _tag: Option<&str>,
        _passing_only: bool,
        opts: &QueryOptions,
    ) -> Result<(Vec<ServiceEntry>, u64), ServiceError> {
        // Poll instead of blocking indefinitely: tests drive state changes
        // from the same task, so a tight poll keeps things deterministic
        // without a separate notification channel.
        loop {
            {
                let services = self.services.lock().unwrap();
                if let Some(state) = services.get(name) {
                    if let Some(err) = &state.error {
                        return Err(err.clone());
                    }
                    if state.index != opts.wait_index {
                        return Ok((state.entries.clone(), state.index));
                    }
                } else if opts.wait_index == 0 {
                    return Ok((Vec::new(), 0));
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    async fn datacenters(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.datacenters.lock().unwrap().clone())
    }

    async fn register(&self, reg: &Registration) -> Result<(), ServiceError> {
        self.registrations
            .lock()
            .unwrap()
            .insert(reg.id.clone(), reg.clone());
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), ServiceError> {
        self.registrations.lock().unwrap().remove(id);
        Ok(())
    }

    async fn update_ttl(&self, _check_id: &str, _output: &str, _passing: bool) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn entries(&self, _path: &str) -> Result<Vec<TreeEntry>, ServiceError> {
        Ok(Vec::new())
    }
}
