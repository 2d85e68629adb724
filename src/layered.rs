use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::accessor::{AccessResult, Accessor};
use crate::error::{ErrorChain, ServiceError};

/// Validates that traffic to a selected instance is currently allowed.
/// Implementations must not re-enter the accessor that invoked them (§5).
pub trait Router: Send + Sync {
    fn route(&self, instance: &str) -> Result<(), String>;
}

/// Orders failover datacenter names for a lookup.
pub trait Chooser: Send + Sync {
    fn choose(&self, names: &[String]) -> Vec<String>;
}

/// Chooser that preserves a fixed preference order over whatever subset of
/// datacenters is currently registered as a failover.
pub struct PreferenceChooser {
    order: Vec<String>,
}

impl PreferenceChooser {
    pub fn new(order: Vec<String>) -> Self {
        Self { order }
    }
}

impl Chooser for PreferenceChooser {
    fn choose(&self, names: &[String]) -> Vec<String> {
        let mut ordered: Vec<String> = self
            .order
            .iter()
            .filter(|n| names.contains(n))
            .cloned()
            .collect();
        for n in names {
            if !ordered.contains(n) {
                ordered.push(n.clone());
            }
        }
        ordered
    }
}

struct LayeredState {
    primary: Accessor,
    primary_err: Option<ServiceError>,
    failovers: HashMap<String, (Accessor, Option<ServiceError>)>,
    router: Option<Arc<dyn Router>>,
    chooser: Option<Arc<dyn Chooser>>,
}

/// Composes a primary accessor with named failover accessors, a route
/// validator, and a failover ordering (§4.6, C10).
pub struct LayeredAccessor {
    state: RwLock<LayeredState>,
}

impl LayeredAccessor {
    pub fn new(primary: Accessor) -> Self {
        Self {
            state: RwLock::new(LayeredState {
                primary,
                primary_err: None,
                failovers: HashMap::new(),
                router: None,
                chooser: None,
            }),
        }
    }

    pub fn get(&self, key: &[u8]) -> AccessResult {
        let state = self.state.read().unwrap();
        let mut chain: Option<ErrorChain> = None;
        let mut candidate = String::new();

        let push = |chain: &mut Option<ErrorChain>, msg: String| {
            *chain = Some(match chain.take() {
                Some(c) => c.wrap(msg),
                None => ErrorChain::new(msg),
            });
        };

        let mut go_to_failover = false;

        if let Some(err) = &state.primary_err {
            push(&mut chain, err.to_string());
            go_to_failover = true;
        } else {
            let res = state.primary.get(key);
            if let Some(err) = &res.error {
                candidate = res.instance.clone();
                push(&mut chain, err.to_string());
                go_to_failover = true;
            } else {
                candidate = res.instance;
                match &state.router {
                    None => {
                        push(&mut chain, ServiceError::NoRouter.to_string());
                        // No router to validate against: report success as-is,
                        // the NoRouter note travels in the chain but is not fatal.
                        return AccessResult::with_instance_and_error(
                            candidate.clone(),
                            ServiceError::RouteError {
                                instance: candidate,
                                chain: Box::new(chain.unwrap()),
                            },
                        );
                    }
                    Some(router) => match router.route(&candidate) {
                        Ok(()) => return AccessResult::ok(candidate),
                        Err(route_err) => {
                            push(&mut chain, route_err);
                            go_to_failover = true;
                        }
                    },
                }
            }
        }

        debug_assert!(go_to_failover);
        if state.failovers.is_empty() {
            push(&mut chain, ServiceError::NoFailovers.to_string());
            return AccessResult::with_instance_and_error(
                String::new(),
                ServiceError::RouteError {
                    instance: String::new(),
                    chain: Box::new(chain.unwrap()),
                },
            );
        }

        let names: Vec<String> = state.failovers.keys().cloned().collect();
        let ordered = match &state.chooser {
            Some(chooser) => chooser.choose(&names),
            None => names,
        };

        for dc in ordered {
            let Some((accessor, _)) = state.failovers.get(&dc) else {
                continue;
            };
            let res = accessor.get(key);
            if res.error.is_some() {
                continue;
            }
            let accepted = match &state.router {
                None => true,
                Some(router) => router.route(&res.instance).is_ok(),
            };
            if accepted {
                return AccessResult::with_instance_and_error(
                    res.instance.clone(),
                    ServiceError::RouteError {
                        instance: res.instance,
                        chain: Box::new(chain.clone().unwrap()),
                    },
                );
            }
        }

        push(&mut chain, ServiceError::FailoversFailed.to_string());
        AccessResult::with_instance_and_error(
            String::new(),
            ServiceError::RouteError {
                instance: String::new(),
                chain: Box::new(chain.unwrap()),
            },
        )
    }

    pub fn set_primary(&self, a: Accessor) {
        self.state.write().unwrap().primary = a;
    }

    pub fn set_error(&self, e: ServiceError) {
        self.state.write().unwrap().primary_err = Some(e);
    }

    pub fn update_primary(&self, a: Accessor, e: Option<ServiceError>) {
        let mut state = self.state.write().unwrap();
        state.primary = a;
        state.primary_err = e;
    }

    pub fn update_failover(&self, dc: impl Into<String>, a: Accessor, e: Option<ServiceError>) {
        self.state
            .write()
            .unwrap()
            .failovers
            .insert(dc.into(), (a, e));
    }

    pub fn set_router(&self, router: Arc<dyn Router>) {
        self.state.write().unwrap().router = Some(router);
    }

    pub fn set_chooser(&self, chooser: Arc<dyn Chooser>) {
        self.state.write().unwrap().chooser = Some(chooser);
    }
}
