use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::SystemTime;

/// Binary admission control: an open/closed flag with a transition timestamp,
/// plus an independently-locked filter set for per-request rejection (§4.4).
///
/// Open/closed state and filters use separate `RwLock`s so a reader of one
/// never blocks on the other.
pub struct Gate {
    state: RwLock<GateState>,
    filters: RwLock<HashMap<String, HashSet<String>>>,
}

#[derive(Clone, Copy)]
struct GateState {
    open: bool,
    since: SystemTime,
}

/// Snapshot of gate state returned by `state()`.
#[derive(Debug, Clone, Copy)]
pub struct GateStatus {
    pub open: bool,
    pub since: SystemTime,
}

/// Recognized filter key for `filterRequest`. Only `partner_id` is currently
/// consulted on the hot path; other keys may be stored via `edit_filters` but
/// are not yet enforced.
pub const FILTER_KEY_PARTNER_ID: &str = "partner_id";

/// Minimal shape of a filterable request: the set of partner IDs it carries.
pub trait Filterable {
    fn partner_ids(&self) -> &[String];
}

impl Gate {
    pub fn new(initially_open: bool) -> Self {
        Self {
            state: RwLock::new(GateState {
                open: initially_open,
                since: SystemTime::now(),
            }),
            filters: RwLock::new(HashMap::new()),
        }
    }

    /// Transition to open. Returns true iff the state actually changed.
    pub fn raise(&self) -> bool {
        let mut state = self.state.write().unwrap();
        if state.open {
            return false;
        }
        state.open = true;
        state.since = SystemTime::now();
        metrics::gauge!("service_gate_open").set(1.0);
        true
    }

    /// Transition to closed. Returns true iff the state actually changed.
    pub fn lower(&self) -> bool {
        let mut state = self.state.write().unwrap();
        if !state.open {
            return false;
        }
        state.open = false;
        state.since = SystemTime::now();
        metrics::gauge!("service_gate_open").set(0.0);
        true
    }

    pub fn open(&self) -> bool {
        self.state.read().unwrap().open
    }

    pub fn state(&self) -> GateStatus {
        let s = self.state.read().unwrap();
        GateStatus {
            open: s.open,
            since: s.since,
        }
    }

    /// Replace (`add=true`) or remove (`add=false`) the value set for `key`.
    pub fn edit_filters(&self, key: &str, values: HashSet<String>, add: bool) {
        let mut filters = self.filters.write().unwrap();
        if add {
            filters.insert(key.to_string(), values);
        } else {
            filters.remove(key);
        }
    }

    pub fn filters_snapshot(&self) -> HashMap<String, HashSet<String>> {
        self.filters.read().unwrap().clone()
    }

    /// Hot-path admission check: true iff the request is allowed under all
    /// configured filters. Only reads locks, never writes.
    pub fn filter_request(&self, req: &dyn Filterable) -> bool {
        let filters = self.filters.read().unwrap();
        if let Some(values) = filters.get(FILTER_KEY_PARTNER_ID) {
            if req.partner_ids().iter().any(|id| values.contains(id)) {
                metrics::counter!("service_gate_filter_rejections_total").increment(1);
                return false;
            }
        }
        true
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Msg(Vec<String>);
    impl Filterable for Msg {
        fn partner_ids(&self) -> &[String] {
            &self.0
        }
    }

    #[test]
    fn raise_and_lower_report_actual_transitions() {
        let gate = Gate::new(false);
        assert!(gate.raise());
        assert!(!gate.raise());
        assert!(gate.lower());
        assert!(!gate.lower());
    }

    #[test]
    fn raise_raise_keeps_first_timestamp() {
        let gate = Gate::new(false);
        assert!(gate.raise());
        let first_since = gate.state().since;
        assert!(!gate.raise());
        assert_eq!(gate.state().since, first_since);
    }

    #[test]
    fn filter_request_rejects_matching_partner_id() {
        let gate = Gate::new(true);
        let mut values = HashSet::new();
        values.insert("blocked-partner".to_string());
        gate.edit_filters(FILTER_KEY_PARTNER_ID, values, true);

        assert!(!gate.filter_request(&Msg(vec!["blocked-partner".to_string()])));
        assert!(gate.filter_request(&Msg(vec!["ok-partner".to_string()])));
    }

    #[test]
    fn edit_filters_remove_clears_key() {
        let gate = Gate::new(true);
        let mut values = HashSet::new();
        values.insert("p1".to_string());
        gate.edit_filters(FILTER_KEY_PARTNER_ID, values, true);
        gate.edit_filters(FILTER_KEY_PARTNER_ID, HashSet::new(), false);
        assert!(gate.filter_request(&Msg(vec!["p1".to_string()])));
    }
}
