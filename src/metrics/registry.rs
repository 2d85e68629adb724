use metrics::{describe_counter, describe_gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`)
/// can be used anywhere in the codebase. The `PrometheusHandle` is retained
/// solely for rendering the `/metrics` admin endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric
    /// descriptions. Must be called once at startup.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install metrics recorder");

        describe_gauge!(
            "service_gate_open",
            Unit::Count,
            "Gate admission state: 1=open 0=closed"
        );
        describe_counter!(
            "service_gate_filter_rejections_total",
            Unit::Count,
            "Requests rejected by the gate's filter set"
        );

        describe_counter!(
            "service_instancer_updates_total",
            Unit::Count,
            "Instancer events published after dedup"
        );
        describe_counter!(
            "service_instancer_errors_total",
            Unit::Count,
            "Instancer backend errors observed"
        );
        describe_gauge!(
            "service_instancer_instances",
            Unit::Count,
            "Current instance count for a watch key"
        );

        describe_counter!(
            "service_monitor_dispatch_total",
            Unit::Count,
            "Events dispatched by a monitor to its listeners"
        );

        describe_counter!(
            "service_ttl_heartbeats_total",
            Unit::Count,
            "TTL heartbeat calls issued"
        );
        describe_counter!(
            "service_ttl_heartbeat_failures_total",
            Unit::Count,
            "TTL heartbeat calls that failed"
        );

        describe_counter!(
            "service_datacenter_watcher_ticks_total",
            Unit::Count,
            "Datacenter watcher reconciliation ticks"
        );
        describe_counter!(
            "service_datacenter_watcher_errors_total",
            Unit::Count,
            "Datacenter watcher backend enumeration errors"
        );

        describe_counter!(
            "service_ring_rebuilds_total",
            Unit::Count,
            "Consistent-hash ring rebuilds triggered by instancer updates"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
