use serde::{Deserialize, Serialize};

fn default_vnodes() -> i64 {
    211
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_consul_address() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_watch_interval_secs() -> u64 {
    300
}

fn default_datacenter_retries() -> u32 {
    10
}

fn default_admin_listen() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_true() -> bool {
    true
}

/// Top-level `Options` value-type for the runtime (§9 "reflect-based config
/// unmarshalling" re-architecture note: explicit fields, defaults supplied
/// at construction rather than derived via reflection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub consul: ConsulConfig,
    #[serde(default)]
    pub ring: RingConfig,
    #[serde(default)]
    pub watches: Vec<WatchConfig>,
    #[serde(default)]
    pub registrations: Vec<RegistrationConfig>,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub datacenter_watcher: DatacenterWatcherConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default = "default_scheme")]
    pub default_scheme: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            consul: ConsulConfig::default(),
            ring: RingConfig::default(),
            watches: Vec::new(),
            registrations: Vec::new(),
            gate: GateConfig::default(),
            datacenter_watcher: DatacenterWatcherConfig::default(),
            admin: AdminConfig::default(),
            default_scheme: default_scheme(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    #[serde(default = "default_consul_address")]
    pub address: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub datacenter: Option<String>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: default_consul_address(),
            token: None,
            datacenter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingConfig {
    #[serde(default = "default_vnodes")]
    pub vnodes: i64,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            vnodes: default_vnodes(),
        }
    }
}

/// One configured watch: `(service, tags, passing-only, datacenter)` (§3 "Watch key").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub service: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub other_tags: Vec<String>,
    #[serde(default)]
    pub passing_only: bool,
    #[serde(default)]
    pub datacenter: Option<String>,
    /// When true, the datacenter watcher (C9) expands this watch across
    /// every currently-active datacenter instead of a single fixed one.
    #[serde(default)]
    pub cross_dc: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub checks: Vec<TtlCheckConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlCheckConfig {
    #[serde(default)]
    pub id: Option<String>,
    /// Duration string parsed by `humantime` (e.g. "30s", "1m"). Validated at
    /// registrar construction (§4.7).
    pub ttl: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_true")]
    pub initially_open: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            initially_open: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatacenterWatcherConfig {
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,
    #[serde(default = "default_datacenter_retries")]
    pub datacenter_retries: u32,
}

impl Default for DatacenterWatcherConfig {
    fn default() -> Self {
        Self {
            watch_interval_secs: default_watch_interval_secs(),
            datacenter_retries: default_datacenter_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_listen")]
    pub listen: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen: default_admin_listen(),
        }
    }
}
