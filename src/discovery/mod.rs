pub mod backend;
pub mod consul;
pub mod datacenter;
pub mod fake;
pub mod instancer;
pub mod monitor;

pub use backend::{Backend, QueryOptions, Registration, ServiceEntry, TreeEntry};
pub use consul::ConsulBackend;
pub use datacenter::{CrossDcWatch, DatacenterWatcher};
pub use fake::FakeBackend;
pub use instancer::{Instancer, InstancerEvent, Watch};
pub use monitor::{Monitor, MonitorStats};
