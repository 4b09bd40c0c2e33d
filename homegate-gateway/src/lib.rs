pub mod api;
pub mod climate;
pub mod config;
pub mod discovery;
pub mod host;
pub mod load;
pub mod orchestrator;
pub mod registry;
pub mod state;

pub use climate::{ClimateController, heat_demand, parse_time_of_day, resolve_schedule};
pub use config::{Config, DiscoveryConfig, HttpConfig, ServerConfig, TimingConfig};
pub use discovery::{DiscoveryError, MdnsBrowser, ServiceBrowser, ServiceRecord, StaticBrowser};
pub use host::{Alarm, BatteryMonitor, Connectivity, LogAlarm, NoBattery, StaticLink, SysfsBattery};
pub use load::{LoadShedder, ShedRecord};
pub use orchestrator::Gateway;
pub use registry::{DeviceConfigs, Registry};
pub use state::{CommandQueue, StateError, StateHandle, StatePublisher};
