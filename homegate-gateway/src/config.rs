use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::WrapErr;
use homegate_core::{ClimateConfig, DeviceConfig, DeviceId, EnergyConfig};
use jiff::tz::TimeZone;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IANA zone used for heating schedules. The system zone when unset.
    pub timezone: Option<String>,
    /// Log filter directive used when `RUST_LOG` is not set.
    pub log_level: Option<String>,
    pub server: ServerConfig,
    pub http: HttpConfig,
    pub discovery: DiscoveryConfig,
    pub timing: TimingConfig,
    pub energy: EnergyConfig,
    pub climate: ClimateConfig,
    pub devices: BTreeMap<DeviceId, DeviceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address for the HTTP API to listen on
    pub http_addr: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Upper bound for a single device request
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub service_type: String,
    /// Only hosts whose name contains this marker are probed.
    pub name_marker: String,
    /// How long one mDNS browse collects answers
    pub browse_secs: u64,
    pub interval_secs: u64,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Orchestration cadence
    pub cycle_ms: u64,
    pub load_check_ms: u64,
    pub climate_interval_secs: u64,
    /// How often the host battery is sampled
    pub battery_interval_secs: u64,
    /// Bounded wait on the snapshot lock, for both writer and readers
    pub lock_wait_ms: u64,
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .wrap_err_with(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Write the configuration, replacing the file atomically.
    pub fn save(&self, path: &Path) -> color_eyre::Result<()> {
        let content = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content).wrap_err_with(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).wrap_err_with(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    pub fn time_zone(&self) -> color_eyre::Result<TimeZone> {
        match self.timezone.as_deref() {
            Some(name) => TimeZone::get(name).wrap_err_with(|| format!("unknown timezone {name}")),
            None => Ok(TimeZone::system()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: None,
            log_level: None,
            server: ServerConfig::default(),
            http: HttpConfig::default(),
            discovery: DiscoveryConfig::default(),
            timing: TimingConfig::default(),
            energy: EnergyConfig::default(),
            climate: ClimateConfig::default(),
            devices: BTreeMap::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_ms: 2000 }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: "_http._tcp.local.".to_owned(),
            name_marker: "shelly".to_owned(),
            browse_secs: 3,
            interval_secs: 60,
            poll_interval_secs: 5,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            cycle_ms: 50,
            load_check_ms: 250,
            climate_interval_secs: 10,
            battery_interval_secs: 30,
            lock_wait_ms: 100,
        }
    }
}
