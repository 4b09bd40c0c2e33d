use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use homegate_core::{DeviceConfig, DeviceId, DeviceKind, DeviceRole};
use homegate_shelly::{DEFAULT_COMPONENT_ID, Device, DeviceInfo, Transport, probe_host};
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::discovery::ServiceBrowser;

pub type DeviceConfigs = BTreeMap<DeviceId, DeviceConfig>;

/// Owns every known device driver, keyed by identifier.
///
/// Iteration is in identifier order. Devices are only ever added or
/// replaced, never removed.
pub struct Registry {
    devices: BTreeMap<DeviceId, Box<dyn Device>>,
    transport: Arc<dyn Transport>,
    browser: Box<dyn ServiceBrowser>,
    name_marker: String,
    discovery_interval: Duration,
    poll_interval: Duration,
    last_discovery: Option<Instant>,
    last_poll: Option<Instant>,
}

impl Registry {
    pub fn new(
        transport: Arc<dyn Transport>,
        browser: Box<dyn ServiceBrowser>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            devices: BTreeMap::new(),
            transport,
            browser,
            name_marker: config.name_marker.to_lowercase(),
            discovery_interval: Duration::from_secs(config.interval_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            last_discovery: None,
            last_poll: None,
        }
    }

    /// Instantiate the configured devices that cannot be discovered.
    pub fn seed_from_config(&mut self, configs: &DeviceConfigs) {
        for (id, cfg) in configs {
            if cfg.kind != Some(DeviceKind::BluTrv) || cfg.ip.is_empty() {
                continue;
            }

            let component = cfg.component_id.unwrap_or(DEFAULT_COMPONENT_ID);
            let info = DeviceInfo::new(id.clone(), cfg.ip.as_str(), component, cfg.role, cfg.priority);
            let device = homegate_shelly::create(DeviceKind::BluTrv, info, Arc::clone(&self.transport));

            info!(device_id = %id, gateway = %cfg.ip, component, "Added configured BLU TRV");
            self.devices.insert(id.clone(), device);
        }
    }

    pub fn insert(&mut self, device: Box<dyn Device>) {
        self.devices.insert(device.id().clone(), device);
    }

    /// Run discovery and polling when due. Returns whether `configs` changed.
    pub async fn update(&mut self, configs: &mut DeviceConfigs, now: Instant) -> bool {
        let mut changed = false;

        if is_due(self.last_discovery, self.discovery_interval, now) {
            self.last_discovery = Some(now);
            changed = self.discover(configs).await;
        }

        if is_due(self.last_poll, self.poll_interval, now) {
            self.last_poll = Some(now);
            self.poll_all().await;
        }

        changed
    }

    /// One discovery round. Returns whether `configs` changed.
    pub async fn discover(&mut self, configs: &mut DeviceConfigs) -> bool {
        let records = match self.browser.browse().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Service discovery failed");
                return false;
            }
        };

        let marker = self.name_marker.clone();
        let mut changed = false;

        for record in records
            .iter()
            .filter(|r| r.hostname.to_lowercase().contains(&marker))
        {
            let probe = match probe_host(self.transport.as_ref(), &record.address).await {
                Ok(probe) => probe,
                Err(e) => {
                    warn!(hostname = %record.hostname, address = %record.address, error = %e, "Skipping host");
                    continue;
                }
            };
            debug!(
                hostname = %record.hostname,
                mac = %probe.mac,
                kind = ?probe.kind,
                channels = probe.channels,
                "Probed host"
            );

            for channel in 0..probe.channels {
                let id = DeviceId::from_parts(&probe.mac, channel);
                changed |= self
                    .adopt(id, probe.kind, &record.address, channel, configs)
                    .await;
            }
        }

        changed
    }

    /// Register a discovered channel unless it is already known at `address`.
    async fn adopt(
        &mut self,
        id: DeviceId,
        kind: DeviceKind,
        address: &str,
        channel: u32,
        configs: &mut DeviceConfigs,
    ) -> bool {
        match self.devices.get(&id) {
            Some(known) if known.info().address == address => return false,
            Some(known) => info!(
                device_id = %id,
                from = %known.info().address,
                to = %address,
                "Device moved, recreating driver"
            ),
            None => {}
        }

        let (role, priority) = configs
            .get(&id)
            .map_or((DeviceRole::Unknown, 0), |cfg| (cfg.role, cfg.priority));
        let info = DeviceInfo::new(id.clone(), address, channel, role, priority);
        let mut device = homegate_shelly::create(kind, info, Arc::clone(&self.transport));
        if let Err(e) = device.fetch_metadata().await {
            debug!(device_id = %id, error = %e, "Metadata unavailable");
        }
        let name = device.info().name.clone();

        info!(device_id = %id, %address, %name, ?role, "Registered device");
        self.devices.insert(id.clone(), device);

        let mut changed = false;
        let cfg = match configs.entry(id) {
            Entry::Vacant(slot) => {
                changed = true;
                slot.insert(DeviceConfig::default())
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };
        if cfg.ip != address {
            cfg.ip = address.to_owned();
            changed = true;
        }
        if cfg.kind != Some(kind) {
            cfg.kind = Some(kind);
            changed = true;
        }
        if cfg.name.is_empty() {
            cfg.name = name;
            changed = true;
        }
        changed
    }

    /// Poll every registered device once.
    pub async fn poll_all(&mut self) {
        for (id, device) in self.devices.iter_mut() {
            let was_online = device.state().online;
            match device.update().await {
                Ok(()) if !was_online => info!(device_id = %id, "Device online"),
                Ok(()) => {}
                Err(e) if was_online => warn!(device_id = %id, error = %e, "Device went offline"),
                Err(e) => debug!(device_id = %id, error = %e, "Device still offline"),
            }
        }
    }

    pub fn get_device(&self, id: &DeviceId) -> Option<&dyn Device> {
        self.devices.get(id).map(|d| &**d)
    }

    pub fn get_device_mut(&mut self, id: &DeviceId) -> Option<&mut Box<dyn Device>> {
        self.devices.get_mut(id)
    }

    pub fn all_devices(&self) -> impl Iterator<Item = &dyn Device> {
        self.devices.values().map(|d| &**d)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Power reported by the household meter; 0 while it is not registered.
    pub fn total_power(&self, meter_id: &DeviceId) -> f32 {
        self.get_device(meter_id).map_or(0.0, |d| d.state().power_w)
    }
}

pub(crate) fn is_due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    last.is_none_or(|last| now.saturating_duration_since(last) >= interval)
}
