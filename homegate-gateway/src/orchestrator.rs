use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use homegate_core::{BatteryStatus, Command, DeviceRecord, SystemSnapshot};
use homegate_shelly::Transport;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::climate::ClimateController;
use crate::config::Config;
use crate::discovery::ServiceBrowser;
use crate::host::{Alarm, BatteryMonitor, Connectivity, LogAlarm, NoBattery, StaticLink};
use crate::load::LoadShedder;
use crate::registry::{self, Registry};
use crate::state::{self, CommandQueue, StateHandle, StatePublisher};

/// The control loop: owns the registry and both controllers, applies queued
/// commands and publishes a snapshot every cycle.
pub struct Gateway {
    config: Config,
    /// Where discovered configuration changes are persisted.
    config_path: Option<PathBuf>,
    registry: Registry,
    shedder: LoadShedder,
    climate: ClimateController,
    commands: CommandQueue,
    publisher: StatePublisher,
    alarm: Box<dyn Alarm>,
    battery: Box<dyn BatteryMonitor>,
    battery_interval: Duration,
    /// Last battery sample, reused between reads.
    battery_status: BatteryStatus,
    last_battery: Option<Instant>,
    link: Box<dyn Connectivity>,
}

impl Gateway {
    /// Assemble a gateway and the handle its readers use.
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        browser: Box<dyn ServiceBrowser>,
    ) -> color_eyre::Result<(Self, StateHandle)> {
        let tz = config.time_zone()?;
        let timing = &config.timing;

        let mut registry = Registry::new(transport, browser, &config.discovery);
        registry.seed_from_config(&config.devices);

        let (publisher, handle, commands) = state::channel(
            config.energy.max_power_w,
            Duration::from_millis(timing.lock_wait_ms),
        );

        let battery_interval = Duration::from_secs(timing.battery_interval_secs);
        let gateway = Self {
            shedder: LoadShedder::new(Duration::from_millis(timing.load_check_ms)),
            climate: ClimateController::new(Duration::from_secs(timing.climate_interval_secs), tz),
            config,
            config_path: None,
            registry,
            commands,
            publisher,
            alarm: Box::new(LogAlarm),
            battery: Box::new(NoBattery),
            battery_interval,
            battery_status: BatteryStatus::UNAVAILABLE,
            last_battery: None,
            link: Box::new(StaticLink::new()),
        };
        Ok((gateway, handle))
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_alarm(mut self, alarm: Box<dyn Alarm>) -> Self {
        self.alarm = alarm;
        self
    }

    pub fn with_battery(mut self, battery: Box<dyn BatteryMonitor>) -> Self {
        self.battery = battery;
        self.last_battery = None;
        self
    }

    pub fn with_connectivity(mut self, link: Box<dyn Connectivity>) -> Self {
        self.link = link;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn shedder(&self) -> &LoadShedder {
        &self.shedder
    }

    /// Run cycles until `cancel` fires. A cycle in progress always completes.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.timing.cycle_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            cycle_ms = self.config.timing.cycle_ms,
            devices = self.registry.len(),
            "Control loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Control loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.cycle(Instant::now()).await;
                }
            }
        }
    }

    /// One pass: link upkeep, registry, commands, load shedding, climate,
    /// battery sample, publish.
    pub async fn cycle(&mut self, now: Instant) {
        if !self.link.maintain() {
            warn!("Network link down");
        }

        if self.registry.update(&mut self.config.devices, now).await {
            self.persist_config();
        }

        self.apply_commands().await;

        self.shedder
            .update(&mut self.registry, &self.config.energy, self.alarm.as_ref(), now)
            .await;
        self.climate
            .update(&mut self.registry, &self.config.climate, &self.config.devices, now)
            .await;

        if registry::is_due(self.last_battery, self.battery_interval, now) {
            self.last_battery = Some(now);
            self.battery_status = self.battery.read();
        }

        let snapshot = self.snapshot();
        self.publisher.publish(snapshot).await;
    }

    async fn apply_commands(&mut self) {
        for command in self.commands.drain() {
            let id = command.device_id().clone();
            let Some(device) = self.registry.get_device_mut(&id) else {
                warn!(device_id = %id, "Command for unknown device dropped");
                continue;
            };

            match command {
                Command::SetDeviceState { on, .. } => match device.set_on(on).await {
                    Ok(()) => {
                        info!(device_id = %id, on, "Switched on request");
                        // Manual control ends the controller's claim on the load.
                        if self.shedder.forget(&id) {
                            info!(device_id = %id, "Removed from shed loads");
                        }
                    }
                    Err(e) => error!(device_id = %id, on, error = %e, "Failed to switch device"),
                },
                Command::SetTargetTemperature { celsius, .. } => {
                    match device.set_target_temperature(celsius).await {
                        Ok(()) => info!(device_id = %id, celsius, "Target temperature set on request"),
                        Err(e) => error!(device_id = %id, celsius, error = %e, "Failed to set target temperature"),
                    }
                }
            }
        }
    }

    fn persist_config(&self) {
        let Some(path) = &self.config_path else {
            return;
        };
        match self.config.save(path) {
            Ok(()) => info!(path = %path.display(), "Configuration saved"),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to save configuration"),
        }
    }

    /// Build the snapshot of the current cycle.
    pub fn snapshot(&self) -> SystemSnapshot {
        let energy = &self.config.energy;

        let devices = self
            .registry
            .all_devices()
            .map(|device| {
                let info = device.info();
                let state = device.state();
                let cfg = self.config.devices.get(&info.id);
                let name = cfg
                    .map(|c| c.name.as_str())
                    .filter(|name| !name.is_empty())
                    .unwrap_or(&info.name);

                DeviceRecord {
                    id: info.id.clone(),
                    name: name.to_owned(),
                    room: cfg.map(|c| c.room.clone()).unwrap_or_default(),
                    on: state.on,
                    power_w: state.power_w,
                    online: state.online,
                    role: info.role,
                    current_temp_c: state.current_temp_c,
                    target_temp_c: state.target_temp_c,
                    valve_pos: state.valve_pos,
                }
            })
            .collect();

        SystemSnapshot {
            total_power_w: self.registry.total_power(&energy.main_meter_id),
            alarm_active: self.shedder.is_overloaded() && energy.alarm_enabled,
            boiler_on: self
                .registry
                .get_device(&self.config.climate.boiler_relay_id)
                .is_some_and(|boiler| boiler.state().on),
            battery: self.battery_status,
            devices,
        }
    }
}
