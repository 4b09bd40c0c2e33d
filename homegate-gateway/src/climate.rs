use std::time::{Duration, Instant};

use homegate_core::{ClimateConfig, DeviceRole, SchedulePoint};
use homegate_shelly::Device;
use jiff::Timestamp;
use jiff::tz::TimeZone;
use tracing::{debug, error, info};

use crate::registry::{DeviceConfigs, Registry};

/// Smallest target change worth a network write (°C).
const TARGET_EPSILON: f32 = 0.1;

/// Valve opening above which a room is considered to call for heat (%).
const VALVE_DEMAND_PCT: f32 = 10.0;

/// Minutes since midnight of an `"HH:MM"` string. Without a colon, or with
/// a field out of range, 0.
pub fn parse_time_of_day(time: &str) -> u32 {
    let Some((hours, minutes)) = time.split_once(':') else {
        return 0;
    };
    let hours: u32 = hours.trim().parse().unwrap_or(0);
    let minutes: u32 = minutes.trim().parse().unwrap_or(0);
    if hours > 23 || minutes > 59 {
        return 0;
    }
    hours * 60 + minutes
}

/// Whether two targets differ by no more than [`TARGET_EPSILON`], compared in
/// hundredths of a degree so that an exact 0.1 step counts as equal.
fn same_target(a: f32, b: f32) -> bool {
    ((a - b).abs() * 100.0).round() <= (TARGET_EPSILON * 100.0).round()
}

/// Target temperature in effect at `minute` of the day.
///
/// That is the point with the latest time not after `minute`; before the
/// day's first point, the day's last point still applies.
pub fn resolve_schedule(points: &[SchedulePoint], minute: u32) -> Option<f32> {
    let mut current: Option<(u32, f32)> = None;
    let mut latest: Option<(u32, f32)> = None;

    for point in points {
        let at = parse_time_of_day(&point.time);
        if at <= minute && current.is_none_or(|(best, _)| at > best) {
            current = Some((at, point.temp));
        }
        if latest.is_none_or(|(best, _)| at > best) {
            latest = Some((at, point.temp));
        }
    }

    current.or(latest).map(|(_, temp)| temp)
}

/// Whether any TRV zone asks for heat.
pub fn heat_demand<'a>(devices: impl IntoIterator<Item = &'a dyn Device>, hysteresis: f32) -> bool {
    devices
        .into_iter()
        .filter(|d| d.info().role == DeviceRole::Trv)
        .any(|d| {
            let state = d.state();
            state.valve_pos > VALVE_DEMAND_PCT || state.current_temp_c < state.target_temp_c - hysteresis
        })
}

/// Pushes scheduled room targets to the valves and drives the boiler relay.
pub struct ClimateController {
    interval: Duration,
    last_run: Option<Instant>,
    tz: TimeZone,
}

impl ClimateController {
    pub fn new(interval: Duration, tz: TimeZone) -> Self {
        Self {
            interval,
            last_run: None,
            tz,
        }
    }

    pub async fn update(
        &mut self,
        registry: &mut Registry,
        climate: &ClimateConfig,
        configs: &DeviceConfigs,
        now: Instant,
    ) {
        let interval = self.interval;
        if self
            .last_run
            .is_some_and(|last| now.saturating_duration_since(last) < interval)
        {
            return;
        }
        self.last_run = Some(now);

        if !climate.enabled {
            return;
        }

        let local = Timestamp::now().to_zoned(self.tz.clone());
        let minute = local.hour() as u32 * 60 + local.minute() as u32;
        self.apply(registry, climate, configs, minute).await;
    }

    /// One scheduling and boiler round for the given minute of the day.
    pub async fn apply(
        &self,
        registry: &mut Registry,
        climate: &ClimateConfig,
        configs: &DeviceConfigs,
        minute: u32,
    ) {
        for (id, cfg) in configs {
            if cfg.role != DeviceRole::Trv || !cfg.schedule_enabled || cfg.schedule.is_empty() {
                continue;
            }
            let Some(target) = resolve_schedule(&cfg.schedule, minute) else {
                continue;
            };
            let Some(device) = registry.get_device_mut(id) else {
                continue;
            };

            let known = device.state().target_temp_c;
            if same_target(known, target) {
                continue;
            }
            match device.set_target_temperature(target).await {
                Ok(()) => info!(device_id = %id, from = known, to = target, "Scheduled target applied"),
                Err(e) => error!(device_id = %id, error = %e, "Failed to set target temperature"),
            }
        }

        self.drive_boiler(registry, climate).await;
    }

    async fn drive_boiler(&self, registry: &mut Registry, climate: &ClimateConfig) {
        let want = !climate.summer_mode && heat_demand(registry.all_devices(), climate.hysteresis);

        let boiler_id = &climate.boiler_relay_id;
        let Some(boiler) = registry.get_device_mut(boiler_id) else {
            debug!(device_id = %boiler_id, "Boiler relay not registered");
            return;
        };

        if boiler.state().on == want {
            return;
        }

        let result = if want {
            boiler.turn_on().await
        } else {
            boiler.turn_off().await
        };
        match result {
            Ok(()) => info!(
                device_id = %boiler_id,
                on = want,
                summer_mode = climate.summer_mode,
                "Boiler switched"
            ),
            Err(e) => error!(device_id = %boiler_id, error = %e, "Failed to switch boiler"),
        }
    }
}
