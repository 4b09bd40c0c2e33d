use std::time::{Duration, Instant};

use homegate_core::{DeviceId, DeviceRole, EnergyConfig};
use homegate_shelly::Device;
use tracing::{debug, error, info, warn};

use crate::host::{ALARM_TONE, Alarm};
use crate::registry::Registry;

/// A load the controller switched off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShedRecord {
    pub id: DeviceId,
    pub shed_at: Instant,
}

/// Protects the household circuit by switching loads off while the meter
/// reads above budget, and back on once it has settled.
///
/// Sheds happen one at a time, each after a full cut-off delay of sustained
/// overload. Restores are last-in first-out, one per restore delay, and only
/// while power is below the budget minus the buffer.
pub struct LoadShedder {
    check_interval: Duration,
    last_check: Option<Instant>,
    overloaded: bool,
    overload_started: Option<Instant>,
    /// Only holds devices currently forced off, each at most once.
    shed: Vec<ShedRecord>,
}

impl LoadShedder {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            check_interval,
            last_check: None,
            overloaded: false,
            overload_started: None,
            shed: Vec::new(),
        }
    }

    /// Evaluate if a check interval elapsed since the previous evaluation.
    pub async fn update(
        &mut self,
        registry: &mut Registry,
        energy: &EnergyConfig,
        alarm: &dyn Alarm,
        now: Instant,
    ) {
        let interval = self.check_interval;
        if self
            .last_check
            .is_some_and(|last| now.saturating_duration_since(last) < interval)
        {
            return;
        }
        self.last_check = Some(now);
        self.evaluate(registry, energy, alarm, now).await;
    }

    pub async fn evaluate(
        &mut self,
        registry: &mut Registry,
        energy: &EnergyConfig,
        alarm: &dyn Alarm,
        now: Instant,
    ) {
        let power = registry.total_power(&energy.main_meter_id);

        if power > energy.max_power_w as f32 {
            let started = match self.overload_started {
                Some(started) if self.overloaded => started,
                _ => {
                    warn!(power_w = power, max_power_w = energy.max_power_w, "Overload detected");
                    self.overloaded = true;
                    self.overload_started = Some(now);
                    now
                }
            };

            if energy.alarm_enabled {
                alarm.sound(energy.alarm_freq_hz, ALARM_TONE);
            }

            let cut_off = Duration::from_secs(energy.cut_off_delay_s);
            if now.saturating_duration_since(started) > cut_off && self.shed_one(registry, now).await {
                // Give the meter a full delay to reflect the shed.
                self.overload_started = Some(now);
            }
            return;
        }

        if self.overloaded {
            info!(power_w = power, "Overload cleared");
        }
        self.overloaded = false;
        self.overload_started = None;

        let restore_below = (energy.max_power_w - energy.buffer_power_w) as f32;
        if power < restore_below {
            let restore_delay = Duration::from_secs(energy.restore_delay_s);
            self.restore_one(registry, restore_delay, now).await;
        }
    }

    /// Switch off the highest-priority running load. Returns whether one was shed.
    async fn shed_one(&mut self, registry: &mut Registry, now: Instant) -> bool {
        let Some(id) = self.pick_victim(registry) else {
            debug!("Overloaded but no sheddable load is on");
            return false;
        };
        let Some(device) = registry.get_device_mut(&id) else {
            return false;
        };

        let priority = device.info().priority;
        match device.turn_off().await {
            Ok(()) => {
                warn!(device_id = %id, priority, "Shed load");
                self.shed.push(ShedRecord { id, shed_at: now });
                true
            }
            Err(e) => {
                error!(device_id = %id, error = %e, "Failed to shed load");
                false
            }
        }
    }

    /// Running LOAD with the highest non-zero priority; the first in
    /// identifier order wins a tie.
    fn pick_victim(&self, registry: &Registry) -> Option<DeviceId> {
        registry
            .all_devices()
            .filter(|d| is_sheddable(*d) && !self.is_shed(d.id()))
            .fold(None::<&dyn Device>, |best, d| match best {
                Some(b) if b.info().priority >= d.info().priority => Some(b),
                _ => Some(d),
            })
            .map(|d| d.id().clone())
    }

    async fn restore_one(&mut self, registry: &mut Registry, delay: Duration, now: Instant) {
        let Some(top) = self.shed.last() else {
            return;
        };
        if now.saturating_duration_since(top.shed_at) <= delay {
            return;
        }

        let id = top.id.clone();
        let restored = match registry.get_device_mut(&id) {
            Some(device) => match device.turn_on().await {
                Ok(()) => {
                    info!(device_id = %id, "Restored load");
                    true
                }
                Err(e) => {
                    error!(device_id = %id, error = %e, "Failed to restore load");
                    false
                }
            },
            None => {
                warn!(device_id = %id, "Shed load no longer registered");
                true
            }
        };

        if restored {
            self.shed.pop();
        }
        // Next restore (or the retry) waits out another full delay.
        if let Some(next) = self.shed.last_mut() {
            next.shed_at = now;
        }
    }

    /// Drop `id` from the shed stack once it is switched by hand.
    pub fn forget(&mut self, id: &DeviceId) -> bool {
        let before = self.shed.len();
        self.shed.retain(|record| &record.id != id);
        before != self.shed.len()
    }

    pub fn is_shed(&self, id: &DeviceId) -> bool {
        self.shed.iter().any(|record| &record.id == id)
    }

    pub fn is_overloaded(&self) -> bool {
        self.overloaded
    }

    pub fn shed_records(&self) -> &[ShedRecord] {
        &self.shed
    }
}

fn is_sheddable(device: &dyn Device) -> bool {
    let info = device.info();
    info.role == DeviceRole::Load && info.priority > 0 && device.state().on
}
