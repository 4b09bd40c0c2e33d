//! Collaborators provided by the machine the gateway runs on.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use homegate_core::BatteryStatus;
use tracing::{info, warn};

/// Length of one overload beep.
pub const ALARM_TONE: Duration = Duration::from_millis(500);

/// Audible overload alert.
pub trait Alarm: Send + Sync {
    fn sound(&self, freq_hz: u32, duration: Duration);
}

/// Reports the alert in the log.
#[derive(Debug, Default)]
pub struct LogAlarm;

impl Alarm for LogAlarm {
    fn sound(&self, freq_hz: u32, duration: Duration) {
        warn!(freq_hz, duration_ms = duration.as_millis() as u64, "Overload alarm");
    }
}

pub trait BatteryMonitor: Send + Sync {
    fn read(&self) -> BatteryStatus;
}

/// Host without a battery.
#[derive(Debug, Default)]
pub struct NoBattery;

impl BatteryMonitor for NoBattery {
    fn read(&self) -> BatteryStatus {
        BatteryStatus::UNAVAILABLE
    }
}

/// Linux `power_supply` class device, e.g. `/sys/class/power_supply/BAT0`.
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    dir: PathBuf,
}

impl SysfsBattery {
    pub const CLASS_DIR: &'static str = "/sys/class/power_supply";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// First supply of type `Battery` under `class_dir`.
    pub fn detect(class_dir: &Path) -> Option<Self> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(class_dir)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        entries
            .into_iter()
            .find(|dir| read_attr(dir, "type").as_deref() == Some("Battery"))
            .map(Self::new)
    }

    fn int(&self, name: &str) -> Option<i64> {
        read_attr(&self.dir, name)?.parse().ok()
    }
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    std::fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_owned())
}

impl BatteryMonitor for SysfsBattery {
    fn read(&self) -> BatteryStatus {
        let percent = self.int("capacity").map_or(-1, |v| v as i32);
        // sysfs reports micro-units.
        let millivolts = self.int("voltage_now").map_or(-1, |uv| (uv / 1000) as i32);
        let mut milliamps = self.int("current_now").map_or(0, |ua| (ua / 1000) as i32);

        let status = read_attr(&self.dir, "status");
        let charging = match status.as_deref() {
            Some("Charging") => true,
            Some("Discharging") => false,
            _ => milliamps > 0,
        };
        // Drivers disagree on the sign of current_now; normalize to
        // positive while charging.
        if status.as_deref() == Some("Discharging") && milliamps > 0 {
            milliamps = -milliamps;
        }

        BatteryStatus {
            percent,
            millivolts,
            milliamps,
            charging,
        }
    }
}

/// Keeps the host's network link usable. Invoked at the start of every cycle.
pub trait Connectivity: Send + Sync {
    /// Returns whether the link is currently up.
    fn maintain(&self) -> bool;
}

/// A link managed by the operating system.
#[derive(Debug)]
pub struct StaticLink {
    up: AtomicBool,
}

impl StaticLink {
    pub fn new() -> Self {
        Self {
            up: AtomicBool::new(false),
        }
    }
}

impl Default for StaticLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Connectivity for StaticLink {
    fn maintain(&self) -> bool {
        if !self.up.swap(true, Ordering::Relaxed) {
            info!("Network link up");
        }
        true
    }
}
