use std::fmt;

use serde::{Deserialize, Serialize};

// Identifiers and labels never grow after construction, so they are kept
// as `Box<str>` rather than `String`.
type BoxStr = Box<str>;

/// Stable identifier of one controllable channel: `<MAC>_<channel-index>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub BoxStr);

impl DeviceId {
    /// Compose the identifier of `channel` on the device with hardware address `mac`.
    ///
    /// The MAC is normalized to upper-case hex without separators, so Gen1
    /// (`a4:cf:12:..`) and Gen2 (`A4CF12..`) spellings of the same address
    /// produce the same identifier.
    pub fn from_parts(mac: &str, channel: u32) -> Self {
        let mac: String = mac
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self(format!("{mac}_{channel}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value.into_boxed_str())
    }
}

/// What a channel represents in the household.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceRole {
    /// A sheddable appliance or circuit.
    Load,
    /// A room's thermostatic valve / heating zone.
    Trv,
    #[default]
    Unknown,
}

/// Wire dialect spoken by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// REST-style relay (`/relay/{n}`, `/status`, `/settings`).
    Gen1,
    /// JSON-RPC relay (`POST /rpc`).
    Gen2,
    /// Bluetooth radiator valve reached through a gateway's `/rpc`.
    BluTrv,
}

/// One step of a daily heating schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulePoint {
    /// Time of day, `"HH:MM"`.
    pub time: String,
    /// Target temperature in °C from `time` onwards.
    pub temp: f32,
}

/// Persisted, user-editable settings of one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Display name. Filled from the device on first discovery when empty.
    pub name: String,
    /// Room label shown next to the device.
    pub room: String,
    /// Shedding priority, 0-100. 0 means never shed; higher is shed first.
    pub priority: u8,
    pub role: DeviceRole,
    pub schedule_enabled: bool,
    pub schedule: Vec<SchedulePoint>,
    /// Last address the device was seen at.
    pub ip: String,
    /// Wire dialect, when known. Required for devices that cannot be discovered.
    pub kind: Option<DeviceKind>,
    /// Thermostat component on the gateway (BLU TRV only).
    pub component_id: Option<u32>,
}

/// Capacity settings of the protected circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    /// Power budget of the circuit (W).
    pub max_power_w: i32,
    /// Hysteresis below the budget before anything is restored (W).
    pub buffer_power_w: i32,
    /// How long an overload must persist before a load is shed.
    pub cut_off_delay_s: u64,
    /// How long power must stay low before a shed load is restored.
    pub restore_delay_s: u64,
    pub alarm_enabled: bool,
    pub alarm_freq_hz: u32,
    /// Channel metering the whole house.
    pub main_meter_id: DeviceId,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            max_power_w: 3300,
            buffer_power_w: 200,
            cut_off_delay_s: 10,
            restore_delay_s: 60,
            alarm_enabled: true,
            alarm_freq_hz: 2000,
            main_meter_id: DeviceId::from("AABBCC_0"),
        }
    }
}

/// Central heating settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateConfig {
    pub enabled: bool,
    /// Keeps the boiler off regardless of demand.
    pub summer_mode: bool,
    pub global_setpoint: f32,
    /// Degrees below target before a room asks for heat.
    pub hysteresis: f32,
    /// Relay channel driving the boiler.
    pub boiler_relay_id: DeviceId,
}

impl Default for ClimateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            summer_mode: false,
            global_setpoint: 21.0,
            hysteresis: 0.5,
            boiler_relay_id: DeviceId::from("DDEEFF_0"),
        }
    }
}

/// Battery telemetry of the host running the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryStatus {
    /// Charge level 0-100, or -1 when unavailable.
    pub percent: i32,
    /// Voltage in millivolts, or -1 when unavailable.
    pub millivolts: i32,
    /// Current in milliamps; positive while charging.
    pub milliamps: i32,
    pub charging: bool,
}

impl BatteryStatus {
    pub const UNAVAILABLE: Self = Self {
        percent: -1,
        millivolts: -1,
        milliamps: 0,
        charging: false,
    };
}

impl Default for BatteryStatus {
    fn default() -> Self {
        Self::UNAVAILABLE
    }
}

/// Per-channel view published to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub room: String,
    pub on: bool,
    pub power_w: f32,
    pub online: bool,
    pub role: DeviceRole,
    pub current_temp_c: f32,
    pub target_temp_c: f32,
    /// Valve opening, 0-100 %.
    pub valve_pos: f32,
}

/// Point-in-time copy of the whole system, rebuilt every cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Reading of the household meter (W).
    pub total_power_w: f32,
    pub alarm_active: bool,
    pub boiler_on: bool,
    pub battery: BatteryStatus,
    pub devices: Vec<DeviceRecord>,
}

/// A device action requested from outside the control loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    SetDeviceState { id: DeviceId, on: bool },
    SetTargetTemperature { id: DeviceId, celsius: f32 },
}

impl Command {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            Command::SetDeviceState { id, .. } | Command::SetTargetTemperature { id, .. } => id,
        }
    }
}
