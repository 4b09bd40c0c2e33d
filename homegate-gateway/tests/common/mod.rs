#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use homegate_core::{DeviceId, DeviceKind, DeviceRole};
use homegate_gateway::{DiscoveryConfig, Registry, StaticBrowser};
use homegate_shelly::{ChannelState, Device, DeviceError, DeviceInfo, MockTransport};

/// What the physical device behind a [`FakeDevice`] currently reports.
#[derive(Debug, Default)]
pub struct Line {
    pub on: bool,
    pub power_w: f32,
    pub current_temp_c: f32,
    pub target_temp_c: f32,
    pub valve_pos: f32,
    pub unreachable: bool,
    /// Reject every switch and setpoint command.
    pub reject_commands: bool,
    pub switch_calls: Vec<bool>,
    pub target_calls: Vec<f32>,
}

#[derive(Clone, Default)]
pub struct LineHandle(Arc<Mutex<Line>>);

impl LineHandle {
    pub fn lock(&self) -> MutexGuard<'_, Line> {
        self.0.lock().unwrap()
    }

    pub fn set_power(&self, power_w: f32) {
        self.lock().power_w = power_w;
    }

    pub fn switch_calls(&self) -> Vec<bool> {
        self.lock().switch_calls.clone()
    }

    pub fn target_calls(&self) -> Vec<f32> {
        self.lock().target_calls.clone()
    }
}

/// In-memory device whose live values come from a shared [`Line`].
pub struct FakeDevice {
    info: DeviceInfo,
    state: ChannelState,
    line: LineHandle,
}

impl FakeDevice {
    pub fn new(id: &str, role: DeviceRole, priority: u8) -> (Self, LineHandle) {
        let line = LineHandle::default();
        let device = Self {
            info: DeviceInfo::new(DeviceId::from(id), "10.0.0.1", 0, role, priority),
            state: ChannelState::default(),
            line: line.clone(),
        };
        (device, line)
    }

    /// A device that is already on, as if polled once.
    pub fn running(id: &str, role: DeviceRole, priority: u8, power_w: f32) -> (Self, LineHandle) {
        let (mut device, line) = Self::new(id, role, priority);
        {
            let mut l = line.lock();
            l.on = true;
            l.power_w = power_w;
        }
        device.state.on = true;
        device.state.power_w = power_w;
        device.state.online = true;
        (device, line)
    }

    pub fn trv(id: &str, current: f32, target: f32, valve: f32) -> (Self, LineHandle) {
        let (mut device, line) = Self::new(id, DeviceRole::Trv, 0);
        {
            let mut l = line.lock();
            l.current_temp_c = current;
            l.target_temp_c = target;
            l.valve_pos = valve;
        }
        device.state.current_temp_c = current;
        device.state.target_temp_c = target;
        device.state.valve_pos = valve;
        device.state.online = true;
        (device, line)
    }

    fn switch(&mut self, on: bool) -> Result<(), DeviceError> {
        let mut line = self.line.lock();
        line.switch_calls.push(on);
        if line.reject_commands || line.unreachable {
            return Err(DeviceError::Status(503));
        }
        line.on = on;
        self.state.on = on;
        Ok(())
    }
}

#[async_trait]
impl Device for FakeDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Gen2
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn state(&self) -> &ChannelState {
        &self.state
    }

    async fn turn_on(&mut self) -> Result<(), DeviceError> {
        self.switch(true)
    }

    async fn turn_off(&mut self) -> Result<(), DeviceError> {
        self.switch(false)
    }

    async fn update(&mut self) -> Result<(), DeviceError> {
        let line = self.line.lock();
        if line.unreachable {
            self.state.online = false;
            return Err(DeviceError::Status(504));
        }
        self.state.on = line.on;
        self.state.power_w = line.power_w;
        self.state.current_temp_c = line.current_temp_c;
        self.state.target_temp_c = line.target_temp_c;
        self.state.valve_pos = line.valve_pos;
        self.state.online = true;
        Ok(())
    }

    async fn fetch_metadata(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn set_target_temperature(&mut self, celsius: f32) -> Result<(), DeviceError> {
        let mut line = self.line.lock();
        line.target_calls.push(celsius);
        self.state.target_temp_c = celsius;
        if line.reject_commands {
            return Err(DeviceError::Status(503));
        }
        line.target_temp_c = celsius;
        Ok(())
    }
}

pub const METER: &str = "AABBCC_0";
pub const BOILER: &str = "DDEEFF_0";

/// Registry with no discoverable hosts and polling on every call.
pub fn empty_registry() -> Registry {
    let config = DiscoveryConfig {
        interval_secs: 3600,
        poll_interval_secs: 0,
        ..DiscoveryConfig::default()
    };
    Registry::new(
        Arc::new(MockTransport::new()),
        Box::new(StaticBrowser::default()),
        &config,
    )
}

pub fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
