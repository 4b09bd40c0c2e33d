use std::sync::Arc;

use async_trait::async_trait;
use homegate_core::DeviceKind;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::device::{ChannelState, Device, DeviceError, DeviceInfo, pick_name};
use crate::transport::Transport;
use crate::wire;

/// Body of a Gen1 `GET /status`.
#[derive(Debug, Default, Deserialize)]
pub struct Gen1Status {
    pub mac: Option<String>,
    pub relays: Option<Vec<RelayStatus>>,
    pub meters: Option<Vec<MeterStatus>>,
    /// Three-phase energy meters on EM devices.
    pub emeters: Option<Vec<MeterStatus>>,
    /// Present only while the device runs in shutter (roller) mode.
    pub rollers: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct RelayStatus {
    pub ison: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct MeterStatus {
    pub power: Option<f32>,
}

impl Gen1Status {
    pub fn is_roller(&self) -> bool {
        self.rollers.is_some()
    }

    fn relay_on(&self, channel: usize) -> Option<bool> {
        self.relays.as_ref()?.get(channel)?.ison
    }

    /// Power of `channel`, from `meters` first and then `emeters`.
    fn power(&self, channel: usize) -> Option<f32> {
        let read = |meters: &Option<Vec<MeterStatus>>| meters.as_ref()?.get(channel)?.power;
        read(&self.meters).or_else(|| read(&self.emeters))
    }
}

#[derive(Debug, Deserialize)]
struct Gen1Settings {
    name: Option<String>,
    relays: Option<Vec<RelaySettings>>,
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelaySettings {
    name: Option<String>,
}

/// REST-style relay channel.
pub struct Gen1Relay {
    info: DeviceInfo,
    state: ChannelState,
    /// Cleared while the device reports roller mode.
    has_relay: bool,
    transport: Arc<dyn Transport>,
}

impl Gen1Relay {
    pub fn new(info: DeviceInfo, transport: Arc<dyn Transport>) -> Self {
        Self {
            info,
            state: ChannelState::default(),
            has_relay: true,
            transport,
        }
    }

    pub fn has_relay(&self) -> bool {
        self.has_relay
    }

    async fn switch(&mut self, on: bool) -> Result<(), DeviceError> {
        if !self.has_relay {
            return Err(DeviceError::NoRelay);
        }

        let url = format!(
            "http://{}/relay/{}?turn={}",
            self.info.address,
            self.info.channel,
            if on { "on" } else { "off" }
        );
        let response = self.transport.get(&url).await?;
        if !response.is_success() {
            return Err(DeviceError::Status(response.status));
        }

        self.state.on = on;
        Ok(())
    }

    fn apply(&mut self, status: &Gen1Status) {
        let channel = self.info.channel as usize;

        if status.is_roller() {
            self.has_relay = false;
            self.state.on = false;
            self.state.power_w = status.power(0).unwrap_or(0.0);
            return;
        }

        self.has_relay = true;
        if let Some(on) = status.relay_on(channel) {
            self.state.on = on;
        }
        self.state.power_w = status.power(channel).unwrap_or(0.0);
    }
}

#[async_trait]
impl Device for Gen1Relay {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Gen1
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn state(&self) -> &ChannelState {
        &self.state
    }

    async fn turn_on(&mut self) -> Result<(), DeviceError> {
        self.switch(true).await
    }

    async fn turn_off(&mut self) -> Result<(), DeviceError> {
        self.switch(false).await
    }

    async fn update(&mut self) -> Result<(), DeviceError> {
        let url = format!("http://{}/status", self.info.address);
        match wire::get_json::<Gen1Status>(self.transport.as_ref(), &url).await {
            Ok(status) => {
                self.apply(&status);
                self.state.online = true;
                Ok(())
            }
            Err(e) => {
                self.state.online = false;
                Err(e)
            }
        }
    }

    async fn fetch_metadata(&mut self) -> Result<(), DeviceError> {
        let url = format!("http://{}/settings", self.info.address);
        let settings: Gen1Settings = wire::get_json(self.transport.as_ref(), &url).await?;

        if settings.mode.as_deref() == Some("roller") {
            warn!(
                device_id = %self.info.id,
                "Device is configured in roller mode, relay control is unavailable"
            );
        }

        let channel_name = settings
            .relays
            .and_then(|relays| relays.into_iter().nth(self.info.channel as usize))
            .and_then(|relay| relay.name);
        if let Some(name) = pick_name(channel_name, settings.name) {
            debug!(device_id = %self.info.id, name, "Fetched device name");
            self.info.name = name;
        }
        Ok(())
    }
}
