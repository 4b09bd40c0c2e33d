use std::sync::Arc;

use async_trait::async_trait;
use homegate_core::DeviceKind;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::device::{ChannelState, Device, DeviceError, DeviceInfo, pick_name};
use crate::transport::Transport;
use crate::wire;

#[derive(Debug, Deserialize)]
struct SwitchStatus {
    output: Option<bool>,
    /// Instantaneous active power (W).
    apower: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct SwitchConfig {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SysConfig {
    device: Option<SysDevice>,
}

#[derive(Debug, Deserialize)]
struct SysDevice {
    name: Option<String>,
}

/// JSON-RPC switch channel.
pub struct Gen2Switch {
    info: DeviceInfo,
    state: ChannelState,
    transport: Arc<dyn Transport>,
}

impl Gen2Switch {
    pub fn new(info: DeviceInfo, transport: Arc<dyn Transport>) -> Self {
        Self {
            info,
            state: ChannelState::default(),
            transport,
        }
    }

    async fn call<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<R, DeviceError> {
        wire::call(self.transport.as_ref(), &self.info.address, method, params).await
    }

    async fn switch(&mut self, on: bool) -> Result<(), DeviceError> {
        let params = json!({ "id": self.info.channel, "on": on });
        self.call::<Value>("Switch.Set", params).await?;
        self.state.on = on;
        Ok(())
    }
}

#[async_trait]
impl Device for Gen2Switch {
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
        self.switch(true).await
    }

    async fn turn_off(&mut self) -> Result<(), DeviceError> {
        self.switch(false).await
    }

    async fn update(&mut self) -> Result<(), DeviceError> {
        let params = json!({ "id": self.info.channel });
        match self.call::<SwitchStatus>("Switch.GetStatus", params).await {
            Ok(status) => {
                if let Some(on) = status.output {
                    self.state.on = on;
                }
                self.state.power_w = status.apower.unwrap_or(0.0);
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
        let sys = self.call::<SysConfig>("Sys.GetConfig", Value::Null).await;
        let switch = self
            .call::<SwitchConfig>("Switch.GetConfig", json!({ "id": self.info.channel }))
            .await;

        let device_name = sys
            .as_ref()
            .ok()
            .and_then(|c| c.device.as_ref())
            .and_then(|d| d.name.clone());
        let switch_name = switch.as_ref().ok().and_then(|c| c.name.clone());

        if let Some(name) = pick_name(switch_name, device_name) {
            debug!(device_id = %self.info.id, name, "Fetched device name");
            self.info.name = name;
        }

        match (sys, switch) {
            (Err(_), Err(e)) => Err(e),
            _ => Ok(()),
        }
    }
}
