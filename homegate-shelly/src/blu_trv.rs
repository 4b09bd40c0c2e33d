use std::sync::Arc;

use async_trait::async_trait;
use homegate_core::DeviceKind;
use serde::Deserialize;
use serde_json::json;

use crate::device::{ChannelState, Device, DeviceError, DeviceInfo};
use crate::transport::Transport;
use crate::wire;

/// Thermostat component the gateway exposes for the first paired valve.
pub const DEFAULT_COMPONENT_ID: u32 = 200;

#[derive(Debug, Deserialize)]
struct ThermostatStatus {
    #[serde(rename = "current_C")]
    current_c: Option<f32>,
    #[serde(rename = "target_C")]
    target_c: Option<f32>,
    /// Valve opening in percent.
    pos: Option<f32>,
}

/// Bluetooth radiator valve driven through a gateway's RPC endpoint.
///
/// `info.address` is the gateway and `info.channel` the thermostat
/// component id on it. The valve has no separate on/off mode.
pub struct BluTrv {
    info: DeviceInfo,
    state: ChannelState,
    transport: Arc<dyn Transport>,
}

impl BluTrv {
    pub fn new(info: DeviceInfo, transport: Arc<dyn Transport>) -> Self {
        Self {
            info,
            state: ChannelState::default(),
            transport,
        }
    }

    fn component_id(&self) -> u32 {
        self.info.channel
    }
}

#[async_trait]
impl Device for BluTrv {
    fn kind(&self) -> DeviceKind {
        DeviceKind::BluTrv
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn state(&self) -> &ChannelState {
        &self.state
    }

    async fn turn_on(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn turn_off(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn update(&mut self) -> Result<(), DeviceError> {
        let params = json!({ "id": self.component_id() });
        let polled = wire::call::<ThermostatStatus>(
            self.transport.as_ref(),
            &self.info.address,
            "Thermostat.GetStatus",
            params,
        )
        .await;

        match polled {
            Ok(status) => {
                if let Some(current) = status.current_c {
                    self.state.current_temp_c = current;
                }
                if let Some(target) = status.target_c {
                    self.state.target_temp_c = target;
                }
                if let Some(pos) = status.pos {
                    self.state.valve_pos = pos;
                }
                self.state.online = true;
                Ok(())
            }
            Err(e) => {
                self.state.online = false;
                Err(e)
            }
        }
    }

    /// Valve names only come from configuration.
    async fn fetch_metadata(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// The new target is stored even if the gateway does not confirm it; the
    /// next poll reconciles.
    async fn set_target_temperature(&mut self, celsius: f32) -> Result<(), DeviceError> {
        self.state.target_temp_c = celsius;
        let params = json!({ "id": self.component_id(), "target_C": celsius });
        wire::call::<serde_json::Value>(
            self.transport.as_ref(),
            &self.info.address,
            "Thermostat.SetTargetTemp",
            params,
        )
        .await?;
        Ok(())
    }
}
