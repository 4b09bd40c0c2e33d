use std::sync::Arc;

use async_trait::async_trait;
use homegate_core::{DeviceId, DeviceKind, DeviceRole};
use thiserror::Error;

use crate::blu_trv::BluTrv;
use crate::gen1::Gen1Relay;
use crate::gen2::Gen2Switch;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("device answered with HTTP {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("rpc response carried no result")]
    MissingResult,
    #[error("response is missing `{0}`")]
    MissingField(&'static str),
    #[error("channel is in roller mode and has no relay")]
    NoRelay,
}

/// Static description of a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    /// Host (and optional port) the device answers on.
    pub address: String,
    /// Relay channel, or thermostat component id for BLU TRVs.
    pub channel: u32,
    pub role: DeviceRole,
    /// 0-100, 0 = never shed.
    pub priority: u8,
    pub name: String,
}

impl DeviceInfo {
    /// The name starts out as the identifier until metadata is fetched.
    pub fn new(
        id: DeviceId,
        address: impl Into<String>,
        channel: u32,
        role: DeviceRole,
        priority: u8,
    ) -> Self {
        let name = id.to_string();
        Self {
            id,
            address: address.into(),
            channel,
            role,
            priority,
            name,
        }
    }
}

/// Last known live values of a channel.
///
/// Values survive failed polls; only `online` drops.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelState {
    pub on: bool,
    pub power_w: f32,
    pub online: bool,
    pub current_temp_c: f32,
    pub target_temp_c: f32,
    /// Valve opening, 0-100 %.
    pub valve_pos: f32,
}

/// Uniform control and polling interface over the device generations.
#[async_trait]
pub trait Device: Send + Sync {
    fn kind(&self) -> DeviceKind;

    fn info(&self) -> &DeviceInfo;

    fn state(&self) -> &ChannelState;

    /// Switch the channel on. Local state changes only once the device accepted.
    async fn turn_on(&mut self) -> Result<(), DeviceError>;

    /// Switch the channel off. Local state changes only once the device accepted.
    async fn turn_off(&mut self) -> Result<(), DeviceError>;

    /// Poll live status. On any failure the device is marked offline and
    /// the previous values are kept.
    async fn update(&mut self) -> Result<(), DeviceError>;

    /// Best-effort retrieval of the display name.
    async fn fetch_metadata(&mut self) -> Result<(), DeviceError>;

    async fn set_target_temperature(&mut self, _celsius: f32) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn set_on(&mut self, on: bool) -> Result<(), DeviceError> {
        if on {
            self.turn_on().await
        } else {
            self.turn_off().await
        }
    }

    fn id(&self) -> &DeviceId {
        &self.info().id
    }
}

/// Build the driver for a channel of the given generation.
pub fn create(kind: DeviceKind, info: DeviceInfo, transport: Arc<dyn Transport>) -> Box<dyn Device> {
    match kind {
        DeviceKind::Gen1 => Box::new(Gen1Relay::new(info, transport)),
        DeviceKind::Gen2 => Box::new(Gen2Switch::new(info, transport)),
        DeviceKind::BluTrv => Box::new(BluTrv::new(info, transport)),
    }
}

/// Prefer a non-empty channel name over a non-empty device name.
pub(crate) fn pick_name(channel: Option<String>, device: Option<String>) -> Option<String> {
    channel
        .filter(|n| !n.is_empty())
        .or_else(|| device.filter(|n| !n.is_empty()))
}
