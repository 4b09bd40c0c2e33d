//! Classification of a freshly discovered host: which generation it speaks,
//! its hardware address and how many channels it exposes.

use homegate_core::DeviceKind;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::device::DeviceError;
use crate::gen1::Gen1Status;
use crate::transport::Transport;
use crate::wire;

/// Body of `GET /shelly`, answered by every generation.
#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    /// Only Gen2+ firmwares report a generation.
    #[serde(rename = "gen")]
    generation: Option<u32>,
    mac: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostProbe {
    pub kind: DeviceKind,
    pub mac: String,
    pub channels: u32,
}

pub async fn probe_host(transport: &dyn Transport, address: &str) -> Result<HostProbe, DeviceError> {
    let identify: IdentifyResponse =
        wire::get_json(transport, &format!("http://{address}/shelly")).await?;

    let kind = match identify.generation {
        Some(generation) if generation >= 2 => DeviceKind::Gen2,
        _ => DeviceKind::Gen1,
    };

    // The legacy status body is needed for Gen1 channel counting anyway and
    // doubles as the MAC fallback.
    let mut status: Option<Gen1Status> = None;
    if kind == DeviceKind::Gen1 || identify.mac.is_none() {
        status = Some(wire::get_json(transport, &format!("http://{address}/status")).await?);
    }

    let mac = identify
        .mac
        .or_else(|| status.as_ref().and_then(|s| s.mac.clone()))
        .filter(|mac| !mac.is_empty())
        .ok_or(DeviceError::MissingField("mac"))?;

    let channels = match kind {
        DeviceKind::Gen2 => {
            let config: Map<String, Value> =
                wire::call(transport, address, "Shelly.GetConfig", Value::Null).await?;
            gen2_channel_count(&config)
        }
        _ => gen1_channel_count(&status.unwrap_or_default()),
    };

    Ok(HostProbe {
        kind,
        mac,
        channels,
    })
}

/// Logical channels of a Gen1 device.
///
/// Roller mode is a single logical channel; energy meters dictate the count
/// on EM devices; otherwise the larger of the relay and meter arrays.
pub fn gen1_channel_count(status: &Gen1Status) -> u32 {
    if status.is_roller() {
        return 1;
    }
    if let Some(emeters) = status.emeters.as_ref().filter(|e| !e.is_empty()) {
        return emeters.len() as u32;
    }

    let relays = status.relays.as_ref().map_or(0, Vec::len);
    let meters = status.meters.as_ref().map_or(0, Vec::len);
    relays.max(meters).max(1) as u32
}

/// Number of `switch:<n>` components in a Gen2 `Shelly.GetConfig` result.
pub fn gen2_channel_count(config: &Map<String, Value>) -> u32 {
    let switches = config.keys().filter(|key| is_switch_component(key)).count();
    switches.max(1) as u32
}

fn is_switch_component(key: &str) -> bool {
    key.strip_prefix("switch:")
        .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}
