//! Request helpers shared by the drivers: plain JSON GETs for Gen1 and the
//! JSON-RPC envelope used by Gen2 devices and BLU gateways.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::DeviceError;
use crate::transport::Transport;

const RPC_REQUEST_ID: u32 = 1;

#[derive(Serialize)]
struct RpcRequest<'a> {
    id: u32,
    method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

pub fn rpc_url(address: &str) -> String {
    format!("http://{address}/rpc")
}

/// Serialize an RPC request body.
pub fn rpc_body(method: &str, params: Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&RpcRequest {
        id: RPC_REQUEST_ID,
        method,
        params,
    })
}

/// GET `url` and decode the body as `T`.
///
/// A non-2xx status and an undecodable body are both errors.
pub async fn get_json<T: DeserializeOwned>(
    transport: &dyn Transport,
    url: &str,
) -> Result<T, DeviceError> {
    let response = transport.get(url).await?;
    if !response.is_success() {
        return Err(DeviceError::Status(response.status));
    }
    Ok(serde_json::from_str(&response.body)?)
}

/// POST an RPC call to `address` and decode its `result` as `R`.
pub async fn call<R: DeserializeOwned>(
    transport: &dyn Transport,
    address: &str,
    method: &str,
    params: Value,
) -> Result<R, DeviceError> {
    let body = rpc_body(method, params)?;
    let response = transport.post(&rpc_url(address), &body).await?;
    if !response.is_success() {
        return Err(DeviceError::Status(response.status));
    }

    let envelope: RpcResponse<R> = serde_json::from_str(&response.body)?;
    if let Some(err) = envelope.error {
        return Err(DeviceError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    envelope.result.ok_or(DeviceError::MissingResult)
}
