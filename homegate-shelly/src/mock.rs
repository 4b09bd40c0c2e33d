use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::transport::{HttpResponse, Transport, TransportError};
use crate::wire::rpc_url;

/// A request seen by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRequest {
    Get { url: String },
    Post { url: String, body: String },
}

#[derive(Debug, Clone)]
enum Matcher {
    Get(String),
    Rpc { url: String, method: String },
}

/// Scriptable in-memory transport.
///
/// Responses are matched by URL (GET) or by URL and RPC method (POST). The
/// most recently registered matching route wins, so a test can change a
/// device's answer mid-way. Unmatched requests fail as unreachable. Every
/// request is recorded, matched or not.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<(Matcher, HttpResponse)>>,
    requests: Mutex<Vec<MockRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(&self, url: &str, status: u16, body: &str) {
        lock(&self.routes).push((Matcher::Get(url.to_owned()), HttpResponse::new(status, body)));
    }

    /// Answer `method` on `address` with a successful RPC `result`.
    pub fn on_rpc(&self, address: &str, method: &str, result: Value) {
        let body = json!({ "id": 1, "result": result }).to_string();
        self.on_rpc_response(address, method, 200, &body);
    }

    /// Answer `method` on `address` with a raw status and body.
    pub fn on_rpc_response(&self, address: &str, method: &str, status: u16, body: &str) {
        let matcher = Matcher::Rpc {
            url: rpc_url(address),
            method: method.to_owned(),
        };
        lock(&self.routes).push((matcher, HttpResponse::new(status, body)));
    }

    /// Drop every route of `address`, as if the host went away.
    pub fn take_offline(&self, address: &str) {
        let prefix = format!("http://{address}/");
        lock(&self.routes).retain(|(matcher, _)| match matcher {
            Matcher::Get(url) | Matcher::Rpc { url, .. } => !url.starts_with(&prefix),
        });
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        lock(&self.requests).clone()
    }

    pub fn clear_requests(&self) {
        lock(&self.requests).clear();
    }

    /// Params of every recorded RPC call to `method`, in order.
    pub fn rpc_calls(&self, method: &str) -> Vec<Value> {
        lock(&self.requests)
            .iter()
            .filter_map(|request| match request {
                MockRequest::Post { body, .. } => serde_json::from_str::<Value>(body).ok(),
                MockRequest::Get { .. } => None,
            })
            .filter(|body| body["method"] == method)
            .map(|body| body.get("params").cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn respond(&self, url: &str, rpc_method: Option<&str>) -> Result<HttpResponse, TransportError> {
        let routes = lock(&self.routes);
        routes
            .iter()
            .rev()
            .find(|(matcher, _)| match (matcher, rpc_method) {
                (Matcher::Get(route), None) => route == url,
                (Matcher::Rpc { url: route, method }, Some(called)) => {
                    route == url && method == called
                }
                _ => false,
            })
            .map(|(_, response)| response.clone())
            .ok_or_else(|| TransportError::Unreachable(url.to_owned()))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        lock(&self.requests).push(MockRequest::Get {
            url: url.to_owned(),
        });
        self.respond(url, None)
    }

    async fn post(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError> {
        lock(&self.requests).push(MockRequest::Post {
            url: url.to_owned(),
            body: body.to_owned(),
        });
        let method = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("method").and_then(Value::as_str).map(str::to_owned))
            .unwrap_or_default();
        self.respond(url, Some(&method))
    }
}
