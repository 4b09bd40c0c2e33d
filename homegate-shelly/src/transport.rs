use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

/// Status line and body of an HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no response from {0}")]
    Unreachable(String),
}

/// Minimal HTTP client the device drivers speak through.
///
/// Every request is bounded by the implementation's own timeout; callers
/// never wait on a device longer than that.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;

    async fn post(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError>;
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// `reqwest`-backed transport used against real devices.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn read(response: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self.client.get(url).send().await?;
        Self::read(response).await
    }

    async fn post(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_owned())
            .send()
            .await?;
        Self::read(response).await
    }
}
