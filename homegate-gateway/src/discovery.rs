use std::time::{Duration, Instant};

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::DiscoveryConfig;

/// A host answering a service-directory query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub hostname: String,
    /// `ip` or `ip:port` the host serves HTTP on.
    pub address: String,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("mdns error: {0}")]
    Mdns(#[from] mdns_sd::Error),
    #[error("browse task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Local-network service directory.
#[async_trait]
pub trait ServiceBrowser: Send + Sync + 'static {
    async fn browse(&self) -> Result<Vec<ServiceRecord>, DiscoveryError>;
}

/// Browses mDNS for HTTP hosts.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    service_type: String,
    window: Duration,
}

impl MdnsBrowser {
    pub fn new(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
            service_type: config.service_type.clone(),
            window: Duration::from_secs(config.browse_secs),
        })
    }
}

#[async_trait]
impl ServiceBrowser for MdnsBrowser {
    async fn browse(&self) -> Result<Vec<ServiceRecord>, DiscoveryError> {
        let receiver = self.daemon.browse(&self.service_type)?;
        let window = self.window;

        let records = tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + window;
            let mut records: Vec<ServiceRecord> = Vec::new();

            while let Some(left) = deadline.checked_duration_since(Instant::now()) {
                let Ok(event) = receiver.recv_timeout(left) else {
                    break;
                };
                let ServiceEvent::ServiceResolved(info) = event else {
                    continue;
                };

                let addresses: Vec<String> =
                    info.get_addresses().iter().map(ToString::to_string).collect();
                // Prefer IPv4, devices do not always listen on v6.
                let Some(ip) = addresses
                    .iter()
                    .find(|a| a.contains('.'))
                    .or_else(|| addresses.first())
                else {
                    continue;
                };
                let address = match info.get_port() {
                    0 | 80 => ip.clone(),
                    port => format!("{ip}:{port}"),
                };

                let record = ServiceRecord {
                    hostname: info.get_hostname().trim_end_matches('.').to_owned(),
                    address,
                };
                if !records.contains(&record) {
                    debug!(hostname = %record.hostname, address = %record.address, "Resolved service");
                    records.push(record);
                }
            }
            records
        })
        .await?;

        if let Err(e) = self.daemon.stop_browse(&self.service_type) {
            debug!(error = %e, "Failed to stop browse");
        }

        info!(hosts = records.len(), "mDNS browse complete");
        Ok(records)
    }
}

/// Fixed answer set, for hosts that do not advertise and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticBrowser {
    records: Vec<ServiceRecord>,
}

impl StaticBrowser {
    pub fn new(records: Vec<ServiceRecord>) -> Self {
        Self { records }
    }

    pub fn host(hostname: &str, address: &str) -> ServiceRecord {
        ServiceRecord {
            hostname: hostname.to_owned(),
            address: address.to_owned(),
        }
    }
}

#[async_trait]
impl ServiceBrowser for StaticBrowser {
    async fn browse(&self) -> Result<Vec<ServiceRecord>, DiscoveryError> {
        Ok(self.records.clone())
    }
}
