//! Device discovery
//!
//! The node's directory service is the primary source of devices. When it
//! cannot be reached, a [`DeviceScanner`] that talks to the devices directly
//! is consulted instead.

use crate::device::{parse_device_listing, DeviceDescriptor};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Where the device list of a cycle came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Directory,
    Scanner,
    Failed,
}

#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn devices(&self) -> Result<Vec<DeviceDescriptor>>;
}

/// Fallback discovery talking to devices directly
#[async_trait]
pub trait DeviceScanner: Send + Sync {
    /// Begin scanning; returns `true` only on the call that started it
    async fn start(&self) -> bool;

    async fn get_all_devices_info(&self) -> Result<BTreeMap<String, DeviceDescriptor>>;

    async fn stop(&self) {}
}

/// `GET http://<node>/devices` on the node's web service
pub struct NodeDirectory {
    client: reqwest::Client,
    url: String,
}

impl NodeDirectory {
    pub fn new(node_address: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base = if node_address.starts_with("http://") || node_address.starts_with("https://") {
            node_address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", node_address.trim_end_matches('/'))
        };

        Ok(Self {
            client,
            url: format!("{base}/devices"),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeviceDirectory for NodeDirectory {
    async fn devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let payload: serde_json::Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BackupError::DirectoryUnavailable(e.to_string()))?
            .json()
            .await?;

        let devices = parse_device_listing(payload)?;
        debug!(url = %self.url, count = devices.len(), "Device directory answered");
        Ok(devices)
    }
}

#[derive(Debug, Deserialize)]
struct IdPage {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct DataPage {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    backup_filename: Option<String>,
}

/// Scanner probing a fixed list of hosts on the device web port.
///
/// Each round asks `/id` then `/data/<id>` of every host and keeps the
/// latest answer per device id.
pub struct ProbeScanner {
    hosts: Vec<String>,
    port: u16,
    interval: Duration,
    client: reqwest::Client,
    found: Arc<Mutex<BTreeMap<String, DeviceDescriptor>>>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl ProbeScanner {
    pub fn new(hosts: Vec<String>, port: u16, timeout: Duration) -> Result<Self> {
        Ok(Self {
            hosts,
            port,
            interval: Duration::from_secs(60),
            client: reqwest::Client::builder().timeout(timeout).build()?,
            found: Arc::new(Mutex::new(BTreeMap::new())),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    async fn probe(client: &reqwest::Client, host: &str, port: u16) -> Result<DeviceDescriptor> {
        let base = format!("http://{host}:{port}");
        let id: IdPage = client
            .get(format!("{base}/id"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let data: DataPage = match client.get(format!("{base}/data/{}", id.id)).send().await {
            Ok(response) => response.error_for_status()?.json().await?,
            Err(_) => DataPage {
                status: Some("busy".to_string()),
                ..DataPage::default()
            },
        };

        let name = data.name.unwrap_or_default();
        let backup_path = data
            .backup_filename
            .as_deref()
            .and_then(|file| backup_path_from_filename(&name, file));

        Ok(DeviceDescriptor {
            id: id.id,
            name,
            ip: host.to_string(),
            status: data.status.unwrap_or_else(|| "unknown".to_string()),
            backup_path,
        })
    }
}

#[async_trait]
impl DeviceScanner for ProbeScanner {
    async fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!(hosts = self.hosts.len(), "Starting device probe scanner");
        let hosts = self.hosts.clone();
        let port = self.port;
        let interval = self.interval;
        let client = self.client.clone();
        let found = Arc::clone(&self.found);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                for host in &hosts {
                    match Self::probe(&client, host, port).await {
                        Ok(device) => {
                            if let Ok(mut guard) = found.lock() {
                                guard.insert(device.id.clone(), device);
                            }
                        },
                        Err(e) => debug!(host = %host, error = %e, "Probe failed"),
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {},
                }
            }
        });

        true
    }

    async fn get_all_devices_info(&self) -> Result<BTreeMap<String, DeviceDescriptor>> {
        self.found
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| BackupError::DirectoryUnavailable("scanner state poisoned".into()))
    }

    async fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Mirror location for a device backup file named `<date>_<time>_<id>.db`
pub fn backup_path_from_filename(device_name: &str, backup_filename: &str) -> Option<String> {
    let stem = backup_filename.rsplit_once('.').map_or(backup_filename, |(stem, _)| stem);
    let mut parts = stem.splitn(3, '_');
    let (date, time, device_id) = (parts.next()?, parts.next()?, parts.next()?);
    if device_name.is_empty() || date.is_empty() || time.is_empty() || device_id.is_empty() {
        return None;
    }
    Some(format!("{device_id}/{device_name}/{date}_{time}/{backup_filename}"))
}
