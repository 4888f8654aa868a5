//! Video listings served by a device's web service

use crate::config::VideoConfig;
use crate::device::DeviceDescriptor;
use crate::error::{BackupError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Location of the plain-text index, relative to the static root
pub const INDEX_FILE: &str = "ethoscope_data/results/index.html";

/// A video file advertised by a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVideo {
    pub filename: String,
    /// Path on the device, as served under the static root
    pub path: String,
    /// md5 published by the device, when the listing carries one
    pub hash: Option<String>,
}

impl RemoteVideo {
    fn from_path(path: &str) -> Self {
        let filename = path.rsplit('/').next().unwrap_or(path).to_string();
        Self {
            filename,
            path: path.to_string(),
            hash: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListedVideo {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    hash: Option<String>,
}

/// HTTP client for the file endpoints of one device
#[derive(Clone)]
pub struct DeviceFileClient {
    client: reqwest::Client,
    /// No overall deadline, only connect and idle-read limits
    downloads: reqwest::Client,
    base_url: String,
    static_url: String,
}

impl DeviceFileClient {
    pub fn new(device: &DeviceDescriptor, config: &VideoConfig) -> Result<Self> {
        let user_agent = concat!("etho-backup/", env!("CARGO_PKG_VERSION"));
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(user_agent)
            .build()?;
        let downloads = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .read_timeout(config.request_timeout())
            .user_agent(user_agent)
            .build()?;
        let base_url = device.base_url(config.device_port);
        let static_url = format!("{}/{}", base_url, config.static_dir.trim_matches('/'));

        Ok(Self {
            client,
            downloads,
            base_url,
            static_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of a device path under the static root
    pub fn static_url_for(&self, path: &str) -> String {
        format!("{}/{}", self.static_url, path.trim_start_matches('/'))
    }

    /// Client for file bodies; a transfer may run as long as data keeps arriving
    pub fn downloads(&self) -> &reqwest::Client {
        &self.downloads
    }

    /// List the device's videos.
    ///
    /// The JSON listing is preferred; when it fails or is empty the device is
    /// asked to regenerate its plain index, which is then read line by line.
    pub async fn list_videos(&self) -> Result<Vec<RemoteVideo>> {
        match self.list_json().await {
            Ok(videos) if !videos.is_empty() => return Ok(videos),
            Ok(_) => debug!(url = %self.base_url, "JSON video listing is empty"),
            Err(e) => debug!(url = %self.base_url, error = %e, "JSON video listing failed"),
        }

        self.list_index().await.map_err(|e| {
            warn!(url = %self.base_url, error = %e, "Index video listing failed");
            BackupError::ListingUnavailable(e.to_string())
        })
    }

    async fn list_json(&self) -> Result<Vec<RemoteVideo>> {
        let url = format!("{}/list_video_files", self.base_url);
        let listing: BTreeMap<String, ListedVideo> = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(listing
            .into_iter()
            .map(|(filename, entry)| RemoteVideo {
                path: entry.path.filter(|p| !p.is_empty()).unwrap_or_else(|| filename.clone()),
                hash: entry.hash.filter(|h| !h.is_empty()).map(|h| h.to_lowercase()),
                filename,
            })
            .collect())
    }

    async fn list_index(&self) -> Result<Vec<RemoteVideo>> {
        let make_index = format!("{}/make_index", self.base_url);
        match self.client.get(&make_index).send().await.and_then(|r| r.error_for_status()) {
            Ok(_) => debug!(url = %make_index, "Remote index regenerated"),
            Err(e) => warn!(url = %make_index, error = %e, "Could not regenerate remote index"),
        }

        let body = self
            .client
            .get(self.static_url_for(INDEX_FILE))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(RemoteVideo::from_path)
            .collect())
    }

    /// Ask the device to delete `path`
    pub async fn remove_remote(&self, device_id: &str, path: &str) -> Result<()> {
        let url = format!("{}/rm_static_file/{}", self.base_url, device_id);
        self.client
            .post(&url)
            .json(&serde_json::json!({ "file": path }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_video_from_index_line() {
        let video =
            RemoteVideo::from_path("/ethoscope_data/videos/e1/ETHOSCOPE_001/2024/whole_01.h264");
        assert_eq!(video.filename, "whole_01.h264");
        assert_eq!(video.hash, None);
    }

    #[test]
    fn test_static_urls() {
        let device = DeviceDescriptor::new("e1", "ETHOSCOPE_001", "10.0.0.1");
        let client = DeviceFileClient::new(&device, &VideoConfig::default())
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(client.base_url(), "http://10.0.0.1:9000");
        assert_eq!(
            client.static_url_for("/ethoscope_data/videos/a.h264"),
            "http://10.0.0.1:9000/static/ethoscope_data/videos/a.h264"
        );
    }
}
