//! Download and verification of single video files

use super::cache::{CacheEntry, FileStatus};
use super::listing::{DeviceFileClient, RemoteVideo};
use crate::error::{BackupError, Result};
use crate::target::{resolve_under, BackupTarget};
use chrono::{DateTime, Utc};
use etho_common::checksum::{compute_file_md5, read_sidecar, sidecar_path, Md5Hasher};
use etho_common::units::format_bytes;
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchAction {
    Downloaded { bytes: u64 },
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub action: FetchAction,
    pub status: FileStatus,
    pub local_path: PathBuf,
}

/// Copies remote videos of one device into its archive directory
pub struct VideoFetcher {
    client: DeviceFileClient,
    video_root: PathBuf,
    archive_dir: PathBuf,
    device_id: String,
}

impl VideoFetcher {
    pub fn new(client: DeviceFileClient, video_root: &Path, target: &BackupTarget) -> Self {
        Self {
            client,
            video_root: video_root.to_path_buf(),
            archive_dir: target.path().to_path_buf(),
            device_id: target.device_id().to_string(),
        }
    }

    pub fn client(&self) -> &DeviceFileClient {
        &self.client
    }

    /// Where `video` is stored locally, inside the device's archive directory
    pub fn local_path(&self, video: &RemoteVideo) -> Result<PathBuf> {
        let relative = relative_video_path(&video.path, &self.device_id);
        resolve_under(&self.archive_dir, &relative)
    }

    /// Make sure a verified local copy of `video` exists
    pub async fn fetch(&self, video: &RemoteVideo) -> Result<FetchOutcome> {
        let local_path = self.local_path(video)?;

        if let Some(status) = self.local_status(&local_path, video).await? {
            debug!(file = %video.filename, "Local copy already present");
            return Ok(FetchOutcome {
                action: FetchAction::AlreadyPresent,
                status,
                local_path,
            });
        }

        let bytes = self.download(video, &local_path).await?;
        let status = if video.hash.is_some() {
            FileStatus::Verified
        } else {
            FileStatus::BackedUp
        };

        Ok(FetchOutcome {
            action: FetchAction::Downloaded { bytes },
            status,
            local_path,
        })
    }

    /// Cache record for a local copy
    pub async fn cache_entry(&self, local_path: &Path, status: FileStatus) -> Result<CacheEntry> {
        let metadata = tokio::fs::metadata(local_path).await?;
        let modified: DateTime<Utc> = metadata.modified()?.into();
        let path = local_path
            .strip_prefix(&self.video_root)
            .unwrap_or(local_path)
            .to_string_lossy()
            .into_owned();

        Ok(CacheEntry {
            size_bytes: metadata.len(),
            size_human: format_bytes(metadata.len()),
            path,
            status,
            modified,
        })
    }

    /// Status of an existing local copy, `None` when it must be downloaded
    async fn local_status(
        &self,
        local_path: &Path,
        video: &RemoteVideo,
    ) -> Result<Option<FileStatus>> {
        if !tokio::fs::try_exists(local_path).await? {
            return Ok(None);
        }

        let Some(ref expected) = video.hash else {
            return Ok(Some(FileStatus::BackedUp));
        };

        let local_digest = match read_sidecar(local_path)? {
            Some(digest) => digest,
            None => {
                let path = local_path.to_path_buf();
                let digest = tokio::task::spawn_blocking(move || compute_file_md5(&path))
                    .await
                    .map_err(std::io::Error::other)??;
                tokio::fs::write(sidecar_path(local_path), &digest).await?;
                digest
            },
        };

        if local_digest.eq_ignore_ascii_case(expected) {
            Ok(Some(FileStatus::Verified))
        } else {
            debug!(file = %video.filename, "Local copy differs from device, fetching again");
            Ok(None)
        }
    }

    async fn download(&self, video: &RemoteVideo, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut partial = dest.as_os_str().to_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        match self.stream_to(video, &partial).await {
            Ok((bytes, digest)) => {
                tokio::fs::rename(&partial, dest).await?;
                tokio::fs::write(sidecar_path(dest), &digest).await?;
                Ok(bytes)
            },
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(e)
            },
        }
    }

    async fn stream_to(&self, video: &RemoteVideo, partial: &Path) -> Result<(u64, String)> {
        let url = self.client.static_url_for(&video.path);
        let response = self.client.downloads().get(&url).send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(partial).await?;
        let mut hasher = Md5Hasher::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;

        let bytes = hasher.bytes();
        let digest = hasher.finalize();
        if let Some(ref expected) = video.hash {
            if !expected.eq_ignore_ascii_case(&digest) {
                return Err(BackupError::ChecksumMismatch {
                    file: video.filename.clone(),
                    expected: expected.clone(),
                    actual: digest,
                });
            }
        }

        Ok((bytes, digest))
    }
}

/// Path of a device file relative to the device's archive directory.
///
/// Everything up to the device id (or, failing that, the `videos` folder) is
/// dropped; a bare file name is used when neither appears.
pub fn relative_video_path(remote_path: &str, device_id: &str) -> PathBuf {
    let parts: Vec<&str> = Path::new(remote_path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();

    let start = parts
        .iter()
        .position(|p| *p == device_id)
        .or_else(|| parts.iter().position(|p| *p == "videos"))
        .map(|idx| idx + 1)
        .unwrap_or_else(|| parts.len().saturating_sub(1));

    parts[start.min(parts.len())..].iter().collect()
}
