//! Video backup job: list, fetch, verify, cache

use super::{BackupJob, JobFactory, JobReport, SyncSummary};
use crate::config::VideoConfig;
use crate::device::DeviceDescriptor;
use crate::error::Result;
use crate::progress::ProgressSink;
use crate::target::{BackupKind, BackupTarget};
use crate::video::{DeviceFileClient, FetchAction, VideoCache, VideoFetcher};
use async_trait::async_trait;
use chrono::Utc;
use etho_common::units::format_bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, warn};

pub struct VideoBackupJob {
    device: DeviceDescriptor,
    video_dir: PathBuf,
    config: VideoConfig,
}

impl VideoBackupJob {
    pub fn new(
        device: DeviceDescriptor,
        video_dir: impl Into<PathBuf>,
        config: VideoConfig,
    ) -> Self {
        Self {
            device,
            video_dir: video_dir.into(),
            config,
        }
    }
}

#[async_trait]
impl BackupJob for VideoBackupJob {
    fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    fn kind(&self) -> BackupKind {
        BackupKind::Video
    }

    async fn execute(&self, progress: &ProgressSink) -> Result<JobReport> {
        let started = Instant::now();
        let target = BackupTarget::video(&self.video_dir, &self.device)?;
        target.ensure_parent()?;

        let client = DeviceFileClient::new(&self.device, &self.config)?;
        let videos = match client.list_videos().await {
            Ok(videos) => videos,
            Err(e) => {
                debug!(device_id = %self.device.id, error = %e, "No video listing");
                Vec::new()
            },
        };

        if videos.is_empty() {
            progress.warning(format!("No videos to back up for device {}", self.device.label()));
            return Ok(JobReport {
                success: true,
                comparison: None,
                sync: Some(SyncSummary::Video {
                    matching: 0,
                    total: 0,
                }),
            });
        }

        let fetcher = VideoFetcher::new(client, &self.video_dir, &target);
        let mut cache = VideoCache::load(&self.video_dir, &self.device.id);
        let now = Utc::now();
        let trust_age = self.config.cache_trust_age();

        let total = videos.len();
        let mut entries = BTreeMap::new();
        let mut verified = 0usize;
        let mut failures = 0usize;

        for (idx, video) in videos.iter().enumerate() {
            let position = idx + 1;

            if let Some(entry) = cache.trusted(&video.filename, now, trust_age) {
                entries.insert(video.filename.clone(), entry.clone());
                verified += 1;
                continue;
            }

            let outcome = match fetcher.fetch(video).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    failures += 1;
                    progress.error(format!("Error backing up video {}: {}", video.filename, e));
                    continue;
                },
            };

            verified += 1;
            match fetcher.cache_entry(&outcome.local_path, outcome.status).await {
                Ok(entry) => {
                    entries.insert(video.filename.clone(), entry);
                },
                Err(e) => warn!(file = %video.filename, error = %e, "Could not stat local copy"),
            }

            match outcome.action {
                FetchAction::Downloaded { bytes } => progress.info(format!(
                    "Downloaded video {} ({}) ({position}/{total})",
                    video.filename,
                    format_bytes(bytes)
                )),
                FetchAction::AlreadyPresent => progress.info(format!(
                    "Video {} already backed up ({position}/{total})",
                    video.filename
                )),
            }

            if self.config.remote_cleanup {
                if let Err(e) = fetcher.client().remove_remote(&self.device.id, &video.path).await {
                    warn!(file = %video.path, error = %e, "Could not remove video from device");
                }
            }
        }

        cache.replace(entries);
        if let Err(e) = cache.save() {
            warn!(path = %cache.path().display(), error = %e, "Could not save video cache");
        }

        let elapsed = started.elapsed().as_secs_f64();
        if failures == 0 {
            progress.success(format!("All {total} videos backed up in {elapsed:.1}s"));
        } else {
            progress.warning(format!("Backed up {verified}/{total} videos in {elapsed:.1}s"));
        }

        Ok(JobReport {
            success: verified > 0,
            comparison: None,
            sync: Some(SyncSummary::Video {
                matching: verified,
                total,
            }),
        })
    }
}

pub struct VideoJobFactory {
    video_dir: PathBuf,
    config: VideoConfig,
}

impl VideoJobFactory {
    pub fn new(video_dir: impl Into<PathBuf>, config: VideoConfig) -> Self {
        Self {
            video_dir: video_dir.into(),
            config,
        }
    }
}

impl JobFactory for VideoJobFactory {
    fn kind(&self) -> BackupKind {
        BackupKind::Video
    }

    fn create(&self, device: DeviceDescriptor) -> Box<dyn BackupJob> {
        Box::new(VideoBackupJob::new(device, self.video_dir.clone(), self.config.clone()))
    }
}
