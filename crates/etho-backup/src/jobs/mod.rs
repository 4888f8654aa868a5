//! Backup jobs
//!
//! A job performs one backup attempt for one device and reports through a
//! [`ProgressSink`]. Every attempt starts with an `initiated` event and ends
//! with exactly one of `success`, `warning` or `error`; [`run_job`] enforces
//! that contract at the job boundary, including for panics.

pub mod database;
pub mod video;

pub use database::{DatabaseBackupJob, DatabaseJobFactory, MySqlConnector, SourceConnector};
pub use video::{VideoBackupJob, VideoJobFactory};

use crate::device::DeviceDescriptor;
use crate::error::Result;
use crate::progress::ProgressSink;
use crate::target::BackupKind;
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

/// Synchronisation state reached by a job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSummary {
    Database {
        match_percentage: f64,
        rows_copied: u64,
        duplicates: bool,
    },
    Video {
        matching: usize,
        total: usize,
    },
}

/// Result of one backup attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub success: bool,
    /// Last consistency result, for database jobs
    pub comparison: Option<f64>,
    pub sync: Option<SyncSummary>,
}

impl JobReport {
    pub fn failed() -> Self {
        Self {
            success: false,
            comparison: None,
            sync: None,
        }
    }
}

#[async_trait]
pub trait BackupJob: Send + Sync {
    fn device(&self) -> &DeviceDescriptor;

    fn kind(&self) -> BackupKind;

    /// Run the attempt, emitting intermediate and final events.
    ///
    /// Errors returned here are turned into the terminal event by [`run_job`].
    async fn execute(&self, progress: &ProgressSink) -> Result<JobReport>;
}

/// Creates one job per device for the orchestrator
pub trait JobFactory: Send + Sync {
    fn kind(&self) -> BackupKind;

    fn create(&self, device: DeviceDescriptor) -> Box<dyn BackupJob>;
}

/// Run `job` to completion, never letting an error or panic escape
pub async fn run_job(job: &dyn BackupJob, progress: &ProgressSink) -> JobReport {
    let device = job.device();
    let started = Instant::now();
    progress.info(format!(
        "{} backup initiated for device {}",
        capitalised(job.kind()),
        device.label()
    ));

    match AssertUnwindSafe(job.execute(progress)).catch_unwind().await {
        Ok(Ok(report)) => report,
        Ok(Err(e)) if e.is_not_ready() => {
            progress.warning(format!("Device {} not ready for backup: {}", device.label(), e));
            JobReport::failed()
        },
        Ok(Err(e)) if e.is_validation() => {
            progress.error(format!("Cannot back up device {}: {}", device.label(), e));
            JobReport::failed()
        },
        Ok(Err(e)) => {
            progress.error(format!(
                "Backup of device {} failed after {:.1}s: {}",
                device.label(),
                started.elapsed().as_secs_f64(),
                e
            ));
            JobReport::failed()
        },
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            progress.error(format!(
                "Backup of device {} aborted unexpectedly: {}",
                device.label(),
                reason
            ));
            JobReport::failed()
        },
    }
}

fn capitalised(kind: BackupKind) -> &'static str {
    match kind {
        BackupKind::Database => "Database",
        BackupKind::Video => "Video",
    }
}
