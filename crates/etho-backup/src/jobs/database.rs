//! Database backup job: mirror, verify, mark complete

use super::{BackupJob, JobFactory, JobReport, SyncSummary};
use crate::config::{ReplicationConfig, SourceCredentials};
use crate::device::DeviceDescriptor;
use crate::error::Result;
use crate::progress::ProgressSink;
use crate::replication::{
    check_duplicates, ConsistencyChecker, LocalMirror, MySqlSource, ReplicationStats,
    RowReplicator, SourceDatabase,
};
use crate::target::{BackupKind, BackupTarget};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Opens the experiment database of a device
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn SourceDatabase>>;
}

/// Connects to the MySQL server of each device with fixed credentials
pub struct MySqlConnector {
    credentials: SourceCredentials,
}

impl MySqlConnector {
    pub fn new(credentials: SourceCredentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl SourceConnector for MySqlConnector {
    async fn connect(&self, device: &DeviceDescriptor) -> Result<Box<dyn SourceDatabase>> {
        Ok(Box::new(MySqlSource::connect(device, &self.credentials).await?))
    }
}

pub struct DatabaseBackupJob {
    device: DeviceDescriptor,
    results_dir: PathBuf,
    replication: ReplicationConfig,
    connector: Arc<dyn SourceConnector>,
}

impl DatabaseBackupJob {
    pub fn new(
        device: DeviceDescriptor,
        results_dir: impl Into<PathBuf>,
        replication: ReplicationConfig,
        connector: Arc<dyn SourceConnector>,
    ) -> Self {
        Self {
            device,
            results_dir: results_dir.into(),
            replication,
            connector,
        }
    }

    async fn backup_from(
        &self,
        source: &dyn SourceDatabase,
        target: &BackupTarget,
        progress: &ProgressSink,
        started: Instant,
    ) -> Result<JobReport> {
        let replicator = RowReplicator::new(self.replication.clone())
            .with_side_file(target.side_file_path());
        replicator.ensure_ready(source).await?;

        let mirror = LocalMirror::open(target.path()).await?;

        let replicated = replicator.mirror(source, &mirror).await;
        let duplicates = match replicated {
            Ok(_) => Some(check_duplicates(&mirror).await),
            Err(_) => None,
        };
        mirror.close().await;
        let stats = replicated?;

        progress.info(format!(
            "Mirrored {} tables ({} created), {} new rows",
            stats.tables.len(),
            stats.tables_created(),
            stats.rows_copied()
        ));

        let percentage = ConsistencyChecker::new(source, target.path()).compare().await;
        progress.info(format!("Database comparison: {percentage:.2}% match"));

        let duplicates = duplicates.unwrap_or_default();
        if duplicates.found() {
            progress.warning(format!(
                "Duplicated rows found in {}",
                duplicates.duplicated_tables.join(", ")
            ));
        }

        let report = JobReport {
            success: percentage > 0.0,
            comparison: Some(percentage),
            sync: Some(SyncSummary::Database {
                match_percentage: percentage,
                rows_copied: stats.rows_copied(),
                duplicates: duplicates.found(),
            }),
        };

        if report.success {
            if let Err(e) = write_completion_marker(target, &stats, percentage) {
                tracing::warn!(
                    device_id = %self.device.id,
                    error = %e,
                    "Could not write completion marker"
                );
            }
            progress.success(format!(
                "Backup completed successfully in {:.1}s ({percentage:.2}% match)",
                started.elapsed().as_secs_f64()
            ));
        } else {
            progress.error(format!(
                "Backup failed: comparison with the device returned {percentage:.2}"
            ));
        }

        Ok(report)
    }
}

#[async_trait]
impl BackupJob for DatabaseBackupJob {
    fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    fn kind(&self) -> BackupKind {
        BackupKind::Database
    }

    async fn execute(&self, progress: &ProgressSink) -> Result<JobReport> {
        let started = Instant::now();
        let target = BackupTarget::database(&self.results_dir, &self.device)?;
        target.ensure_parent()?;

        progress.info(format!(
            "Preparing to back up database '{}' to {}",
            self.device.database_name(),
            target.path().display()
        ));

        let source = self.connector.connect(&self.device).await?;
        let result = self.backup_from(source.as_ref(), &target, progress, started).await;
        source.close().await;
        result
    }
}

fn write_completion_marker(
    target: &BackupTarget,
    stats: &ReplicationStats,
    percentage: f64,
) -> Result<()> {
    let file_size = std::fs::metadata(target.path()).map(|m| m.len()).unwrap_or(0);
    let marker = json!({
        "completed_at": Utc::now().to_rfc3339(),
        "backup_file": target.path(),
        "file_size": file_size,
        "stats": {
            "comparison_percentage": percentage,
            "rows_copied": stats.rows_copied(),
            "tables": stats.tables,
        },
    });
    std::fs::write(
        target.completion_marker_path(),
        serde_json::to_vec_pretty(&marker)?,
    )?;
    Ok(())
}

/// Builds database jobs sharing one connector and configuration
pub struct DatabaseJobFactory {
    results_dir: PathBuf,
    replication: ReplicationConfig,
    connector: Arc<dyn SourceConnector>,
}

impl DatabaseJobFactory {
    pub fn new(
        results_dir: impl Into<PathBuf>,
        replication: ReplicationConfig,
        connector: Arc<dyn SourceConnector>,
    ) -> Self {
        Self {
            results_dir: results_dir.into(),
            replication,
            connector,
        }
    }
}

impl JobFactory for DatabaseJobFactory {
    fn kind(&self) -> BackupKind {
        BackupKind::Database
    }

    fn create(&self, device: DeviceDescriptor) -> Box<dyn BackupJob> {
        Box::new(DatabaseBackupJob::new(
            device,
            self.results_dir.clone(),
            self.replication.clone(),
            Arc::clone(&self.connector),
        ))
    }
}
