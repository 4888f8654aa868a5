//! Fixture builders for devices and experiment databases

use super::SqliteSource;
use etho_backup::config::{ReplicationConfig, VideoConfig};
use etho_backup::device::DeviceDescriptor;
use std::path::Path;

pub const DEVICE_ID: &str = "0256424ac3f545b6b3c687723085ffcb";
pub const DEVICE_NAME: &str = "ETHOSCOPE_025";

/// A running device whose mirror lives at `<id>/<name>/<run>/<run>_<id>.db`
pub fn running_device(id: &str, name: &str) -> DeviceDescriptor {
    DeviceDescriptor::new(id, name, "127.0.0.1")
        .with_status("running")
        .with_backup_path(format!(
            "{id}/{name}/2025-06-13_16-05-37/2025-06-13_16-05-37_{id}.db"
        ))
}

pub fn default_device() -> DeviceDescriptor {
    running_device(DEVICE_ID, DEVICE_NAME)
}

pub fn replication_config(batch_size: usize) -> ReplicationConfig {
    ReplicationConfig {
        batch_size,
        ..ReplicationConfig::default()
    }
}

/// Video settings pointing at a mock device web service on `port`
pub fn video_config(port: u16) -> VideoConfig {
    VideoConfig {
        device_port: port,
        request_timeout_secs: 5,
        ..VideoConfig::default()
    }
}

/// Experiment database with the tables a tracking run produces
pub struct ExperimentDb {
    pub source: SqliteSource,
}

impl ExperimentDb {
    /// Create the schema with an empty VAR_MAP, i.e. a device that is not ready
    pub async fn empty(dir: &Path) -> Self {
        let source = SqliteSource::create(&dir.join("device.db")).await;
        for ddl in [
            "CREATE TABLE VAR_MAP (var_name VARCHAR(100), sql_type VARCHAR(100), functional_type VARCHAR(100))",
            "CREATE TABLE METADATA (field VARCHAR(100), value TEXT)",
            "CREATE TABLE ROI_1 (id INTEGER PRIMARY KEY, t INT, x DOUBLE, y DOUBLE, is_inferred SMALLINT)",
            "CREATE TABLE CSV_DAM_ACTIVITY (id INTEGER PRIMARY KEY, date VARCHAR(20), roi_1 SMALLINT)",
            "CREATE TABLE IMG_SNAPSHOTS (id INTEGER PRIMARY KEY, t INT, img LONGBLOB)",
        ] {
            source.execute(ddl).await;
        }
        Self { source }
    }

    /// Schema plus variable map and metadata, ready for backup
    pub async fn ready(dir: &Path) -> Self {
        let db = Self::empty(dir).await;
        db.source
            .execute(
                "INSERT INTO VAR_MAP VALUES ('x', 'DOUBLE', 'distance'), ('y', 'DOUBLE', 'distance'), ('is_inferred', 'SMALLINT', 'bool')",
            )
            .await;
        db.source
            .execute("INSERT INTO METADATA VALUES ('machine_name', 'ETHOSCOPE_025'), ('date_time', '1749830737')")
            .await;
        db
    }

    /// Append tracking rows with ids `from..=to` to ROI_1
    pub async fn add_roi_rows(&self, from: i64, to: i64) {
        for id in from..=to {
            self.source
                .execute(&format!(
                    "INSERT INTO ROI_1 VALUES ({id}, {}, {}.5, 0.25, {})",
                    id * 1000,
                    id,
                    if id % 3 == 0 { "NULL" } else { "0" }
                ))
                .await;
        }
    }

    /// Append activity rows with ids `from..=to` to CSV_DAM_ACTIVITY
    pub async fn add_activity_rows(&self, from: i64, to: i64) {
        for id in from..=to {
            self.source
                .execute(&format!(
                    "INSERT INTO CSV_DAM_ACTIVITY VALUES ({id}, '2025-06-13', {})",
                    id % 7
                ))
                .await;
        }
    }

    pub async fn add_snapshot(&self, id: i64) {
        self.source
            .execute(&format!("INSERT INTO IMG_SNAPSHOTS VALUES ({id}, {}, X'FFD8FFE0')", id * 300))
            .await;
    }
}
