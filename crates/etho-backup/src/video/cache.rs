//! Per-device cache of archived video files
//!
//! Stored as JSON at `<video-root>/.cache/video_cache_<device-id>.json`:
//!
//! ```json
//! { "files": { "<filename>": { "size_bytes": 1, "size_human": "1 B", "path": "...",
//!              "status": "backed-up", "modified": "2024-01-01T00:00:00Z" } },
//!   "timestamp": 1704067200.0 }
//! ```
//!
//! The file is replaced atomically. An unreadable cache loads as empty.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CACHE_DIR: &str = ".cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileStatus {
    /// Local md5 matches the one published by the device
    Verified,
    /// Present locally; the device published no hash to compare against
    BackedUp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub size_bytes: u64,
    pub size_human: String,
    /// Location relative to the video root
    pub path: String,
    pub status: FileStatus,
    /// Modification time of the local copy when it was last verified
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    files: BTreeMap<String, CacheEntry>,
    timestamp: f64,
}

#[derive(Debug)]
pub struct VideoCache {
    path: PathBuf,
    files: BTreeMap<String, CacheEntry>,
}

impl VideoCache {
    pub fn cache_path(video_root: &Path, device_id: &str) -> PathBuf {
        video_root
            .join(CACHE_DIR)
            .join(format!("video_cache_{device_id}.json"))
    }

    /// Load the cache of `device_id`, starting empty when it is missing or corrupt
    pub fn load(video_root: &Path, device_id: &str) -> Self {
        let path = Self::cache_path(video_root, device_id);
        let files = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<CacheFile>(&bytes) {
                Ok(cache) => cache.files,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Discarding unreadable video cache");
                    BTreeMap::new()
                },
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read video cache");
                BTreeMap::new()
            },
        };

        debug!(device_id, entries = files.len(), "Loaded video cache");
        Self { path, files }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, filename: &str) -> Option<&CacheEntry> {
        self.files.get(filename)
    }

    /// The entry for `filename` if it is old enough to be trusted as is
    pub fn trusted(
        &self,
        filename: &str,
        now: DateTime<Utc>,
        trust_age: chrono::Duration,
    ) -> Option<&CacheEntry> {
        let cutoff = now.checked_sub_signed(trust_age)?;
        self.files
            .get(filename)
            .filter(|entry| entry.modified < cutoff)
    }

    /// Replace every entry; the cache mirrors the latest pass only
    pub fn replace(&mut self, files: BTreeMap<String, CacheEntry>) {
        self.files = files;
    }

    /// Write the cache through a temporary file renamed into place
    pub fn save(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;

        let payload = CacheFile {
            files: self.files.clone(),
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        };

        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut temp, &payload)?;
        temp.flush()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
