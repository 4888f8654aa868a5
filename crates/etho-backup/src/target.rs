//! Local destinations of backup jobs
//!
//! Every destination is resolved beneath a configured root. Paths that would
//! escape the root (absolute paths elsewhere, `..` components) are rejected
//! before a job touches the filesystem.

use crate::device::DeviceDescriptor;
use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// What kind of data a job replicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Database,
    Video,
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupKind::Database => f.write_str("database"),
            BackupKind::Video => f.write_str("video"),
        }
    }
}

/// A resolved (device, kind) destination on local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    device_id: String,
    kind: BackupKind,
    path: PathBuf,
}

impl BackupTarget {
    /// SQLite mirror at `<results_root>/<backup_path>`
    pub fn database(results_root: &Path, device: &DeviceDescriptor) -> Result<Self> {
        let relative = device
            .backup_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                BackupError::invalid_target(format!(
                    "could not obtain backup path for device {}",
                    device.id
                ))
            })?;

        Ok(Self {
            device_id: device.id.clone(),
            kind: BackupKind::Database,
            path: resolve_under(results_root, Path::new(relative))?,
        })
    }

    /// Video archive directory at `<video_root>/<device_id>`
    pub fn video(video_root: &Path, device: &DeviceDescriptor) -> Result<Self> {
        if device.id.trim().is_empty() {
            return Err(BackupError::invalid_target("device id is empty"));
        }

        Ok(Self {
            device_id: device.id.clone(),
            kind: BackupKind::Video,
            path: resolve_under(video_root, Path::new(&device.id))?,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn kind(&self) -> BackupKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flat-text companion of the mirror: same stem, `.txt` extension
    pub fn side_file_path(&self) -> PathBuf {
        self.path.with_extension("txt")
    }

    /// JSON marker written once a database backup completed
    pub fn completion_marker_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".completed");
        PathBuf::from(name)
    }

    /// Create the directory that will hold the target
    pub fn ensure_parent(&self) -> Result<()> {
        let dir = match self.kind {
            BackupKind::Database => self.path.parent(),
            BackupKind::Video => Some(self.path.as_path()),
        };
        if let Some(dir) = dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Join `relative` onto `root`, refusing anything that leaves `root`.
///
/// Absolute inputs are accepted only when they already lie under `root`.
pub fn resolve_under(root: &Path, relative: &Path) -> Result<PathBuf> {
    let relative = if relative.is_absolute() {
        relative.strip_prefix(root).map_err(|_| {
            BackupError::invalid_target(format!(
                "{} is outside {}",
                relative.display(),
                root.display()
            ))
        })?
    } else {
        relative
    };

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            },
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(BackupError::invalid_target(format!(
                    "{} escapes {}",
                    relative.display(),
                    root.display()
                )));
            },
        }
    }

    if depth == 0 {
        return Err(BackupError::invalid_target(format!(
            "{} does not name anything below {}",
            relative.display(),
            root.display()
        )));
    }

    Ok(resolved)
}
