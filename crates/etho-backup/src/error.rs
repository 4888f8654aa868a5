//! Error taxonomy for backup jobs and the fleet orchestrator

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    /// The device database exists but holds no experiment yet.
    #[error("Database not ready: {0}")]
    NotReady(String),

    #[error("Invalid backup target: {0}")]
    InvalidTarget(String),

    #[error("Invalid device descriptor: {0}")]
    InvalidDevice(String),

    #[error("Device directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Video listing unavailable: {0}")]
    ListingUnavailable(String),

    #[error("Checksum mismatch for '{file}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] etho_common::EthoError),
}

impl BackupError {
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn invalid_target(msg: impl Into<String>) -> Self {
        Self::InvalidTarget(msg.into())
    }

    pub fn invalid_device(msg: impl Into<String>) -> Self {
        Self::InvalidDevice(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }

    /// Errors detected before any I/O towards the device happened
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidTarget(_) | Self::InvalidDevice(_))
    }
}
