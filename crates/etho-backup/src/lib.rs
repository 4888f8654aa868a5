//! Ethoscope Backup Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Backup engine for a fleet of ethoscope recording devices.
//!
//! # Overview
//!
//! - **Replication**: incremental mirroring of each device's MySQL experiment
//!   database into a local SQLite file, with consistency and duplication checks
//! - **Video**: md5-verified download of recorded videos with a per-device cache
//! - **Jobs**: one backup attempt per device, reported as progress events
//! - **Orchestration**: periodic discovery and bounded concurrent backups with a
//!   shared status board, served over HTTP
//!
//! # Example
//!
//! ```no_run
//! use etho_backup::{
//!     config::BackupConfig,
//!     discovery::NodeDirectory,
//!     jobs::{DatabaseJobFactory, MySqlConnector},
//!     orchestrator::FleetOrchestrator,
//! };
//! use std::sync::Arc;
//!
//! async fn run() -> anyhow::Result<()> {
//!     let config = BackupConfig::from_env()?;
//!     let directory = NodeDirectory::new(
//!         &config.orchestrator.node_address,
//!         config.orchestrator.directory_timeout(),
//!     )?;
//!     let factory = DatabaseJobFactory::new(
//!         config.paths.results_dir.clone(),
//!         config.replication.clone(),
//!         Arc::new(MySqlConnector::new(config.source.clone())),
//!     );
//!
//!     FleetOrchestrator::new(config.orchestrator, Arc::new(directory), Arc::new(factory))
//!         .run()
//!         .await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod jobs;
pub mod orchestrator;
pub mod progress;
pub mod replication;
pub mod server;
pub mod status;
pub mod target;
pub mod video;

pub use config::BackupConfig;
pub use device::DeviceDescriptor;
pub use error::{BackupError, Result};
pub use progress::{EventStatus, ProgressEvent, ProgressSink};
pub use target::{BackupKind, BackupTarget};
