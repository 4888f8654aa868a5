//! Ethoscope Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the ethoscope node backup tooling.
//!
//! # Overview
//!
//! - **Error Handling**: [`EthoError`] and the crate [`Result`] alias
//! - **Checksums**: md5 content hashes and `.md5` sidecar files for video artifacts
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Units**: human-readable byte sizes
//!
//! # Example
//!
//! ```no_run
//! use etho_common::checksum::{compute_file_md5, write_sidecar};
//!
//! fn hash_video(path: &std::path::Path) -> etho_common::Result<()> {
//!     let digest = compute_file_md5(path)?;
//!     write_sidecar(path, &digest)?;
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod units;

pub use error::{EthoError, Result};
