//! Replication of recorded video files

pub mod cache;
pub mod fetch;
pub mod listing;

pub use cache::{CacheEntry, FileStatus, VideoCache};
pub use fetch::{FetchAction, FetchOutcome, VideoFetcher};
pub use listing::{DeviceFileClient, RemoteVideo};
