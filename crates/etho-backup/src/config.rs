//! Backup service configuration
//!
//! Every setting can be provided through an `ETHO_*` environment variable
//! (optionally from a `.env` file). Command-line flags override the
//! environment in the binary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_RESULTS_DIR: &str = "/ethoscope_data/results";
pub const DEFAULT_VIDEO_DIR: &str = "/ethoscope_data/videos";
pub const DEFAULT_DB_USER: &str = "ethoscope";
pub const DEFAULT_DB_PASSWORD: &str = "ethoscope";
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 45;
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_LIVENESS_TABLE: &str = "VAR_MAP";
pub const DEFAULT_SIDE_FILE_TABLE: &str = "CSV_DAM_ACTIVITY";
pub const DEFAULT_DEVICE_PORT: u16 = 9000;
pub const DEFAULT_STATIC_DIR: &str = "static";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CACHE_TRUST_DAYS: u64 = 7;
pub const DEFAULT_NODE_ADDRESS: &str = "localhost";
pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 5 * 60;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_DIRECTORY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SCAN_SETTLE_SECS: u64 = 10;
pub const DEFAULT_STATUS_HOST: &str = "0.0.0.0";
pub const DEFAULT_STATUS_PORT: u16 = 8090;

/// Complete configuration of the backup service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupConfig {
    pub paths: PathsConfig,
    pub source: SourceCredentials,
    pub replication: ReplicationConfig,
    pub video: VideoConfig,
    pub orchestrator: OrchestratorConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root under which every relational mirror lives
    pub results_dir: PathBuf,
    /// Root of the video archive
    pub video_dir: PathBuf,
}

/// Credentials for the database server running on each device
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceCredentials {
    pub user: String,
    pub password: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Rows written per local transaction
    pub batch_size: usize,
    /// An empty liveness table means the device has not started an experiment
    pub liveness_table: String,
    /// Table whose rows are also appended to the flat `.txt` side-file
    pub side_file_table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Port of the web service running on each device
    pub device_port: u16,
    /// Static files prefix on the device web service
    pub static_dir: String,
    /// Whole-request limit for API calls; downloads apply it per connect and read
    pub request_timeout_secs: u64,
    /// Delete files on the device once their local copy is verified
    pub remote_cleanup: bool,
    /// Cached entries older than this are trusted without checking the disk
    pub cache_trust_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Host (and optional port) of the node's device directory service
    pub node_address: String,
    pub max_workers: usize,
    pub cycle_interval_secs: u64,
    pub job_timeout_secs: u64,
    pub directory_timeout_secs: u64,
    /// Time given to the fallback scanner before its results are trusted
    pub scan_settle_secs: u64,
    /// Hosts probed when the directory service is unreachable
    pub scan_hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl BackupConfig {
    /// Load `.env` (if present) then read every section from the environment
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            paths: PathsConfig::from_env(),
            source: SourceCredentials::from_env(),
            replication: ReplicationConfig::from_env(),
            video: VideoConfig::from_env(),
            orchestrator: OrchestratorConfig::from_env(),
            server: ServerConfig::from_env(),
        };

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.source.validate()?;
        self.replication.validate()?;
        self.video.validate()?;
        self.orchestrator.validate()?;
        Ok(())
    }
}

impl PathsConfig {
    pub fn from_env() -> Self {
        Self {
            results_dir: env_or("ETHO_RESULTS_DIR", PathBuf::from(DEFAULT_RESULTS_DIR)),
            video_dir: env_or("ETHO_VIDEO_DIR", PathBuf::from(DEFAULT_VIDEO_DIR)),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            video_dir: PathBuf::from(DEFAULT_VIDEO_DIR),
        }
    }
}

impl SourceCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            connect_timeout_secs: DEFAULT_DB_CONNECT_TIMEOUT_SECS,
        }
    }

    pub fn from_env() -> Self {
        Self {
            user: env_or("ETHO_DB_USER", DEFAULT_DB_USER.to_string()),
            password: env_or("ETHO_DB_PASSWORD", DEFAULT_DB_PASSWORD.to_string()),
            connect_timeout_secs: env_or(
                "ETHO_DB_CONNECT_TIMEOUT_SECS",
                DEFAULT_DB_CONNECT_TIMEOUT_SECS,
            ),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.user.is_empty() {
            anyhow::bail!("Database user must not be empty");
        }
        if self.password.is_empty() {
            anyhow::bail!("Database password must not be empty");
        }
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("Database connect timeout must be greater than 0");
        }
        Ok(())
    }
}

impl Default for SourceCredentials {
    fn default() -> Self {
        Self::new(DEFAULT_DB_USER, DEFAULT_DB_PASSWORD)
    }
}

impl std::fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl ReplicationConfig {
    pub fn from_env() -> Self {
        Self {
            batch_size: env_or("ETHO_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            liveness_table: env_or("ETHO_LIVENESS_TABLE", DEFAULT_LIVENESS_TABLE.to_string()),
            side_file_table: env_or("ETHO_SIDE_FILE_TABLE", DEFAULT_SIDE_FILE_TABLE.to_string()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }
        if self.liveness_table.is_empty() {
            anyhow::bail!("Liveness table must be named");
        }
        Ok(())
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            liveness_table: DEFAULT_LIVENESS_TABLE.to_string(),
            side_file_table: DEFAULT_SIDE_FILE_TABLE.to_string(),
        }
    }
}

impl VideoConfig {
    pub fn from_env() -> Self {
        Self {
            device_port: env_or("ETHO_DEVICE_PORT", DEFAULT_DEVICE_PORT),
            static_dir: env_or("ETHO_STATIC_DIR", DEFAULT_STATIC_DIR.to_string()),
            request_timeout_secs: env_or("ETHO_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            remote_cleanup: env_or("ETHO_REMOTE_CLEANUP", false),
            cache_trust_days: env_or("ETHO_CACHE_TRUST_DAYS", DEFAULT_CACHE_TRUST_DAYS),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_trust_age(&self) -> chrono::Duration {
        i64::try_from(self.cache_trust_days)
            .ok()
            .and_then(chrono::Duration::try_days)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be greater than 0");
        }
        if self.device_port == 0 {
            anyhow::bail!("Device port must be greater than 0");
        }
        Ok(())
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            device_port: DEFAULT_DEVICE_PORT,
            static_dir: DEFAULT_STATIC_DIR.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            remote_cleanup: false,
            cache_trust_days: DEFAULT_CACHE_TRUST_DAYS,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let scan_hosts = std::env::var("ETHO_SCAN_HOSTS")
            .map(|hosts| {
                hosts
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            node_address: env_or("ETHO_NODE_ADDRESS", DEFAULT_NODE_ADDRESS.to_string()),
            max_workers: env_or("ETHO_MAX_WORKERS", DEFAULT_MAX_WORKERS),
            cycle_interval_secs: env_or("ETHO_CYCLE_INTERVAL_SECS", DEFAULT_CYCLE_INTERVAL_SECS),
            job_timeout_secs: env_or("ETHO_JOB_TIMEOUT_SECS", DEFAULT_JOB_TIMEOUT_SECS),
            directory_timeout_secs: env_or(
                "ETHO_DIRECTORY_TIMEOUT_SECS",
                DEFAULT_DIRECTORY_TIMEOUT_SECS,
            ),
            scan_settle_secs: env_or("ETHO_SCAN_SETTLE_SECS", DEFAULT_SCAN_SETTLE_SECS),
            scan_hosts,
        }
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory_timeout_secs)
    }

    pub fn scan_settle(&self) -> Duration {
        Duration::from_secs(self.scan_settle_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_workers == 0 {
            anyhow::bail!("Max workers must be greater than 0");
        }
        if self.job_timeout_secs == 0 {
            anyhow::bail!("Job timeout must be greater than 0");
        }
        if self.directory_timeout_secs == 0 {
            anyhow::bail!("Directory timeout must be greater than 0");
        }
        if self.node_address.is_empty() {
            anyhow::bail!("Node address must not be empty");
        }
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            node_address: DEFAULT_NODE_ADDRESS.to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            cycle_interval_secs: DEFAULT_CYCLE_INTERVAL_SECS,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            directory_timeout_secs: DEFAULT_DIRECTORY_TIMEOUT_SECS,
            scan_settle_secs: DEFAULT_SCAN_SETTLE_SECS,
            scan_hosts: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_or("ETHO_STATUS_ENABLED", true),
            host: env_or("ETHO_STATUS_HOST", DEFAULT_STATUS_HOST.to_string()),
            port: env_or("ETHO_STATUS_PORT", DEFAULT_STATUS_PORT),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: DEFAULT_STATUS_HOST.to_string(),
            port: DEFAULT_STATUS_PORT,
        }
    }
}

/// Read `key` from the environment, keeping `default` when unset or unparsable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Ignoring unparsable configuration value");
                default
            },
        },
        Err(_) => default,
    }
}
