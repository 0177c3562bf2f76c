//! Configuration for sam-dps
//!
//! Resolution priority: command line > environment variable > TOML file >
//! compiled default. The TOML file is located by
//! [`sam_common::config::resolve_config_path`].

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "SAM_DPS_CONFIG";

/// Default configuration file name under `<config_dir>/sam/`
pub const CONFIG_FILE_NAME: &str = "dps.toml";

/// Command line arguments
#[derive(Debug, Clone, Parser, Default)]
#[command(name = "sam-dps", version, about = "SAM data processing service")]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen port
    #[arg(long, env = "SAM_DPS_PORT")]
    pub port: Option<u16>,

    /// SQLite database path
    #[arg(long, env = "SAM_DPS_DATABASE")]
    pub database: Option<PathBuf>,

    /// Directory receiving uploaded files
    #[arg(long, env = "SAM_DPS_FILES_LOCATION")]
    pub files_location: Option<PathBuf>,

    /// Directory receiving processed files
    #[arg(long, env = "SAM_DPS_ARCHIVE_LOCATION")]
    pub archive_location: Option<PathBuf>,

    /// Root of per-scope raw data (analysis input and output)
    #[arg(long, env = "SAM_DPS_RAWDATA_LOCATION")]
    pub rawdata_location: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5740,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Upper bound on time spent retrying a locked database
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sam-dps.db"),
            max_lock_wait_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub files_location: PathBuf,
    pub archive_location: PathBuf,
    pub rawdata_location: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            files_location: PathBuf::from("data/files"),
            archive_location: PathBuf::from("data/archive"),
            rawdata_location: PathBuf::from("data/rawdata"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Idle wait between claims when no notification arrives
    pub poll_rate_ms: u64,
    /// Attempts allowed for file and API jobs
    pub retries: i64,
    /// First retry / defer delay, doubled per attempt
    pub base_delay_ms: u64,
    pub defer_max_attempts: i64,
    pub defer_backoff_cap_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_rate_ms: 100,
            retries: 3,
            base_delay_ms: 3000,
            defer_max_attempts: 5,
            defer_backoff_cap_ms: 60_000,
        }
    }
}

impl QueueConfig {
    /// Backoff before attempt `attempt` (1-based): base doubled per attempt, capped
    pub fn backoff(&self, attempt: i64) -> Duration {
        let shift = attempt.saturating_sub(1).clamp(0, 20) as u32;
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.defer_backoff_cap_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_file_worker: usize,
    pub max_api_worker: usize,
    pub max_defer_worker: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_file_worker: 1,
            max_api_worker: 5,
            max_defer_worker: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub timeout_ms: u64,
    /// Deadline for the equipment drop issued by DeleteInventory
    pub equipment_drop_timeout_ms: u64,
    pub application_url: String,
    pub equipment_url: String,
    pub product_url: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            equipment_drop_timeout_ms: 600_000,
            application_url: "http://127.0.0.1:5741".to_string(),
            equipment_url: "http://127.0.0.1:5742".to_string(),
            product_url: "http://127.0.0.1:5743".to_string(),
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn equipment_drop_timeout(&self) -> Duration {
        Duration::from_millis(self.equipment_drop_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_secs: u64,
    /// Cycles a global file may wait for transformed output
    pub wait_limit: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            wait_limit: 5,
        }
    }
}

/// Complete sam-dps configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DpsConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub workers: WorkerConfig,
    pub rpc: RpcConfig,
    pub poller: PollerConfig,
}

impl DpsConfig {
    /// Load the TOML layer then apply command line and environment overrides
    pub fn load(cli: &Cli) -> sam_common::Result<Self> {
        let path = sam_common::config::resolve_config_path(
            cli.config.as_deref(),
            CONFIG_ENV_VAR,
            CONFIG_FILE_NAME,
        );
        let mut config: DpsConfig = sam_common::config::load_toml(path.as_deref())?;
        config.apply_overrides(cli);
        Ok(config)
    }

    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(path) = &cli.database {
            self.database.path = path.clone();
        }
        if let Some(path) = &cli.files_location {
            self.storage.files_location = path.clone();
        }
        if let Some(path) = &cli.archive_location {
            self.storage.archive_location = path.clone();
        }
        if let Some(path) = &cli.rawdata_location {
            self.storage.rawdata_location = path.clone();
        }
    }

    /// Configuration rooted under one directory (tests, local runs)
    pub fn rooted_at(root: &Path) -> Self {
        let mut config = DpsConfig::default();
        config.database.path = root.join("sam-dps.db");
        config.storage.files_location = root.join("files");
        config.storage.archive_location = root.join("archive");
        config.storage.rawdata_location = root.join("rawdata");
        config
    }
}
