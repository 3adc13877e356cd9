//! Keeper configuration
//!
//! ## Configuration Resolution
//!
//! Config is loaded with a two-layer resolution:
//! 1. An explicit `--config` path, else the override in the data dir
//!    (~/.local/share/receipt-keeper/config/keeper.toml)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! `KEEPER_DB`, `KEEPER_IMAGE_ROOT`, `KEEPER_LOG_DIR` and
//! `KEEPER_REMOTE_ENDPOINT` are applied last. Empty values mean "use the
//! default".

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::db::{Database, MigrationMode};
use crate::error::{Error, Result};
use crate::logsink::{ErrorLog, DEFAULT_MAX_BYTES, DEFAULT_RETAIN_BYTES};
use crate::upload::{RetryPolicy, DEFAULT_PUT_TIMEOUT};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/keeper.toml");

const APP_DIR: &str = "receipt-keeper";

#[derive(Debug, Clone, PartialEq)]
pub struct KeeperConfig {
    /// SQLite database file
    pub database: PathBuf,
    /// Root of the `<YYYY>/<MM>/<file>` image tree
    pub image_root: PathBuf,
    /// Directory holding the error log
    pub log_dir: PathBuf,
    /// Base URL of the HTTP drive; `None` keeps uploads queued
    pub remote_endpoint: Option<String>,
    pub remote_base_path: String,
    pub remote_timeout: Duration,
    pub retry: RetryPolicy,
    pub drain_interval: Duration,
    pub log_max_bytes: u64,
    pub log_retain_bytes: u64,
    pub migration_mode: MigrationMode,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        let data = default_data_dir();
        Self {
            database: data.join("keeper.db"),
            image_root: data.join("receipts"),
            log_dir: data.join("logs"),
            remote_endpoint: None,
            remote_base_path: String::new(),
            remote_timeout: DEFAULT_PUT_TIMEOUT,
            retry: RetryPolicy::default(),
            drain_interval: Duration::from_secs(30),
            log_max_bytes: DEFAULT_MAX_BYTES,
            log_retain_bytes: DEFAULT_RETAIN_BYTES,
            migration_mode: MigrationMode::Strict,
        }
    }
}

impl KeeperConfig {
    /// Load config files, then apply environment overrides
    pub fn load(override_path: Option<&Path>) -> Result<Self> {
        let mut config = load_config(override_path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `KEEPER_*` overrides read through `var`
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(db) = var("KEEPER_DB") {
            self.database = PathBuf::from(db);
        }
        if let Some(root) = var("KEEPER_IMAGE_ROOT") {
            self.image_root = PathBuf::from(root);
        }
        if let Some(dir) = var("KEEPER_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(endpoint) = var("KEEPER_REMOTE_ENDPOINT") {
            self.remote_endpoint = Some(endpoint);
        }
    }

    /// Open (creating and migrating) the configured database
    ///
    /// The database's directory is created first.
    pub fn open_database(&self) -> Result<Database> {
        if let Some(parent) = self.database.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::StorageUnavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let path = self.database.to_string_lossy();
        Database::open(&path, crate::clock::system_clock(), self.migration_mode)
    }

    /// Error log in `dir` (usually the `local_logs_path` setting) or the configured log dir
    pub fn error_log(&self, dir: Option<&Path>) -> ErrorLog {
        ErrorLog::in_dir(dir.unwrap_or(&self.log_dir))
            .with_limits(self.log_max_bytes, self.log_retain_bytes)
    }
}

/// `<data_local_dir>/receipt-keeper`, or `./.receipt-keeper` when the platform has none
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", APP_DIR)))
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join(APP_DIR).join("config").join("keeper.toml"))
}

/// Load configuration (override first, then default)
fn load_config(override_path: Option<&Path>) -> Result<KeeperConfig> {
    let path = match override_path {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            Some(path.to_path_buf())
        }
        None => default_config_path().filter(|p| p.exists()),
    };

    let content = match path {
        Some(path) => fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?,
        None => DEFAULT_CONFIG.to_string(),
    };

    parse_config(&content)
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    storage: Option<RawStorage>,
    remote: Option<RawRemote>,
    queue: Option<RawQueue>,
    log: Option<RawLog>,
    migrations: Option<RawMigrations>,
}

#[derive(Debug, Deserialize)]
struct RawStorage {
    database: Option<String>,
    image_root: Option<String>,
    log_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRemote {
    endpoint: Option<String>,
    base_path: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawQueue {
    max_attempts: Option<u32>,
    base_delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
    drain_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawLog {
    max_bytes: Option<u64>,
    retain_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawMigrations {
    strict: Option<bool>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse config from TOML content
fn parse_config(content: &str) -> Result<KeeperConfig> {
    let raw: RawConfig = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;

    let mut config = KeeperConfig::default();

    if let Some(storage) = raw.storage {
        if let Some(db) = non_empty(storage.database) {
            config.database = PathBuf::from(db);
        }
        if let Some(root) = non_empty(storage.image_root) {
            config.image_root = PathBuf::from(root);
        }
        if let Some(dir) = non_empty(storage.log_dir) {
            config.log_dir = PathBuf::from(dir);
        }
    }

    if let Some(remote) = raw.remote {
        config.remote_endpoint = non_empty(remote.endpoint);
        if let Some(base) = non_empty(remote.base_path) {
            config.remote_base_path = base;
        }
        if let Some(timeout) = remote.timeout_secs {
            config.remote_timeout = Duration::from_secs(timeout);
        }
    }

    if let Some(queue) = raw.queue {
        if let Some(max) = queue.max_attempts {
            if max == 0 {
                return Err(Error::Config("queue.max_attempts must be at least 1".to_string()));
            }
            config.retry.max_attempts = max;
        }
        if let Some(base) = queue.base_delay_secs {
            config.retry.base_delay = Duration::from_secs(base);
        }
        if let Some(cap) = queue.max_delay_secs {
            config.retry.max_delay = Duration::from_secs(cap);
        }
        if let Some(every) = queue.drain_interval_secs {
            config.drain_interval = Duration::from_secs(every.max(1));
        }
    }

    if let Some(log) = raw.log {
        if let Some(max) = log.max_bytes {
            config.log_max_bytes = max;
        }
        if let Some(retain) = log.retain_bytes {
            config.log_retain_bytes = retain;
        }
    }

    if let Some(migrations) = raw.migrations {
        if let Some(strict) = migrations.strict {
            config.migration_mode = if strict {
                MigrationMode::Strict
            } else {
                MigrationMode::Lenient
            };
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_config() {
        let config = parse_config(DEFAULT_CONFIG).unwrap();
        assert_eq!(config, KeeperConfig::default());
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_secs(30));
        assert_eq!(config.retry.max_delay, Duration::from_secs(1800));
        assert_eq!(config.log_max_bytes, 102_400);
        assert_eq!(config.log_retain_bytes, 51_200);
        assert!(config.remote_endpoint.is_none());
        assert_eq!(config.migration_mode, MigrationMode::Strict);
    }

    #[test]
    fn test_parse_overrides() {
        let config = parse_config(
            r#"
            [storage]
            database = "/srv/keeper/keeper.db"

            [remote]
            endpoint = "https://drive.example.com/api"
            base_path = "/Receipts"

            [queue]
            max_attempts = 3
            drain_interval_secs = 0

            [migrations]
            strict = false
            "#,
        )
        .unwrap();

        assert_eq!(config.database, PathBuf::from("/srv/keeper/keeper.db"));
        assert_eq!(config.image_root, KeeperConfig::default().image_root);
        assert_eq!(
            config.remote_endpoint.as_deref(),
            Some("https://drive.example.com/api")
        );
        assert_eq!(config.remote_base_path, "/Receipts");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.drain_interval, Duration::from_secs(1));
        assert_eq!(config.migration_mode, MigrationMode::Lenient);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(parse_config("[queue\n"), Err(Error::Config(_))));
        assert!(matches!(
            parse_config("[queue]\nmax_attempts = 0\n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.toml");
        fs::write(&path, "[log]\nmax_bytes = 2048\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.log_max_bytes, 2048);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = KeeperConfig::default();
        config.apply_overrides(|key| match key {
            "KEEPER_DB" => Some("/tmp/k.db".to_string()),
            "KEEPER_REMOTE_ENDPOINT" => Some("http://localhost:8080".to_string()),
            "KEEPER_LOG_DIR" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.database, PathBuf::from("/tmp/k.db"));
        assert_eq!(config.remote_endpoint.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.log_dir, KeeperConfig::default().log_dir);
    }
}
