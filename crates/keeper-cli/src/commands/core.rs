//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `App` - Process-lifetime handles built from config (database, queue, log)
//! - `cmd_init` - Create the database and directories
//! - `cmd_migrations` - Show applied migrations
//! - `cmd_logs` - Show or clear the error log

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use keeper_core::db::{keys, Database};
use keeper_core::scanner::resolve_remote_base;
use keeper_core::{
    ErrorLog, HttpRemoteStore, Ingestor, KeeperConfig, LocalRemoteStore, LogLevel, RemoteStore,
    UnconfiguredRemoteStore, UploadQueue,
};

/// Load config, letting `--db` win over the file and environment
pub fn load_config(config_path: Option<&Path>, db_path: Option<&Path>) -> Result<KeeperConfig> {
    let mut config = KeeperConfig::load(config_path).context("Failed to load config")?;
    if let Some(db) = db_path {
        config.database = db.to_path_buf();
    }
    Ok(config)
}

/// Handles shared by every command
pub struct App {
    pub config: KeeperConfig,
    pub db: Database,
}

impl App {
    pub fn open(config: KeeperConfig) -> Result<Self> {
        let db = config
            .open_database()
            .with_context(|| format!("Failed to open database {}", config.database.display()))?;
        Ok(Self { config, db })
    }

    pub fn with_db(config: KeeperConfig, db: Database) -> Self {
        Self { config, db }
    }

    fn setting_path(&self, key: &str) -> Result<Option<PathBuf>> {
        Ok(self
            .db
            .get_setting(key)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from))
    }

    /// Image root: `local_receipts_path` setting, else config
    pub fn image_root(&self) -> Result<PathBuf> {
        Ok(self
            .setting_path(keys::LOCAL_RECEIPTS_PATH)?
            .unwrap_or_else(|| self.config.image_root.clone()))
    }

    /// Error log in the `local_logs_path` setting, else the configured dir
    pub fn error_log(&self) -> Result<ErrorLog> {
        let dir = self.setting_path(keys::LOCAL_LOGS_PATH)?;
        Ok(self
            .config
            .error_log(dir.as_deref())
            .with_clock(self.db.clock().clone()))
    }

    pub fn remote_base(&self) -> Result<String> {
        Ok(resolve_remote_base(&self.db, &self.config.remote_base_path)?)
    }

    /// Remote drive for the configured endpoint
    ///
    /// `file://` endpoints mirror into a local directory; no endpoint keeps
    /// uploads queued.
    pub fn remote(&self) -> Result<Arc<dyn RemoteStore>> {
        let remote: Arc<dyn RemoteStore> = match self.config.remote_endpoint.as_deref() {
            Some(endpoint) if endpoint.starts_with("file://") => Arc::new(LocalRemoteStore::new(
                endpoint.trim_start_matches("file://"),
            )),
            Some(endpoint) => Arc::new(
                HttpRemoteStore::new(endpoint, self.db.clone(), self.config.remote_timeout)
                    .context("Failed to set up remote drive")?,
            ),
            None => Arc::new(UnconfiguredRemoteStore),
        };
        Ok(remote)
    }

    pub fn queue(&self) -> Result<Arc<UploadQueue>> {
        let queue = UploadQueue::new(self.db.clone(), self.remote()?)
            .with_policy(self.config.retry)
            .with_put_timeout(self.config.remote_timeout)
            .with_error_log(self.error_log()?);
        Ok(Arc::new(queue))
    }

    pub fn ingestor(&self) -> Result<Ingestor> {
        Ok(Ingestor::new(self.db.clone(), self.queue()?)
            .with_remote_base(self.remote_base()?)
            .with_error_log(self.error_log()?))
    }
}

pub fn cmd_init(app: &App) -> Result<()> {
    println!("🔧 Initializing Receipt Keeper at {}...", app.db.path());

    let image_root = app.image_root()?;
    fs::create_dir_all(&image_root)
        .with_context(|| format!("Failed to create {}", image_root.display()))?;
    let log = app.error_log()?;
    if let Some(dir) = log.path().parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    // Record the resolved paths so other clients find the same tree
    if app.db.get_setting(keys::LOCAL_RECEIPTS_PATH)?.is_none() {
        app.db
            .set_setting(keys::LOCAL_RECEIPTS_PATH, Some(&image_root.to_string_lossy()))?;
    }
    if let Some(dir) = log.path().parent() {
        if app.db.get_setting(keys::LOCAL_LOGS_PATH)?.is_none() {
            app.db
                .set_setting(keys::LOCAL_LOGS_PATH, Some(&dir.to_string_lossy()))?;
        }
    }

    let recovered = app.db.recover_in_flight_uploads()?;

    println!("   Schema version: {}", app.db.schema_version()?);
    println!("   Images: {}", image_root.display());
    println!("   Log: {}", log.path().display());
    if recovered > 0 {
        println!("   Recovered {} interrupted upload(s)", recovered);
    }
    match &app.config.remote_endpoint {
        Some(endpoint) => println!("   Remote drive: {}", endpoint),
        None => println!("   ⚠️  Remote drive: not configured (uploads stay queued)"),
    }

    println!("✅ Receipt Keeper initialized!");
    println!();
    println!("Next steps:");
    println!("  1. Adopt existing images: keeper scan");
    println!("  2. Add a receipt: keeper ingest --image IMG --ocr TEXT");
    println!("  3. Upload: keeper queue drain");

    Ok(())
}

pub fn cmd_migrations(db: &Database) -> Result<()> {
    let records = db.list_migrations()?;
    println!("Schema version {}", db.schema_version()?);
    if records.is_empty() {
        println!("No migrations applied (base schema)");
        return Ok(());
    }

    println!("{}", "─".repeat(70));
    for record in &records {
        println!(
            "  v{:<3} {:<28} {:<30} {}",
            record.version,
            record.id,
            super::truncate(&record.name, 30),
            record.applied_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

pub fn cmd_logs(app: &App, limit: usize, clear: bool) -> Result<()> {
    let log = app.error_log()?;

    if clear {
        log.clear();
        println!("Cleared {}", log.path().display());
        return Ok(());
    }

    let entries = log.read_entries(limit);
    if entries.is_empty() {
        println!("No log entries in {}", log.path().display());
        return Ok(());
    }

    for entry in &entries {
        let marker = match entry.level {
            LogLevel::Error => "❌",
            LogLevel::Info => "ℹ️ ",
        };
        println!(
            "{} {} [{}] {}",
            marker,
            entry.ts.format("%Y-%m-%d %H:%M:%S"),
            entry.source,
            entry.msg
        );
        if let Some(err) = &entry.err_message {
            println!("     {}", err);
        }
        for cause in &entry.stack {
            println!("       caused by: {}", cause);
        }
        if let Some(info) = &entry.info {
            println!("     {}", info);
        }
    }
    Ok(())
}
