//! Error log sink
//!
//! A size-capped diagnostics file the UI reads back. Each entry is a single
//! JSON line:
//!
//! ```text
//! {"ts":"2024-03-09T22:07:40Z","source":"upload","level":"error","msg":"...","err_message":"...","stack":[...],"info":{...}}
//! ```
//!
//! When the file grows past `max_bytes` it is cut down to roughly the last
//! `retain_bytes`, keeping whole lines. Writes are best effort: a failure to
//! write the log is reported through `tracing` and otherwise ignored.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{system_clock, SharedClock};

pub const DEFAULT_MAX_BYTES: u64 = 100 * 1024;
pub const DEFAULT_RETAIN_BYTES: u64 = 50 * 1024;

/// File name used inside the configured log directory
pub const LOG_FILE_NAME: &str = "keeper-errors.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

/// One line of the log file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub source: String,
    pub level: LogLevel,
    pub msg: String,
    #[serde(default)]
    pub err_message: Option<String>,
    /// The error's `source()` chain, outermost first
    #[serde(default)]
    pub stack: Vec<String>,
    #[serde(default)]
    pub info: Option<serde_json::Value>,
}

/// Handle to the error log file
#[derive(Clone)]
pub struct ErrorLog {
    path: PathBuf,
    max_bytes: u64,
    retain_bytes: u64,
    clock: SharedClock,
}

impl std::fmt::Debug for ErrorLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLog")
            .field("path", &self.path)
            .field("max_bytes", &self.max_bytes)
            .field("retain_bytes", &self.retain_bytes)
            .finish()
    }
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: DEFAULT_MAX_BYTES,
            retain_bytes: DEFAULT_RETAIN_BYTES,
            clock: system_clock(),
        }
    }

    /// Log file inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(LOG_FILE_NAME))
    }

    pub fn with_limits(mut self, max_bytes: u64, retain_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self.retain_bytes = retain_bytes.min(max_bytes);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a failure from `source` (a component name such as "upload")
    pub fn log_error(
        &self,
        source: &str,
        err: Option<&dyn std::error::Error>,
        msg: &str,
        info: Option<serde_json::Value>,
    ) {
        let mut stack = Vec::new();
        let mut next = err.and_then(|e| e.source());
        while let Some(cause) = next {
            stack.push(cause.to_string());
            next = cause.source();
        }

        self.append(LogEntry {
            ts: self.clock.now(),
            source: source.to_string(),
            level: LogLevel::Error,
            msg: msg.to_string(),
            err_message: err.map(|e| e.to_string()),
            stack,
            info,
        });
    }

    pub fn log_info(&self, source: &str, msg: &str, info: Option<serde_json::Value>) {
        self.append(LogEntry {
            ts: self.clock.now(),
            source: source.to_string(),
            level: LogLevel::Info,
            msg: msg.to_string(),
            err_message: None,
            stack: Vec::new(),
            info,
        });
    }

    fn append(&self, entry: LogEntry) {
        if let Err(e) = self.try_append(&entry) {
            debug!("Failed to write error log {}: {}", self.path.display(), e);
        }
    }

    fn try_append(&self, entry: &LogEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        let len = file.metadata()?.len();
        drop(file);

        if len > self.max_bytes {
            self.trim()?;
        }
        Ok(())
    }

    /// Keep about the last `retain_bytes`, starting at a line boundary
    fn trim(&self) -> std::io::Result<()> {
        let content = fs::read(&self.path)?;
        let keep_from = content.len().saturating_sub(self.retain_bytes as usize);
        let start = if keep_from == 0 {
            0
        } else {
            // Drop the partial line at the cut
            match content[keep_from..].iter().position(|&b| b == b'\n') {
                Some(pos) => keep_from + pos + 1,
                None => content.len(),
            }
        };
        fs::write(&self.path, &content[start..])
    }

    /// Newest entries first, at most `limit`; unparseable lines are skipped
    pub fn read_entries(&self, limit: usize) -> Vec<LogEntry> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!("Failed to read error log {}: {}", self.path.display(), e);
                }
                return Vec::new();
            }
        };
        content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(limit)
            .collect()
    }

    /// Remove every entry
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!("Failed to clear error log {}: {}", self.path.display(), e),
        }
    }
}
