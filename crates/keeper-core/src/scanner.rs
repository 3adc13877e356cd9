//! Storage scanner
//!
//! Adopts receipt images already on disk that have no row in the store
//! (e.g. after a reinstall, or a crash between capture and insert). Only the
//! `<root>/<YYYY>/<MM>/<DD>-<HHMMSS>.jpg` layout is recognized; anything else
//! in the tree is left alone.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::clock::{captured_at_for, is_receipt_filename};
use crate::db::{keys, Database};
use crate::error::{Error, Result};
use crate::logsink::ErrorLog;
use crate::models::{NewReceipt, PaymentMethod};
use crate::remote::join_remote_path;

pub(crate) static YEAR_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}$").expect("valid regex"));
pub(crate) static MONTH_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}$").expect("valid regex"));

/// What one scan did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Ids of newly inserted receipts
    pub adopted: Vec<i64>,
    /// Candidate files that already had a receipt
    pub skipped: usize,
    /// Candidate files that could not be adopted
    pub errors: usize,
}

impl ScanReport {
    pub fn count(&self) -> usize {
        self.adopted.len()
    }
}

/// Remote base path: the `remote_base_path` setting, else `configured`
pub fn resolve_remote_base(db: &Database, configured: &str) -> Result<String> {
    Ok(db
        .setting_nonempty(keys::REMOTE_BASE_PATH)?
        .unwrap_or_else(|| configured.trim().to_string()))
}

pub struct Scanner {
    db: Database,
    remote_base: String,
    error_log: Option<ErrorLog>,
}

impl Scanner {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            remote_base: String::new(),
            error_log: None,
        }
    }

    pub fn with_remote_base(mut self, base: impl Into<String>) -> Self {
        self.remote_base = base.into();
        self
    }

    pub fn with_error_log(mut self, log: ErrorLog) -> Self {
        self.error_log = Some(log);
        self
    }

    /// Walk `root` and insert a cash receipt for every unknown image
    ///
    /// Fails only when `root` itself cannot be read.
    pub fn scan(&self, root: &Path) -> Result<ScanReport> {
        let root = root.canonicalize().map_err(|e| {
            Error::StorageUnavailable(format!("cannot read {}: {}", root.display(), e))
        })?;
        let years = fs::read_dir(&root).map_err(|e| {
            Error::StorageUnavailable(format!("cannot read {}: {}", root.display(), e))
        })?;

        let mut report = ScanReport::default();

        for year_dir in matching_dirs(years, &YEAR_DIR_RE) {
            let months = match fs::read_dir(&year_dir.path) {
                Ok(months) => months,
                Err(e) => {
                    self.report_error(&mut report, &year_dir.path, &Error::Io(e));
                    continue;
                }
            };

            for month_dir in matching_dirs(months, &MONTH_DIR_RE) {
                let files = match fs::read_dir(&month_dir.path) {
                    Ok(files) => files,
                    Err(e) => {
                        self.report_error(&mut report, &month_dir.path, &Error::Io(e));
                        continue;
                    }
                };

                for entry in files {
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(e) => {
                            self.report_error(&mut report, &month_dir.path, &Error::Io(e));
                            continue;
                        }
                    };
                    let filename = entry.file_name().to_string_lossy().to_string();
                    if !is_receipt_filename(&filename) {
                        continue;
                    }
                    if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                        continue;
                    }

                    let path = entry.path();
                    match self.adopt(&path, &year_dir.name, &month_dir.name, &filename) {
                        Ok(Some(id)) => report.adopted.push(id),
                        Ok(None) => report.skipped += 1,
                        Err(e) => self.report_error(&mut report, &path, &e),
                    }
                }
            }
        }

        if !report.adopted.is_empty() {
            info!(
                "Adopted {} receipt image(s) from {}",
                report.adopted.len(),
                root.display()
            );
            if let Some(log) = &self.error_log {
                log.log_info(
                    "scanner",
                    "adopted orphan images",
                    Some(json!({"root": root.display().to_string(), "count": report.adopted.len()})),
                );
            }
        }
        debug!(
            "Scan of {}: {} adopted, {} known, {} errors",
            root.display(),
            report.adopted.len(),
            report.skipped,
            report.errors
        );

        Ok(report)
    }

    /// Insert one file; `None` when it is already known
    fn adopt(&self, path: &Path, year: &str, month: &str, filename: &str) -> Result<Option<i64>> {
        let file_path = path.to_string_lossy().to_string();
        if self.db.find_receipt_by_path(&file_path)?.is_some() {
            return Ok(None);
        }

        let captured_at = captured_at_for(year, month, filename).ok_or_else(|| {
            Error::ValidationFailed(format!("{}/{}/{} is not a valid capture time", year, month, filename))
        })?;

        let receipt = NewReceipt {
            filename: filename.to_string(),
            file_path: file_path.clone(),
            remote_path: Some(join_remote_path(
                &self.remote_base,
                &format!("{}/{}/{}", year, month, filename),
            )),
            payment_method: PaymentMethod::Cash,
            card_label: None,
            captured_at: Some(captured_at),
            year: year.to_string(),
            month: month.to_string(),
        };

        match self.db.insert_receipt(&receipt) {
            Ok(id) => Ok(Some(id)),
            Err(Error::DuplicatePath(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn report_error(&self, report: &mut ScanReport, path: &Path, err: &Error) {
        report.errors += 1;
        warn!("Skipping {}: {}", path.display(), err);
        if let Some(log) = &self.error_log {
            log.log_error(
                "scanner",
                Some(err),
                "failed to adopt receipt image",
                Some(json!({"path": path.display().to_string()})),
            );
        }
    }
}

struct NamedDir {
    name: String,
    path: PathBuf,
}

/// Subdirectories whose names match `pattern`
fn matching_dirs(entries: fs::ReadDir, pattern: &Regex) -> Vec<NamedDir> {
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            pattern.is_match(&name).then(|| NamedDir {
                name,
                path: entry.path(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::NaiveDate;

    use crate::clock::ManualClock;
    use crate::db::ReceiptFilter;
    use crate::models::UploadStatus;

    fn test_db() -> Database {
        let now = NaiveDate::from_ymd_opt(2024, 3, 20)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        Database::in_memory_with_clock(Arc::new(ManualClock::at(now))).unwrap()
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"jpeg").unwrap();
    }

    #[test]
    fn test_adopts_orphan_image() {
        let db = test_db();
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "2024/03/09-220740.jpg");

        let report = Scanner::new(db.clone()).scan(dir.path()).unwrap();
        assert_eq!(report.count(), 1);

        let receipts = db.list_receipts(&ReceiptFilter::new()).unwrap();
        assert_eq!(receipts.len(), 1);
        let r = &receipts[0];
        assert_eq!(r.year, "2024");
        assert_eq!(r.month, "03");
        assert_eq!(r.filename, "09-220740.jpg");
        assert_eq!(r.remote_path.as_deref(), Some("/2024/03/09-220740.jpg"));
        assert_eq!(r.upload_status, UploadStatus::Pending);
        assert_eq!(r.payment_method, PaymentMethod::Cash);
        assert!(r.card_label.is_none());
        assert_eq!(
            r.captured_at,
            NaiveDate::from_ymd_opt(2024, 3, 9)
                .unwrap()
                .and_hms_opt(22, 7, 40)
                .unwrap()
        );
        assert!(Path::new(&r.file_path).is_absolute());
    }

    #[test]
    fn test_scan_is_idempotent() {
        let db = test_db();
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "2024/03/09-220740.jpg");
        touch(dir.path(), "2024/02/01-080000.jpeg");

        let scanner = Scanner::new(db.clone());
        assert_eq!(scanner.scan(dir.path()).unwrap().count(), 2);

        let again = scanner.scan(dir.path()).unwrap();
        assert_eq!(again.count(), 0);
        assert_eq!(again.skipped, 2);
        assert_eq!(db.count_receipts(&ReceiptFilter::new()).unwrap(), 2);
    }

    #[test]
    fn test_ignores_foreign_files_and_dirs() {
        let db = test_db();
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "2024/03/notes.txt");
        touch(dir.path(), "2024/03/09-220740.png");
        touch(dir.path(), "2024/3/09-220740.jpg");
        touch(dir.path(), "24/03/09-220740.jpg");
        touch(dir.path(), "backup/2024/03/09-220740.jpg");
        touch(dir.path(), "2024/03/IMG_0001.jpg");

        let report = Scanner::new(db).scan(dir.path()).unwrap();
        assert_eq!(report, ScanReport::default());
    }

    #[test]
    fn test_invalid_dates_are_counted_not_fatal() {
        let db = test_db();
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "2024/02/31-120000.jpg");
        touch(dir.path(), "2024/13/01-120000.jpg");
        touch(dir.path(), "2024/02/28-120000.jpg");

        let log = ErrorLog::in_dir(&dir.path().join("logs"));
        let report = Scanner::new(db)
            .with_error_log(log.clone())
            .scan(dir.path())
            .unwrap();
        assert_eq!(report.count(), 1);
        assert_eq!(report.errors, 2);
        assert_eq!(
            log.read_entries(10)
                .iter()
                .filter(|e| e.source == "scanner" && e.err_message.is_some())
                .count(),
            2
        );
    }

    #[test]
    fn test_remote_base_prefix() {
        let db = test_db();
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "2024/03/09-220740.jpg");

        db.set_setting(keys::REMOTE_BASE_PATH, Some("/Receipts")).unwrap();
        let base = resolve_remote_base(&db, "/ignored").unwrap();
        assert_eq!(base, "/Receipts");

        Scanner::new(db.clone())
            .with_remote_base(base)
            .scan(dir.path())
            .unwrap();
        let r = &db.list_receipts(&ReceiptFilter::new()).unwrap()[0];
        assert_eq!(r.remote_path.as_deref(), Some("/Receipts/2024/03/09-220740.jpg"));
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let db = test_db();
        let dir = tempfile::tempdir().unwrap();
        let err = Scanner::new(db)
            .scan(&dir.path().join("nope"))
            .unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }
}
