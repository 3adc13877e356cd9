//! Ingestion orchestrator
//!
//! Ties one captured image to the store, the extractor and the upload
//! queue. Insert and extraction happen before `ingest` returns; the enqueue
//! runs on a blocking task whose handle is returned to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{captured_at_for, filename_for, is_receipt_filename, ymd};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::extract::{extract_at, ExtractionResult};
use crate::logsink::ErrorLog;
use crate::models::{EnqueueOutcome, NewReceipt, PaymentMethod, UploadStatus};
use crate::remote::join_remote_path;
use crate::scanner::{ScanReport, Scanner, MONTH_DIR_RE, YEAR_DIR_RE};
use crate::upload::UploadQueue;

/// A freshly captured receipt image
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub image_path: PathBuf,
    pub ocr_text: String,
    pub payment_method: PaymentMethod,
    pub card_label: Option<String>,
}

/// Result of [`Ingestor::ingest`]
#[derive(Debug)]
pub struct Ingested {
    pub receipt_id: i64,
    /// False when the image was already in the store
    pub created: bool,
    /// Background enqueue; `None` when the receipt is already uploaded
    pub upload: Option<JoinHandle<Result<EnqueueOutcome>>>,
}

/// Result of [`Ingestor::reconcile`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub scan: ScanReport,
    /// Receipts newly queued for upload
    pub queued: usize,
}

/// Where an image belongs in the `<YYYY>/<MM>/<filename>` layout
#[derive(Debug, Clone, PartialEq)]
struct Placement {
    year: String,
    month: String,
    filename: String,
    captured_at: Option<chrono::NaiveDateTime>,
}

pub struct Ingestor {
    db: Database,
    queue: Arc<UploadQueue>,
    remote_base: String,
    error_log: Option<ErrorLog>,
}

impl Ingestor {
    pub fn new(db: Database, queue: Arc<UploadQueue>) -> Self {
        Self {
            db,
            queue,
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

    /// Store, extract and queue one image
    ///
    /// Re-ingesting a known path returns the existing receipt without
    /// extracting again. A failure to save the extracted fields is logged
    /// and does not fail the ingest.
    pub async fn ingest(&self, request: IngestRequest) -> Result<Ingested> {
        let file_path = absolute_path(&request.image_path);
        let placement = self.placement(&file_path);
        let file_path = file_path.to_string_lossy().to_string();
        let remote_path = join_remote_path(
            &self.remote_base,
            &format!("{}/{}/{}", placement.year, placement.month, placement.filename),
        );

        let receipt = NewReceipt {
            filename: placement.filename.clone(),
            file_path: file_path.clone(),
            remote_path: Some(remote_path.clone()),
            payment_method: request.payment_method,
            card_label: request.card_label.clone(),
            captured_at: placement.captured_at,
            year: placement.year.clone(),
            month: placement.month.clone(),
        };

        let (receipt_id, created, remote_path) = match self.db.insert_receipt(&receipt) {
            Ok(id) => (id, true, remote_path),
            Err(Error::DuplicatePath(path)) => {
                let existing = self
                    .db
                    .find_receipt_by_path(&path)?
                    .ok_or_else(|| Error::NotFound(format!("receipt for {}", path)))?;
                debug!("Re-ingest of {} returns receipt {}", path, existing.id);
                if existing.upload_status == UploadStatus::Success {
                    return Ok(Ingested {
                        receipt_id: existing.id,
                        created: false,
                        upload: None,
                    });
                }
                let remote = existing.remote_path.unwrap_or(remote_path);
                (existing.id, false, remote)
            }
            Err(e) => return Err(e),
        };

        if created {
            let today = self.db.clock().local_now().date();
            let extraction = extract_at(&request.ocr_text, today);
            if let Err(e) = self.db.patch_ocr(receipt_id, &extraction.to_patch()) {
                warn!("Failed to save OCR fields for receipt {}: {}", receipt_id, e);
                if let Some(log) = &self.error_log {
                    log.log_error(
                        "ingest",
                        Some(&e),
                        "failed to save OCR fields",
                        Some(json!({"receipt_id": receipt_id, "file_path": file_path})),
                    );
                }
            }
            info!(
                "Ingested receipt {} ({}), confidence {:.2}",
                receipt_id,
                placement.filename,
                extraction.overall_confidence()
            );
        }

        let queue = self.queue.clone();
        let upload = tokio::task::spawn_blocking(move || queue.enqueue(&file_path, &remote_path));

        Ok(Ingested {
            receipt_id,
            created,
            upload: Some(upload),
        })
    }

    /// Adopt orphan images under `root`, then queue every pending receipt
    pub fn reconcile(&self, root: &Path) -> Result<ReconcileReport> {
        let mut scanner = Scanner::new(self.db.clone()).with_remote_base(self.remote_base.clone());
        if let Some(log) = &self.error_log {
            scanner = scanner.with_error_log(log.clone());
        }
        let scan = scanner.scan(root)?;
        let queued = self.queue.enqueue_pending_receipts()?;
        Ok(ReconcileReport { scan, queued })
    }

    /// Run extraction again over the stored OCR text
    pub fn reextract(&self, receipt_id: i64) -> Result<ExtractionResult> {
        let receipt = self
            .db
            .get_receipt(receipt_id)?
            .ok_or_else(|| Error::NotFound(format!("receipt {}", receipt_id)))?;
        let text = receipt.raw_ocr_text.ok_or_else(|| {
            Error::ValidationFailed(format!("receipt {} has no OCR text", receipt_id))
        })?;

        let today = self.db.clock().local_now().date();
        let extraction = extract_at(&text, today);
        self.db.patch_ocr(receipt_id, &extraction.to_patch())?;
        Ok(extraction)
    }

    /// Take year, month and filename from `<YYYY>/<MM>/<DD-HHMMSS>.jpg`, else from now
    fn placement(&self, path: &Path) -> Placement {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty());
        let month = path.parent().and_then(dir_name);
        let year = path.parent().and_then(Path::parent).and_then(dir_name);

        if let (Some(filename), Some(month), Some(year)) = (&filename, &month, &year) {
            if YEAR_DIR_RE.is_match(year)
                && MONTH_DIR_RE.is_match(month)
                && is_receipt_filename(filename)
            {
                if let Some(captured_at) = captured_at_for(year, month, filename) {
                    return Placement {
                        year: year.clone(),
                        month: month.clone(),
                        filename: filename.clone(),
                        captured_at: Some(captured_at),
                    };
                }
            }
        }

        let now = self.db.clock().local_now();
        let parts = ymd(now);
        Placement {
            year: parts.year,
            month: parts.month,
            filename: filename.unwrap_or_else(|| filename_for(now, "jpg")),
            captured_at: None,
        }
    }
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}

/// Canonical path when the file exists, else made absolute lexically
fn absolute_path(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{NaiveDate, NaiveDateTime};

    use crate::clock::ManualClock;
    use crate::db::ReceiptFilter;
    use crate::remote::MockRemoteStore;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 20)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn setup() -> (Ingestor, Database, tempfile::TempDir) {
        let db = Database::in_memory_with_clock(Arc::new(ManualClock::at(now()))).unwrap();
        let queue = Arc::new(UploadQueue::new(db.clone(), Arc::new(MockRemoteStore::new())));
        (Ingestor::new(db.clone(), queue), db, tempfile::tempdir().unwrap())
    }

    fn image(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"jpeg").unwrap();
        path
    }

    fn request(path: PathBuf, text: &str) -> IngestRequest {
        IngestRequest {
            image_path: path,
            ocr_text: text.to_string(),
            payment_method: PaymentMethod::Card,
            card_label: Some("Visa 4242".to_string()),
        }
    }

    #[tokio::test]
    async fn test_placement_from_layout() {
        let (ingestor, db, dir) = setup();
        let path = image(dir.path(), "2024/03/09-220740.jpg");

        let ingested = ingestor
            .ingest(request(path, "CORNER STORE\nTOTAL 12.50"))
            .await
            .unwrap();
        assert!(ingested.created);
        assert_eq!(
            ingested.upload.unwrap().await.unwrap().unwrap(),
            EnqueueOutcome::Queued
        );

        let r = db.get_receipt(ingested.receipt_id).unwrap().unwrap();
        assert_eq!(r.year, "2024");
        assert_eq!(r.month, "03");
        assert_eq!(r.filename, "09-220740.jpg");
        assert_eq!(r.remote_path.as_deref(), Some("/2024/03/09-220740.jpg"));
        assert_eq!(r.card_label.as_deref(), Some("Visa 4242"));
        assert_eq!(r.total_amount, Some(12.50));
        assert!(r.is_extracted());
    }

    #[tokio::test]
    async fn test_placement_from_clock() {
        let (ingestor, db, dir) = setup();
        let path = image(dir.path(), "inbox/scan.jpg");

        let ingested = ingestor
            .with_remote_base("/Receipts")
            .ingest(request(path, ""))
            .await
            .unwrap();

        let r = db.get_receipt(ingested.receipt_id).unwrap().unwrap();
        assert_eq!((r.year.as_str(), r.month.as_str()), ("2024", "03"));
        assert_eq!(r.filename, "scan.jpg");
        assert_eq!(r.remote_path.as_deref(), Some("/Receipts/2024/03/scan.jpg"));
        assert_eq!(r.captured_at, now());
        // Empty OCR text still marks extraction as done
        assert!(r.is_extracted());
        assert!(r.vendor_name.is_none());
    }

    #[tokio::test]
    async fn test_placement_ignores_malformed_year_dir() {
        let (ingestor, db, dir) = setup();
        let path = image(dir.path(), "12024/03/09-220740.jpg");

        let ingested = ingestor.ingest(request(path, "")).await.unwrap();

        let r = db.get_receipt(ingested.receipt_id).unwrap().unwrap();
        assert_eq!((r.year.as_str(), r.month.as_str()), ("2024", "03"));
        assert_eq!(r.filename, "09-220740.jpg");
        assert_eq!(r.captured_at, now());
    }

    #[tokio::test]
    async fn test_reingest_returns_existing_id() {
        let (ingestor, db, dir) = setup();
        let path = image(dir.path(), "2024/03/09-220740.jpg");

        let first = ingestor
            .ingest(request(path.clone(), "SHOP\nTOTAL 5.00"))
            .await
            .unwrap();
        first.upload.unwrap().await.unwrap().unwrap();

        let second = ingestor
            .ingest(request(path, "OTHER\nTOTAL 99.00"))
            .await
            .unwrap();
        assert_eq!(second.receipt_id, first.receipt_id);
        assert!(!second.created);
        assert_eq!(
            second.upload.unwrap().await.unwrap().unwrap(),
            EnqueueOutcome::Coalesced
        );

        assert_eq!(db.count_receipts(&ReceiptFilter::new()).unwrap(), 1);
        let r = db.get_receipt(first.receipt_id).unwrap().unwrap();
        assert_eq!(r.total_amount, Some(5.00));
    }

    #[tokio::test]
    async fn test_reextract_uses_stored_text() {
        let (ingestor, db, dir) = setup();
        let path = image(dir.path(), "2024/03/09-220740.jpg");
        let ingested = ingestor
            .ingest(request(path, "SHOP\nTOTAL 5.00"))
            .await
            .unwrap();

        db.conn()
            .unwrap()
            .execute(
                "UPDATE receipts SET total_amount = NULL WHERE id = ?",
                [ingested.receipt_id],
            )
            .unwrap();

        let result = ingestor.reextract(ingested.receipt_id).unwrap();
        assert_eq!(result.amount.value, Some(5.00));
        let r = db.get_receipt(ingested.receipt_id).unwrap().unwrap();
        assert_eq!(r.total_amount, Some(5.00));

        assert!(matches!(ingestor.reextract(9999), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reconcile_adopts_and_queues() {
        let (ingestor, db, dir) = setup();
        image(dir.path(), "2024/03/09-220740.jpg");
        image(dir.path(), "2024/03/10-101010.jpg");

        let report = ingestor.reconcile(dir.path()).unwrap();
        assert_eq!(report.scan.count(), 2);
        assert_eq!(report.queued, 2);
        assert_eq!(db.queue_stats().unwrap().pending, 2);

        let again = ingestor.reconcile(dir.path()).unwrap();
        assert_eq!(again.scan.count(), 0);
        assert_eq!(again.queued, 0);
    }
}
