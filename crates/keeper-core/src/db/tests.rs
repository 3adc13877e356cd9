//! Database tests

use super::*;
use crate::models::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{NaiveDate, NaiveDateTime};
    use rusqlite::params;

    use crate::clock::{Clock, ManualClock};

    fn ts(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn test_db() -> (Database, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(ts(2024, 1, 20, 9, 0, 0)));
        let db = Database::in_memory_with_clock(clock.clone()).unwrap();
        (db, clock)
    }

    fn new_receipt(path: &str, captured: NaiveDateTime) -> NewReceipt {
        let parts = crate::clock::ymd(captured);
        let filename = crate::clock::filename_for(captured, "jpg");
        NewReceipt {
            filename: filename.clone(),
            file_path: path.to_string(),
            remote_path: Some(format!("/{}/{}/{}", parts.year, parts.month, filename)),
            payment_method: PaymentMethod::Cash,
            card_label: None,
            captured_at: Some(captured),
            year: parts.year,
            month: parts.month,
        }
    }

    fn column_count(db: &Database, table: &str, column: &str) -> i64 {
        db.conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
                params![table, column],
                |row| row.get(0),
            )
            .unwrap()
    }

    fn broken_migration(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
        conn.execute_batch("CREATE TABLE half_done (id INTEGER); SELECT * FROM no_such_table;")
    }

    const BROKEN: Migration = Migration {
        id: "999_broken",
        name: "Always fails",
        version: 99,
        apply: broken_migration,
    };

    // ========== Open & migrations ==========

    #[test]
    fn test_in_memory_db() {
        let (db, _) = test_db();
        assert!(db.list_receipts(&ReceiptFilter::new()).unwrap().is_empty());
        assert_eq!(db.schema_version().unwrap(), 5);
    }

    #[test]
    fn test_all_migrations_recorded_in_order() {
        let (db, _) = test_db();
        let records = db.list_migrations().unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "001_add_ocr_fields",
                "002_add_upload_queue",
                "003_add_remote_tracking",
                "004_add_receipt_indexes"
            ]
        );
        assert_eq!(records[0].version, 2);
        assert_eq!(
            records[0].applied_at.naive_utc(),
            ts(2024, 1, 20, 9, 0, 0)
        );
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let (db, clock) = test_db();
        let before = db.list_migrations().unwrap();

        let reopened = Database::open(db.path(), clock, MigrationMode::Strict).unwrap();
        assert_eq!(reopened.list_migrations().unwrap(), before);
    }

    #[test]
    fn test_upgrade_from_base_schema() {
        let path = Database::scratch_path();
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch(migrations::BASE_SCHEMA).unwrap();
            conn.execute(
                "INSERT INTO receipts (filename, file_path, remote_path, payment_method, captured_at, year, month)
                 VALUES ('09-220740.jpg', '/r/2024/03/09-220740.jpg', '/2024/03/09-220740.jpg', 'cash',
                         '2024-03-09 22:07:40', '2024', '03')",
                [],
            )
            .unwrap();
        }

        let db = Database::new(&path).unwrap();
        for column in ["vendor_name", "currency", "field_confidences", "remote_id"] {
            assert_eq!(column_count(&db, "receipts", column), 1, "{}", column);
        }

        let receipts = db.list_receipts(&ReceiptFilter::new()).unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].currency, "USD");
        assert!(!receipts[0].is_extracted());
    }

    #[test]
    fn test_ocr_migration_applied_twice_adds_columns_once() {
        let path = Database::scratch_path();
        let mut conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(migrations::BASE_SCHEMA).unwrap();

        let first = &MIGRATIONS[..1];
        let applied =
            migrations::run_migrations(&mut conn, first, MigrationMode::Strict, "2024-01-01 00:00:00")
                .unwrap();
        assert_eq!(applied, vec!["001_add_ocr_fields".to_string()]);
        let applied =
            migrations::run_migrations(&mut conn, first, MigrationMode::Strict, "2024-01-02 00:00:00")
                .unwrap();
        assert!(applied.is_empty());

        // Running the apply function directly is also harmless
        (MIGRATIONS[0].apply)(&conn).unwrap();

        let entries: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(entries, 1);
        let vendor_columns: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('receipts') WHERE name = 'vendor_name'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(vendor_columns, 1);
    }

    #[test]
    fn test_strict_migration_failure_rolls_back() {
        let path = Database::scratch_path();
        let migrations = [MIGRATIONS[0], BROKEN];

        let err = Database::open_with_migrations(
            &path,
            crate::clock::system_clock(),
            MigrationMode::Strict,
            &migrations,
        )
        .unwrap_err();
        match err {
            Error::MigrationFailed { id, .. } => assert_eq!(id, "999_broken"),
            other => panic!("expected MigrationFailed, got {:?}", other),
        }

        let conn = rusqlite::Connection::open(&path).unwrap();
        let recorded: Vec<String> = conn
            .prepare("SELECT id FROM migrations")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(recorded, vec!["001_add_ocr_fields".to_string()]);

        let half_done: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'half_done'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(half_done, 0);
    }

    #[test]
    fn test_lenient_migration_failure_continues() {
        let path = Database::scratch_path();
        let mut migrations = vec![BROKEN];
        migrations.extend_from_slice(MIGRATIONS);

        let db = Database::open_with_migrations(
            &path,
            crate::clock::system_clock(),
            MigrationMode::Lenient,
            &migrations,
        )
        .unwrap();
        let ids: Vec<String> = db.list_migrations().unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), 4);
        assert!(!ids.contains(&"999_broken".to_string()));
    }

    #[test]
    fn test_open_missing_directory_is_storage_unavailable() {
        let err = Database::new("/nonexistent-keeper-dir/sub/keeper.db").unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)), "{:?}", err);
    }

    // ========== Receipts ==========

    #[test]
    fn test_insert_and_get_round_trip() {
        let (db, clock) = test_db();
        let captured = ts(2024, 1, 15, 14, 32, 0);
        let new = new_receipt("/r/2024/01/15-143200.jpg", captured);

        let id = db.insert_receipt(&new).unwrap();
        assert!(id > 0);

        let listed = db.list_receipts(&ReceiptFilter::new().id(id)).unwrap();
        assert_eq!(listed.len(), 1);
        let r = &listed[0];
        assert_eq!(r.filename, new.filename);
        assert_eq!(r.file_path, new.file_path);
        assert_eq!(r.remote_path, new.remote_path);
        assert_eq!(r.payment_method, PaymentMethod::Cash);
        assert_eq!(r.captured_at, captured);
        assert_eq!(r.created_at, clock.now());
        assert_eq!(r.year, "2024");
        assert_eq!(r.month, "01");
        assert_eq!(r.upload_status, UploadStatus::Pending);
        assert_eq!(r.currency, "USD");
        assert!(r.extracted_at.is_none());

        assert_eq!(db.get_receipt(id).unwrap().as_ref(), Some(r));
        assert_eq!(
            db.find_receipt_by_path("/r/2024/01/15-143200.jpg").unwrap().map(|r| r.id),
            Some(id)
        );
        assert!(db.get_receipt(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let (db, _) = test_db();
        let new = new_receipt("/r/2024/01/15-143200.jpg", ts(2024, 1, 15, 14, 32, 0));
        db.insert_receipt(&new).unwrap();

        let err = db.insert_receipt(&new).unwrap_err();
        assert!(matches!(err, Error::DuplicatePath(p) if p == "/r/2024/01/15-143200.jpg"));
        assert_eq!(db.count_receipts(&ReceiptFilter::new()).unwrap(), 1);
    }

    #[test]
    fn test_year_month_must_agree_with_capture() {
        let (db, _) = test_db();
        let mut new = new_receipt("/r/a.jpg", ts(2024, 1, 15, 14, 32, 0));
        new.month = "02".to_string();
        assert!(matches!(
            db.insert_receipt(&new),
            Err(Error::ValidationFailed(_))
        ));

        new.month = "13".to_string();
        assert!(matches!(
            db.insert_receipt(&new),
            Err(Error::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_captured_at_defaults() {
        let (db, _) = test_db();

        // Same month as the clock: captured now
        let mut new = new_receipt("/r/now.jpg", ts(2024, 1, 1, 0, 0, 0));
        new.captured_at = None;
        let id = db.insert_receipt(&new).unwrap();
        assert_eq!(
            db.get_receipt(id).unwrap().unwrap().captured_at,
            ts(2024, 1, 20, 9, 0, 0)
        );

        // Different month: first of that month
        let mut new = new_receipt("/r/old.jpg", ts(2023, 11, 1, 0, 0, 0));
        new.captured_at = None;
        let id = db.insert_receipt(&new).unwrap();
        assert_eq!(
            db.get_receipt(id).unwrap().unwrap().captured_at,
            ts(2023, 11, 1, 0, 0, 0)
        );
    }

    #[test]
    fn test_cash_receipts_drop_card_label() {
        let (db, _) = test_db();
        let mut new = new_receipt("/r/cash.jpg", ts(2024, 1, 15, 14, 32, 0));
        new.card_label = Some("Visa 1234".to_string());
        let id = db.insert_receipt(&new).unwrap();
        assert!(db.get_receipt(id).unwrap().unwrap().card_label.is_none());

        let mut new = new_receipt("/r/card.jpg", ts(2024, 1, 15, 14, 33, 0));
        new.payment_method = PaymentMethod::Card;
        new.card_label = Some("Visa 1234".to_string());
        let id = db.insert_receipt(&new).unwrap();
        assert_eq!(
            db.get_receipt(id).unwrap().unwrap().card_label.as_deref(),
            Some("Visa 1234")
        );
    }

    #[test]
    fn test_patch_ocr() {
        let (db, clock) = test_db();
        let id = db
            .insert_receipt(&new_receipt("/r/a.jpg", ts(2024, 1, 15, 14, 32, 0)))
            .unwrap();

        let patch = OcrPatch {
            vendor_name: Some("STARBUCKS COFFEE".to_string()),
            total_amount: Some(7.63),
            tax_amount: Some(0.68),
            invoice_number: Some("TXN123456".to_string()),
            currency: None,
            receipt_date: NaiveDate::from_ymd_opt(2024, 1, 15),
            raw_ocr_text: Some("STARBUCKS COFFEE".to_string()),
            ocr_confidence: Some(0.84),
            field_confidences: Some(FieldConfidences {
                date: 0.95,
                amount: 0.85,
                tax: 0.90,
                invoice_number: 0.75,
                vendor: 0.70,
            }),
        };
        db.patch_ocr(id, &patch).unwrap();
        db.patch_ocr(id, &patch).unwrap();

        let r = db.get_receipt(id).unwrap().unwrap();
        assert_eq!(r.vendor_name.as_deref(), Some("STARBUCKS COFFEE"));
        assert_eq!(r.total_amount, Some(7.63));
        assert_eq!(r.tax_amount, Some(0.68));
        assert_eq!(r.currency, "USD");
        assert_eq!(r.receipt_date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(r.field_confidences.unwrap().vendor, 0.70);
        assert_eq!(r.extracted_at, Some(clock.now()));
        assert_eq!(r.upload_status, UploadStatus::Pending);
    }

    #[test]
    fn test_patch_ocr_validation() {
        let (db, _) = test_db();
        let id = db
            .insert_receipt(&new_receipt("/r/a.jpg", ts(2024, 1, 15, 14, 32, 0)))
            .unwrap();

        let bad = [
            OcrPatch {
                total_amount: Some(-1.0),
                ..Default::default()
            },
            OcrPatch {
                total_amount: Some(5.0),
                tax_amount: Some(6.0),
                ..Default::default()
            },
            OcrPatch {
                ocr_confidence: Some(1.5),
                ..Default::default()
            },
            OcrPatch {
                currency: Some("usd".to_string()),
                ..Default::default()
            },
        ];
        for patch in &bad {
            assert!(
                matches!(db.patch_ocr(id, patch), Err(Error::ValidationFailed(_))),
                "{:?}",
                patch
            );
        }
        assert!(!db.get_receipt(id).unwrap().unwrap().is_extracted());

        assert!(matches!(
            db.patch_ocr(id + 1, &OcrPatch::default()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_set_upload_status_transitions() {
        let (db, _) = test_db();
        let mut new = new_receipt("/r/a.jpg", ts(2024, 1, 15, 14, 32, 0));
        new.remote_path = None;
        let id = db.insert_receipt(&new).unwrap();

        // pending -> success skips uploading
        assert!(matches!(
            db.set_upload_status(id, UploadStatus::Success, Some("/2024/01/a.jpg")),
            Err(Error::ValidationFailed(_))
        ));

        db.set_upload_status(id, UploadStatus::Uploading, None).unwrap();
        // success without any remote path
        assert!(matches!(
            db.set_upload_status(id, UploadStatus::Success, None),
            Err(Error::ValidationFailed(_))
        ));

        db.set_upload_status(id, UploadStatus::Success, Some("/2024/01/a.jpg"))
            .unwrap();
        let r = db.get_receipt(id).unwrap().unwrap();
        assert_eq!(r.upload_status, UploadStatus::Success);
        assert_eq!(r.remote_path.as_deref(), Some("/2024/01/a.jpg"));

        // success is terminal
        assert!(db
            .set_upload_status(id, UploadStatus::Pending, None)
            .is_err());
    }

    #[test]
    fn test_update_receipt() {
        let (db, _) = test_db();
        let id = db
            .insert_receipt(&new_receipt("/r/a.jpg", ts(2024, 1, 15, 14, 32, 0)))
            .unwrap();

        let updated = db
            .update_receipt(
                id,
                &ReceiptUpdate {
                    vendor_name: Some(Some("Blue Bottle".to_string())),
                    total_amount: Some(Some(12.0)),
                    tax_amount: Some(Some(1.0)),
                    category: Some(Some("meals".to_string())),
                    currency: Some("eur".to_string()),
                    payment_method: Some(PaymentMethod::Card),
                    card_label: Some(Some("Amex".to_string())),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.currency, "EUR");
        assert_eq!(db.get_receipt(id).unwrap().unwrap(), updated);

        // Clearing a value
        let updated = db
            .update_receipt(
                id,
                &ReceiptUpdate {
                    category: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated.category.is_none());
        assert_eq!(updated.vendor_name.as_deref(), Some("Blue Bottle"));

        // tax above total is rejected and nothing changes
        let err = db
            .update_receipt(
                id,
                &ReceiptUpdate {
                    tax_amount: Some(Some(50.0)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));
        assert_eq!(db.get_receipt(id).unwrap().unwrap().tax_amount, Some(1.0));
    }

    #[test]
    fn test_delete_receipt_drops_queue_items() {
        let (db, _) = test_db();
        let id = db
            .insert_receipt(&new_receipt("/r/a.jpg", ts(2024, 1, 15, 14, 32, 0)))
            .unwrap();
        db.enqueue_upload("/r/a.jpg", "/2024/01/15-143200.jpg").unwrap();

        assert!(db.delete_receipt(id).unwrap());
        assert!(db.get_receipt(id).unwrap().is_none());
        assert!(db.list_queue_items(None).unwrap().is_empty());
        assert!(!db.delete_receipt(id).unwrap());
    }

    #[test]
    fn test_list_filters_and_order() {
        let (db, _) = test_db();
        let a = db
            .insert_receipt(&new_receipt("/r/a.jpg", ts(2024, 1, 10, 8, 0, 0)))
            .unwrap();
        let b = db
            .insert_receipt(&new_receipt("/r/b.jpg", ts(2024, 1, 12, 8, 0, 0)))
            .unwrap();
        let c = db
            .insert_receipt(&new_receipt("/r/c.jpg", ts(2023, 12, 31, 23, 59, 59)))
            .unwrap();

        db.patch_ocr(
            a,
            &OcrPatch {
                vendor_name: Some("Corner Bakery".to_string()),
                total_amount: Some(4.5),
                ..Default::default()
            },
        )
        .unwrap();
        db.patch_ocr(
            b,
            &OcrPatch {
                vendor_name: Some("Hardware Store".to_string()),
                total_amount: Some(45.0),
                invoice_number: Some("INV-77".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        db.update_receipt(
            b,
            &ReceiptUpdate {
                category: Some(Some("supplies".to_string())),
                ..Default::default()
            },
        )
        .unwrap();

        let ids = |f: ReceiptFilter| -> Vec<i64> {
            db.list_receipts(&f).unwrap().into_iter().map(|r| r.id).collect()
        };

        assert_eq!(ids(ReceiptFilter::new()), vec![b, a, c]);
        assert_eq!(ids(ReceiptFilter::new().search(Some("bakery"))), vec![a]);
        assert_eq!(ids(ReceiptFilter::new().search(Some("inv-77"))), vec![b]);
        assert_eq!(ids(ReceiptFilter::new().search(Some("c.jpg"))), Vec::<i64>::new());
        assert_eq!(ids(ReceiptFilter::new().category(Some("supplies"))), vec![b]);
        assert_eq!(ids(ReceiptFilter::new().amount_range(1.0, 10.0)), vec![a]);
        assert_eq!(
            ids(ReceiptFilter::new().date_range(
                NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
            )),
            vec![a, c]
        );
        assert_eq!(
            ids(ReceiptFilter::new().upload_status(Some(UploadStatus::Pending))),
            vec![b, a, c]
        );
        assert_eq!(ids(ReceiptFilter::new().limit(Some(1))), vec![b]);
        assert_eq!(
            db.count_receipts(&ReceiptFilter::new().limit(Some(1))).unwrap(),
            3
        );
    }

    // ========== Settings ==========

    #[test]
    fn test_settings_round_trip() {
        let (db, _) = test_db();
        assert!(db.get_setting("remote_base_path").unwrap().is_none());

        db.set_setting("remote_base_path", Some("/Receipts")).unwrap();
        assert_eq!(
            db.get_setting("remote_base_path").unwrap().as_deref(),
            Some("/Receipts")
        );

        db.set_setting("remote_base_path", Some("/Other")).unwrap();
        assert_eq!(
            db.get_setting("remote_base_path").unwrap().as_deref(),
            Some("/Other")
        );

        db.set_setting("remote_base_path", None).unwrap();
        assert!(db.get_setting("remote_base_path").unwrap().is_none());
        assert!(db.list_settings().unwrap().is_empty());
    }

    #[test]
    fn test_typed_settings() {
        let (db, _) = test_db();
        assert!(!db.setup_completed().unwrap());
        db.set_setup_completed(true).unwrap();
        assert!(db.setup_completed().unwrap());

        let cards = serde_json::json!([{"label": "Visa 1234"}]);
        db.set_payment_cards(&cards).unwrap();
        assert_eq!(db.payment_cards().unwrap(), Some(cards));

        assert!(db.remote_credentials().unwrap().is_none());
        let creds = RemoteCredentials {
            access_token: "tok".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(ts(2024, 1, 20, 10, 0, 0).and_utc()),
        };
        db.set_remote_credentials(&creds).unwrap();
        assert_eq!(db.remote_credentials().unwrap(), Some(creds.clone()));
        assert!(creds.is_valid_at(ts(2024, 1, 20, 9, 0, 0).and_utc()));
        assert!(!creds.is_valid_at(ts(2024, 1, 20, 11, 0, 0).and_utc()));

        db.clear_remote_credentials().unwrap();
        assert!(db.remote_credentials().unwrap().is_none());
        let keys: Vec<String> = db.list_settings().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["payment_cards", "setup_completed"]);
    }

    // ========== Upload queue ==========

    #[test]
    fn test_enqueue_coalesces_pairs() {
        let (db, _) = test_db();
        assert_eq!(
            db.enqueue_upload("/r/a.jpg", "/2024/01/a.jpg").unwrap(),
            EnqueueOutcome::Queued
        );
        assert_eq!(
            db.enqueue_upload("/r/a.jpg", "/2024/01/a.jpg").unwrap(),
            EnqueueOutcome::Coalesced
        );
        assert_eq!(
            db.enqueue_upload("/r/a.jpg", "/elsewhere/a.jpg").unwrap(),
            EnqueueOutcome::Queued
        );
        assert_eq!(db.queue_stats().unwrap().pending, 2);
    }

    #[test]
    fn test_claim_is_fifo_and_serial() {
        let (db, _) = test_db();
        let a = db
            .insert_receipt(&new_receipt("/r/a.jpg", ts(2024, 1, 10, 8, 0, 0)))
            .unwrap();
        db.enqueue_upload("/r/a.jpg", "/2024/01/a.jpg").unwrap();
        db.enqueue_upload("/r/b.jpg", "/2024/01/b.jpg").unwrap();

        let first = db.claim_next_upload().unwrap().unwrap();
        assert_eq!(first.local_path, "/r/a.jpg");
        assert_eq!(first.state, QueueState::InFlight);
        assert_eq!(
            db.get_receipt(a).unwrap().unwrap().upload_status,
            UploadStatus::Uploading
        );

        // Another drain sees the in-flight item and backs off
        assert!(db.claim_next_upload().unwrap().is_none());

        db.complete_upload(&first, "/2024/01/a.jpg", Some("file-1"), Some("https://drive/file-1"))
            .unwrap();
        let r = db.get_receipt(a).unwrap().unwrap();
        assert_eq!(r.upload_status, UploadStatus::Success);
        assert_eq!(r.remote_id.as_deref(), Some("file-1"));

        let second = db.claim_next_upload().unwrap().unwrap();
        assert_eq!(second.local_path, "/r/b.jpg");
    }

    #[test]
    fn test_complete_upload_drops_other_remote_paths() {
        let (db, _) = test_db();
        let a = db
            .insert_receipt(&new_receipt("/r/a.jpg", ts(2024, 1, 15, 10, 0, 0)))
            .unwrap();
        db.enqueue_upload("/r/a.jpg", "/2024/01/15-100000.jpg").unwrap();
        db.enqueue_upload("/r/a.jpg", "/Receipts/2024/01/15-100000.jpg")
            .unwrap();
        db.enqueue_upload("/r/b.jpg", "/2024/01/b.jpg").unwrap();

        let item = db.claim_next_upload().unwrap().unwrap();
        db.complete_upload(&item, &item.remote_path, None, None).unwrap();

        let r = db.get_receipt(a).unwrap().unwrap();
        assert_eq!(r.upload_status, UploadStatus::Success);
        assert_eq!(r.remote_path.as_deref(), Some("/2024/01/15-100000.jpg"));

        let remaining = db.list_queue_items(None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].local_path, "/r/b.jpg");
    }

    #[test]
    fn test_release_returns_claim_to_pending() {
        let (db, _) = test_db();
        let a = db
            .insert_receipt(&new_receipt("/r/a.jpg", ts(2024, 1, 10, 8, 0, 0)))
            .unwrap();
        db.enqueue_upload("/r/a.jpg", "/2024/01/a.jpg").unwrap();

        let item = db.claim_next_upload().unwrap().unwrap();
        db.release_upload(&item).unwrap();

        let stored = db.get_queue_item(item.id).unwrap().unwrap();
        assert_eq!(stored.state, QueueState::Pending);
        assert_eq!(stored.attempts, 0);
        assert_eq!(
            db.get_receipt(a).unwrap().unwrap().upload_status,
            UploadStatus::Pending
        );
        assert_eq!(db.claim_next_upload().unwrap().unwrap().id, item.id);
    }

    #[test]
    fn test_reschedule_waits_for_next_attempt() {
        let (db, clock) = test_db();
        db.enqueue_upload("/r/a.jpg", "/2024/01/a.jpg").unwrap();

        let item = db.claim_next_upload().unwrap().unwrap();
        db.reschedule_upload(&item, "503", clock.now() + chrono::Duration::seconds(30))
            .unwrap();

        let stored = db.get_queue_item(item.id).unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("503"));
        assert_eq!(stored.state, QueueState::Pending);

        assert!(db.claim_next_upload().unwrap().is_none());
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(db.claim_next_upload().unwrap().unwrap().id, item.id);
    }

    #[test]
    fn test_fail_retry_and_purge() {
        let (db, _) = test_db();
        let a = db
            .insert_receipt(&new_receipt("/r/a.jpg", ts(2024, 1, 10, 8, 0, 0)))
            .unwrap();
        db.enqueue_upload("/r/a.jpg", "/2024/01/a.jpg").unwrap();

        let item = db.claim_next_upload().unwrap().unwrap();
        db.fail_upload(&item, "400 bad request").unwrap();
        assert_eq!(db.queue_stats().unwrap().failed, 1);
        assert_eq!(
            db.get_receipt(a).unwrap().unwrap().upload_status,
            UploadStatus::Failed
        );

        assert_eq!(db.retry_failed_uploads().unwrap(), 1);
        let stored = db.get_queue_item(item.id).unwrap().unwrap();
        assert_eq!(stored.state, QueueState::Pending);
        assert_eq!(stored.attempts, 0);
        assert_eq!(
            db.get_receipt(a).unwrap().unwrap().upload_status,
            UploadStatus::Pending
        );

        let item = db.claim_next_upload().unwrap().unwrap();
        db.fail_upload(&item, "400 bad request").unwrap();
        assert_eq!(db.purge_failed_uploads().unwrap(), 1);
        assert_eq!(db.queue_stats().unwrap(), QueueStats::default());
    }

    #[test]
    fn test_recover_in_flight() {
        let (db, _) = test_db();
        let a = db
            .insert_receipt(&new_receipt("/r/a.jpg", ts(2024, 1, 10, 8, 0, 0)))
            .unwrap();
        db.enqueue_upload("/r/a.jpg", "/2024/01/a.jpg").unwrap();
        db.claim_next_upload().unwrap().unwrap();

        assert_eq!(db.recover_in_flight_uploads().unwrap(), 1);
        assert_eq!(db.queue_stats().unwrap().pending, 1);
        assert_eq!(
            db.get_receipt(a).unwrap().unwrap().upload_status,
            UploadStatus::Pending
        );
    }

    #[test]
    fn test_uploaded_receipt_is_not_requeued() {
        let (db, _) = test_db();
        let a = db
            .insert_receipt(&new_receipt("/r/a.jpg", ts(2024, 1, 10, 8, 0, 0)))
            .unwrap();
        db.set_upload_status(a, UploadStatus::Uploading, None).unwrap();
        db.set_upload_status(a, UploadStatus::Success, None).unwrap();

        assert_eq!(
            db.enqueue_upload("/r/a.jpg", "/2024/01/10-080000.jpg").unwrap(),
            EnqueueOutcome::AlreadyUploaded
        );
        assert!(db.receipts_awaiting_queue().unwrap().is_empty());
    }
}
