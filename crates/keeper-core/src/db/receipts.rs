//! Receipt operations

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{parse_datetime, Database, ReceiptFilter};
use crate::clock::{format_naive_timestamp, parse_naive_timestamp, ymd};
use crate::error::{Error, Result};
use crate::models::*;

const RECEIPT_COLUMNS: &str = "id, filename, file_path, remote_path, payment_method, card_label,
    captured_at, created_at, year, month, upload_status,
    vendor_name, total_amount, tax_amount, invoice_number, category, currency,
    receipt_date, raw_ocr_text, ocr_confidence, field_confidences, extracted_at,
    remote_id, remote_url";

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}$").expect("valid regex"));
static MONTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0[1-9]|1[0-2])$").expect("valid regex"));
static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("valid regex"));

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn receipt_not_found(id: i64) -> Error {
    Error::NotFound(format!("receipt {}", id))
}

/// Check amounts and confidences before they reach the table
fn validate_amounts(total: Option<f64>, tax: Option<f64>) -> Result<()> {
    for (name, value) in [("total_amount", total), ("tax_amount", tax)] {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::ValidationFailed(format!(
                    "{} must be a non-negative number, got {}",
                    name, v
                )));
            }
        }
    }
    if let (Some(total), Some(tax)) = (total, tax) {
        if tax > total {
            return Err(Error::ValidationFailed(format!(
                "tax_amount {} exceeds total_amount {}",
                tax, total
            )));
        }
    }
    Ok(())
}

fn validate_confidence(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::ValidationFailed(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

fn validate_currency(currency: &str) -> Result<()> {
    if !CURRENCY_RE.is_match(currency) {
        return Err(Error::ValidationFailed(format!(
            "currency must be a 3-letter uppercase code, got {:?}",
            currency
        )));
    }
    Ok(())
}

impl Database {
    /// Insert a new receipt, returning its id
    ///
    /// `upload_status` starts at `pending`. When `captured_at` is absent the
    /// current local time is used if it falls in the given year/month, else
    /// midnight on the first of that month. Cash receipts never carry a card
    /// label.
    pub fn insert_receipt(&self, receipt: &NewReceipt) -> Result<i64> {
        if receipt.filename.trim().is_empty() || receipt.file_path.trim().is_empty() {
            return Err(Error::ValidationFailed(
                "filename and file_path are required".to_string(),
            ));
        }
        if !YEAR_RE.is_match(&receipt.year) || !MONTH_RE.is_match(&receipt.month) {
            return Err(Error::ValidationFailed(format!(
                "invalid year/month {}/{}",
                receipt.year, receipt.month
            )));
        }

        let captured_at = match receipt.captured_at {
            Some(ts) => ts,
            None => {
                let now = self.clock.local_now();
                let parts = ymd(now);
                if parts.year == receipt.year && parts.month == receipt.month {
                    now
                } else {
                    let year: i32 = receipt.year.parse().unwrap_or_default();
                    let month: u32 = receipt.month.parse().unwrap_or_default();
                    NaiveDate::from_ymd_opt(year, month, 1)
                        .ok_or_else(|| {
                            Error::ValidationFailed(format!(
                                "invalid year/month {}/{}",
                                receipt.year, receipt.month
                            ))
                        })?
                        .and_time(NaiveTime::MIN)
                }
            }
        };

        let parts = ymd(captured_at);
        if parts.year != receipt.year || parts.month != receipt.month {
            return Err(Error::ValidationFailed(format!(
                "captured_at {} does not fall in {}/{}",
                captured_at, receipt.year, receipt.month
            )));
        }

        let card_label = match receipt.payment_method {
            PaymentMethod::Cash => None,
            PaymentMethod::Card => receipt.card_label.as_deref(),
        };

        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO receipts (filename, file_path, remote_path, payment_method, card_label,
             captured_at, created_at, year, month, upload_status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending')",
            params![
                receipt.filename,
                receipt.file_path,
                receipt.remote_path,
                receipt.payment_method.as_str(),
                card_label,
                format_naive_timestamp(captured_at),
                self.now_str(),
                receipt.year,
                receipt.month,
            ],
        );

        match inserted {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => {
                Err(Error::DuplicatePath(receipt.file_path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get receipt by ID
    pub fn get_receipt(&self, id: i64) -> Result<Option<Receipt>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM receipts WHERE id = ?", RECEIPT_COLUMNS);
        let receipt = conn
            .query_row(&sql, params![id], |row| Self::row_to_receipt(row))
            .optional()?;
        Ok(receipt)
    }

    /// Get receipt by its local file path
    pub fn find_receipt_by_path(&self, file_path: &str) -> Result<Option<Receipt>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM receipts WHERE file_path = ?", RECEIPT_COLUMNS);
        let receipt = conn
            .query_row(&sql, params![file_path], |row| Self::row_to_receipt(row))
            .optional()?;
        Ok(receipt)
    }

    /// List receipts matching a filter, newest capture first
    pub fn list_receipts(&self, filter: &ReceiptFilter) -> Result<Vec<Receipt>> {
        let conn = self.conn()?;
        let built = filter.build();
        let sql = built.build_select_query(RECEIPT_COLUMNS);

        let mut stmt = conn.prepare(&sql)?;
        let receipts = stmt
            .query_map(built.params_refs().as_slice(), |row| Self::row_to_receipt(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(receipts)
    }

    /// Count receipts matching a filter (ignores the limit)
    pub fn count_receipts(&self, filter: &ReceiptFilter) -> Result<i64> {
        let conn = self.conn()?;
        let built = filter.build();
        let count = conn.query_row(
            &built.build_count_query(),
            built.params_refs().as_slice(),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Pending receipts that have no upload queue item yet
    pub fn receipts_awaiting_queue(&self) -> Result<Vec<Receipt>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM receipts r
             WHERE upload_status = 'pending' AND remote_path IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM upload_queue q WHERE q.local_path = r.file_path)
             ORDER BY id ASC",
            RECEIPT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let receipts = stmt
            .query_map([], |row| Self::row_to_receipt(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(receipts)
    }

    /// Helper to convert a row to Receipt
    fn row_to_receipt(row: &rusqlite::Row) -> rusqlite::Result<Receipt> {
        let payment_str: String = row.get(4)?;
        let captured_at_str: String = row.get(6)?;
        let created_at_str: Option<String> = row.get(7)?;
        let status_str: String = row.get(10)?;
        let receipt_date_str: Option<String> = row.get(17)?;
        let confidences_json: Option<String> = row.get(20)?;
        let extracted_at_str: Option<String> = row.get(21)?;

        Ok(Receipt {
            id: row.get(0)?,
            filename: row.get(1)?,
            file_path: row.get(2)?,
            remote_path: row.get(3)?,
            payment_method: payment_str.parse().unwrap_or_default(),
            card_label: row.get(5)?,
            captured_at: parse_naive_timestamp(&captured_at_str).unwrap_or_default(),
            created_at: created_at_str
                .map(|s| parse_datetime(&s))
                .unwrap_or_default(),
            year: row.get(8)?,
            month: row.get(9)?,
            upload_status: status_str.parse().unwrap_or_default(),
            vendor_name: row.get(11)?,
            total_amount: row.get(12)?,
            tax_amount: row.get(13)?,
            invoice_number: row.get(14)?,
            category: row.get(15)?,
            currency: row.get(16)?,
            receipt_date: receipt_date_str
                .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            raw_ocr_text: row.get(18)?,
            ocr_confidence: row.get(19)?,
            field_confidences: confidences_json.and_then(|s| serde_json::from_str(&s).ok()),
            extracted_at: extracted_at_str.map(|s| parse_datetime(&s)),
            remote_id: row.get(22)?,
            remote_url: row.get(23)?,
        })
    }

    /// Write extracted OCR fields and stamp `extracted_at`
    ///
    /// Idempotent: patching twice with the same values leaves the same row
    /// (apart from `extracted_at`). A patch without a currency keeps the
    /// current one.
    pub fn patch_ocr(&self, id: i64, patch: &OcrPatch) -> Result<()> {
        validate_amounts(patch.total_amount, patch.tax_amount)?;
        if let Some(c) = patch.ocr_confidence {
            validate_confidence("ocr_confidence", c)?;
        }
        if let Some(fc) = &patch.field_confidences {
            for (name, value) in [
                ("date", fc.date),
                ("amount", fc.amount),
                ("tax", fc.tax),
                ("invoice_number", fc.invoice_number),
                ("vendor", fc.vendor),
            ] {
                validate_confidence(name, value)?;
            }
        }
        if let Some(currency) = &patch.currency {
            validate_currency(currency)?;
        }

        let confidences_json = patch
            .field_confidences
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE receipts SET vendor_name = ?, total_amount = ?, tax_amount = ?,
             invoice_number = ?, currency = COALESCE(?, currency), receipt_date = ?,
             raw_ocr_text = ?, ocr_confidence = ?, field_confidences = ?, extracted_at = ?
             WHERE id = ?",
            params![
                patch.vendor_name,
                patch.total_amount,
                patch.tax_amount,
                patch.invoice_number,
                patch.currency,
                patch.receipt_date.map(|d| d.to_string()),
                patch.raw_ocr_text,
                patch.ocr_confidence,
                confidences_json,
                self.now_str(),
                id
            ],
        )?;

        if updated == 0 {
            return Err(receipt_not_found(id));
        }
        debug!("Patched OCR fields for receipt {}", id);
        Ok(())
    }

    /// Move a receipt's upload status, optionally recording its remote path
    ///
    /// Rejects transitions the upload state machine does not allow, and
    /// `success` without a remote path. Reaching `success` drops any queue
    /// item left for the receipt's file.
    pub fn set_upload_status(
        &self,
        id: i64,
        status: UploadStatus,
        remote_path: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current: Option<(String, Option<String>, String)> = tx
            .query_row(
                "SELECT upload_status, remote_path, file_path FROM receipts WHERE id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let (current_status, current_remote, file_path) =
            current.ok_or_else(|| receipt_not_found(id))?;

        let current_status: UploadStatus = current_status.parse().unwrap_or_default();
        if !current_status.can_transition_to(status) {
            return Err(Error::ValidationFailed(format!(
                "upload status cannot move from {} to {}",
                current_status, status
            )));
        }

        let remote = remote_path.map(str::to_string).or(current_remote);
        if status == UploadStatus::Success && remote.is_none() {
            return Err(Error::ValidationFailed(
                "a successful upload requires a remote path".to_string(),
            ));
        }

        tx.execute(
            "UPDATE receipts SET upload_status = ?, remote_path = ? WHERE id = ?",
            params![status.as_str(), remote, id],
        )?;
        if status == UploadStatus::Success {
            delete_queue_items_for(&tx, &file_path)?;
        }
        tx.commit()?;

        Ok(())
    }

    /// Apply user edits from the detail editor and return the updated row
    pub fn update_receipt(&self, id: i64, update: &ReceiptUpdate) -> Result<Receipt> {
        let mut receipt = self.get_receipt(id)?.ok_or_else(|| receipt_not_found(id))?;

        if let Some(v) = &update.vendor_name {
            receipt.vendor_name = v.clone();
        }
        if let Some(v) = update.total_amount {
            receipt.total_amount = v;
        }
        if let Some(v) = update.tax_amount {
            receipt.tax_amount = v;
        }
        if let Some(v) = &update.invoice_number {
            receipt.invoice_number = v.clone();
        }
        if let Some(v) = &update.category {
            receipt.category = v.clone();
        }
        if let Some(v) = &update.currency {
            receipt.currency = v.trim().to_uppercase();
        }
        if let Some(v) = update.payment_method {
            receipt.payment_method = v;
        }
        if let Some(v) = &update.card_label {
            receipt.card_label = v.clone();
        }
        if receipt.payment_method == PaymentMethod::Cash {
            receipt.card_label = None;
        }

        validate_amounts(receipt.total_amount, receipt.tax_amount)?;
        validate_currency(&receipt.currency)?;

        let conn = self.conn()?;
        conn.execute(
            "UPDATE receipts SET vendor_name = ?, total_amount = ?, tax_amount = ?,
             invoice_number = ?, category = ?, currency = ?, payment_method = ?, card_label = ?
             WHERE id = ?",
            params![
                receipt.vendor_name,
                receipt.total_amount,
                receipt.tax_amount,
                receipt.invoice_number,
                receipt.category,
                receipt.currency,
                receipt.payment_method.as_str(),
                receipt.card_label,
                id
            ],
        )?;

        Ok(receipt)
    }

    /// Delete a receipt and any queue items for its file
    ///
    /// The image on disk is left alone. Returns false when no such receipt exists.
    pub fn delete_receipt(&self, id: i64) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let file_path: Option<String> = tx
            .query_row(
                "SELECT file_path FROM receipts WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(file_path) = file_path else {
            return Ok(false);
        };

        delete_queue_items_for(&tx, &file_path)?;
        tx.execute("DELETE FROM receipts WHERE id = ?", params![id])?;
        tx.commit()?;

        Ok(true)
    }
}

fn delete_queue_items_for(conn: &Connection, local_path: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM upload_queue WHERE local_path = ?",
        params![local_path],
    )
}
