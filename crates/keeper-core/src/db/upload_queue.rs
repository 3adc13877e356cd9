//! Upload queue rows
//!
//! Items are keyed by `(local_path, remote_path)`. Every state change that
//! touches both an item and its receipt happens in one transaction so the
//! receipt's `upload_status` never disagrees with the queue.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use super::{parse_datetime, Database};
use crate::clock::format_db_timestamp;
use crate::error::Result;
use crate::models::{EnqueueOutcome, QueueItem, QueueState, QueueStats};

const QUEUE_COLUMNS: &str =
    "id, local_path, remote_path, attempts, last_error, next_attempt_at, state, created_at";

impl Database {
    /// Add a `(local_path, remote_path)` pair to the queue
    ///
    /// A pair that already has an item (in any state) is coalesced; a file
    /// whose receipt is already uploaded is never queued again.
    pub fn enqueue_upload(&self, local_path: &str, remote_path: &str) -> Result<EnqueueOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let uploaded: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM receipts WHERE file_path = ? AND upload_status = 'success')",
            params![local_path],
            |row| row.get(0),
        )?;
        if uploaded {
            return Ok(EnqueueOutcome::AlreadyUploaded);
        }

        let now = self.now_str();
        let inserted = tx.execute(
            "INSERT INTO upload_queue (local_path, remote_path, attempts, next_attempt_at, state, created_at)
             VALUES (?, ?, 0, ?, 'pending', ?)
             ON CONFLICT(local_path, remote_path) DO NOTHING",
            params![local_path, remote_path, now, now],
        )?;
        tx.commit()?;

        Ok(if inserted == 1 {
            EnqueueOutcome::Queued
        } else {
            EnqueueOutcome::Coalesced
        })
    }

    /// Claim the oldest ready item and mark it (and its receipt) in flight
    ///
    /// Returns `None` when nothing is ready or another drain already holds an
    /// in-flight item, which keeps uploads strictly serial.
    pub fn claim_next_upload(&self) -> Result<Option<QueueItem>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sql = format!(
            "UPDATE upload_queue SET state = 'in_flight'
             WHERE id = (
                 SELECT id FROM upload_queue
                 WHERE state = 'pending' AND next_attempt_at <= ?
                 ORDER BY id ASC
                 LIMIT 1
             )
             AND NOT EXISTS (SELECT 1 FROM upload_queue WHERE state = 'in_flight')
             RETURNING {}",
            QUEUE_COLUMNS
        );
        let item = tx
            .query_row(&sql, params![self.now_str()], |row| Self::row_to_queue_item(row))
            .optional()?;

        if let Some(item) = &item {
            tx.execute(
                "UPDATE receipts SET upload_status = 'uploading'
                 WHERE file_path = ? AND upload_status = 'pending'",
                params![item.local_path],
            )?;
        }
        tx.commit()?;

        Ok(item)
    }

    /// Record a successful upload: mark the receipt uploaded and drop every
    /// item for its file, including ones queued under another remote path
    pub fn complete_upload(
        &self,
        item: &QueueItem,
        remote_path: &str,
        remote_id: Option<&str>,
        remote_url: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM upload_queue WHERE local_path = ?",
            params![item.local_path],
        )?;
        tx.execute(
            "UPDATE receipts SET upload_status = 'success', remote_path = ?,
             remote_id = COALESCE(?, remote_id), remote_url = COALESCE(?, remote_url)
             WHERE file_path = ?",
            params![remote_path, remote_id, remote_url, item.local_path],
        )?;
        tx.commit()?;

        Ok(())
    }

    /// Put a failed item back to `pending` with a later attempt time
    pub fn reschedule_upload(
        &self,
        item: &QueueItem,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE upload_queue SET state = 'pending', attempts = attempts + 1,
             last_error = ?, next_attempt_at = ?
             WHERE id = ?",
            params![error, format_db_timestamp(next_attempt_at), item.id],
        )?;
        tx.execute(
            "UPDATE receipts SET upload_status = 'pending'
             WHERE file_path = ? AND upload_status = 'uploading'",
            params![item.local_path],
        )?;
        tx.commit()?;

        Ok(())
    }

    /// Move an item to terminal `failed` and mark its receipt failed
    pub fn fail_upload(&self, item: &QueueItem, error: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE upload_queue SET state = 'failed', attempts = attempts + 1, last_error = ?
             WHERE id = ?",
            params![error, item.id],
        )?;
        tx.execute(
            "UPDATE receipts SET upload_status = 'failed'
             WHERE file_path = ? AND upload_status IN ('pending', 'uploading')",
            params![item.local_path],
        )?;
        tx.commit()?;

        Ok(())
    }

    /// Hand a claimed item back untouched after its outcome could not be recorded
    pub fn release_upload(&self, item: &QueueItem) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE upload_queue SET state = 'pending' WHERE id = ? AND state = 'in_flight'",
            params![item.id],
        )?;
        tx.execute(
            "UPDATE receipts SET upload_status = 'pending'
             WHERE file_path = ? AND upload_status = 'uploading'",
            params![item.local_path],
        )?;
        tx.commit()?;

        Ok(())
    }

    /// Return items stranded `in_flight` (e.g. by a crash) to `pending`
    pub fn recover_in_flight_uploads(&self) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE receipts SET upload_status = 'pending'
             WHERE upload_status = 'uploading'
               AND file_path IN (SELECT local_path FROM upload_queue WHERE state = 'in_flight')",
            [],
        )?;
        let recovered = tx.execute(
            "UPDATE upload_queue SET state = 'pending' WHERE state = 'in_flight'",
            [],
        )?;
        tx.commit()?;

        Ok(recovered)
    }

    /// Reset terminal-failed items to `pending` with zero attempts
    pub fn retry_failed_uploads(&self) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE receipts SET upload_status = 'pending'
             WHERE upload_status = 'failed'
               AND file_path IN (SELECT local_path FROM upload_queue WHERE state = 'failed')",
            [],
        )?;
        let reset = tx.execute(
            "UPDATE upload_queue SET state = 'pending', attempts = 0, next_attempt_at = ?
             WHERE state = 'failed'",
            params![self.now_str()],
        )?;
        tx.commit()?;

        Ok(reset)
    }

    /// Delete terminal-failed items; their receipts stay `failed`
    pub fn purge_failed_uploads(&self) -> Result<usize> {
        let conn = self.conn()?;
        let purged = conn.execute("DELETE FROM upload_queue WHERE state = 'failed'", [])?;
        Ok(purged)
    }

    /// Queue counts plus the number of uploaded receipts
    pub fn queue_stats(&self) -> Result<QueueStats> {
        let conn = self.conn()?;
        let stats = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM upload_queue WHERE state = 'pending'),
                (SELECT COUNT(*) FROM upload_queue WHERE state = 'in_flight'),
                (SELECT COUNT(*) FROM upload_queue WHERE state = 'failed'),
                (SELECT COUNT(*) FROM receipts WHERE upload_status = 'success')",
            [],
            |row| {
                Ok(QueueStats {
                    pending: row.get(0)?,
                    in_flight: row.get(1)?,
                    failed: row.get(2)?,
                    uploaded: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }

    /// Queue items, oldest first, optionally limited to one state
    pub fn list_queue_items(&self, state: Option<QueueState>) -> Result<Vec<QueueItem>> {
        let conn = self.conn()?;
        let items = match state {
            Some(state) => {
                let sql = format!(
                    "SELECT {} FROM upload_queue WHERE state = ? ORDER BY id ASC",
                    QUEUE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![state.as_str()], |row| Self::row_to_queue_item(row))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let sql = format!("SELECT {} FROM upload_queue ORDER BY id ASC", QUEUE_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| Self::row_to_queue_item(row))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(items)
    }

    /// Get a queue item by ID
    pub fn get_queue_item(&self, id: i64) -> Result<Option<QueueItem>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM upload_queue WHERE id = ?", QUEUE_COLUMNS);
        let item = conn
            .query_row(&sql, params![id], |row| Self::row_to_queue_item(row))
            .optional()?;
        Ok(item)
    }

    fn row_to_queue_item(row: &rusqlite::Row) -> rusqlite::Result<QueueItem> {
        let next_attempt_str: String = row.get(5)?;
        let state_str: String = row.get(6)?;
        let created_at_str: Option<String> = row.get(7)?;

        Ok(QueueItem {
            id: row.get(0)?,
            local_path: row.get(1)?,
            remote_path: row.get(2)?,
            attempts: row.get(3)?,
            last_error: row.get(4)?,
            next_attempt_at: parse_datetime(&next_attempt_str),
            state: state_str.parse().unwrap_or_default(),
            created_at: created_at_str
                .map(|s| parse_datetime(&s))
                .unwrap_or_default(),
        })
    }
}
