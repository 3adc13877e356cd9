//! Upload queue: durable at-least-once replication of receipt images
//!
//! Items move `pending -> in_flight -> (deleted | pending | failed)`. The
//! state lives in the `upload_queue` table, so a crash loses nothing;
//! [`UploadQueue::recover_in_flight`] returns stranded items at startup.
//!
//! Uploads are strictly serial. A drain that finds another drain's item in
//! flight does nothing.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::logsink::ErrorLog;
use crate::models::{EnqueueOutcome, QueueItem, QueueState, QueueStats};
use crate::remote::RemoteStore;

mod cancel;
mod drainer;

pub use cancel::CancelToken;
pub use drainer::{Drainer, DrainerHandle};

pub const DEFAULT_PUT_TIMEOUT: Duration = Duration::from_secs(60);

/// Attempt limit and exponential backoff for failed uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Failed attempts rescheduled with backoff
    pub retried: usize,
    /// Items moved to terminal `failed`
    pub failed: usize,
    /// Stopped early by the cancel token
    pub cancelled: bool,
    /// Another drain held an in-flight item
    pub busy: bool,
    /// The remote store was not authenticated; nothing was attempted
    pub skipped_unauthenticated: bool,
}

enum Attempt {
    Succeeded,
    Retried,
    Failed,
}

/// Upload queue bound to a store and a remote drive
pub struct UploadQueue {
    db: Database,
    remote: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
    put_timeout: Duration,
    error_log: Option<ErrorLog>,
}

impl UploadQueue {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            db,
            remote,
            policy: RetryPolicy::default(),
            put_timeout: DEFAULT_PUT_TIMEOUT,
            error_log: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_put_timeout(mut self, timeout: Duration) -> Self {
        self.put_timeout = timeout;
        self
    }

    pub fn with_error_log(mut self, log: ErrorLog) -> Self {
        self.error_log = Some(log);
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Queue `local_path` for upload to `remote_path`
    pub fn enqueue(&self, local_path: &str, remote_path: &str) -> Result<EnqueueOutcome> {
        let outcome = self.db.enqueue_upload(local_path, remote_path)?;
        debug!("Enqueue {} -> {}: {:?}", local_path, remote_path, outcome);
        Ok(outcome)
    }

    /// Queue every pending receipt that has a remote path but no queue item
    pub fn enqueue_pending_receipts(&self) -> Result<usize> {
        let mut queued = 0;
        for receipt in self.db.receipts_awaiting_queue()? {
            let Some(remote_path) = receipt.remote_path.as_deref() else {
                continue;
            };
            if self.enqueue(&receipt.file_path, remote_path)? == EnqueueOutcome::Queued {
                queued += 1;
            }
        }
        if queued > 0 {
            info!("Queued {} pending receipt(s) for upload", queued);
        }
        Ok(queued)
    }

    pub fn recover_in_flight(&self) -> Result<usize> {
        let recovered = self.db.recover_in_flight_uploads()?;
        if recovered > 0 {
            warn!("Recovered {} upload(s) left in flight", recovered);
        }
        Ok(recovered)
    }

    pub fn retry_failed(&self) -> Result<usize> {
        self.db.retry_failed_uploads()
    }

    pub fn purge_failed(&self) -> Result<usize> {
        self.db.purge_failed_uploads()
    }

    pub fn stats(&self) -> Result<QueueStats> {
        self.db.queue_stats()
    }

    pub fn items(&self, state: Option<QueueState>) -> Result<Vec<QueueItem>> {
        self.db.list_queue_items(state)
    }

    /// Upload every ready item, oldest first
    ///
    /// Returns early when the remote store is not authenticated (no attempts
    /// are consumed) or when `cancel` fires between items.
    pub async fn drain(&self, cancel: &CancelToken) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        if cancel.is_cancelled() {
            debug!("Upload drain cancelled before start");
            report.cancelled = true;
            return Ok(report);
        }
        if !self.remote.authenticated().await {
            debug!("Remote drive '{}' not authenticated, skipping drain", self.remote.name());
            report.skipped_unauthenticated = true;
            return Ok(report);
        }

        loop {
            if cancel.is_cancelled() {
                debug!("Upload drain cancelled after {} item(s)", report.attempted);
                report.cancelled = true;
                break;
            }

            let Some(item) = self.db.claim_next_upload()? else {
                if report.attempted == 0 && self.db.queue_stats()?.in_flight > 0 {
                    debug!("Another drain is uploading, nothing to do");
                    report.busy = true;
                }
                break;
            };

            report.attempted += 1;
            let outcome = match self.attempt(&item).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Unblock later drains before giving up on this one
                    if let Err(release_err) = self.db.release_upload(&item) {
                        error!(
                            "Could not release upload {} after store error: {}",
                            item.id, release_err
                        );
                    }
                    return Err(e);
                }
            };
            match outcome {
                Attempt::Succeeded => report.succeeded += 1,
                Attempt::Retried => report.retried += 1,
                Attempt::Failed => report.failed += 1,
            }
        }

        if report.attempted > 0 {
            info!(
                "Upload drain: {} attempted, {} succeeded, {} retrying, {} failed",
                report.attempted, report.succeeded, report.retried, report.failed
            );
        }
        Ok(report)
    }

    /// Upload one claimed item and commit the outcome
    async fn attempt(&self, item: &QueueItem) -> Result<Attempt> {
        let local = Path::new(&item.local_path);

        let result = if !tokio::fs::try_exists(local).await.unwrap_or(false) {
            Err(Error::Permanent(format!("local file missing: {}", item.local_path)))
        } else {
            match tokio::time::timeout(self.put_timeout, self.remote.put(local, &item.remote_path))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Transient(format!(
                    "upload timed out after {}s",
                    self.put_timeout.as_secs()
                ))),
            }
        };

        let err = match result {
            Ok(put) => {
                self.db.complete_upload(
                    item,
                    &put.remote_path,
                    put.remote_id.as_deref(),
                    put.remote_url.as_deref(),
                )?;
                info!("Uploaded {} to {}", item.local_path, put.remote_path);
                return Ok(Attempt::Succeeded);
            }
            Err(e) => e,
        };

        let attempt = item.attempts + 1;
        let info = json!({
            "local_path": item.local_path,
            "remote_path": item.remote_path,
            "attempt": attempt,
        });

        if err.is_retryable() && attempt < self.policy.max_attempts {
            let delay = self.policy.backoff(attempt);
            let next = self.db.clock().now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
            self.db.reschedule_upload(item, &err.to_string(), next)?;
            warn!(
                "Upload of {} failed (attempt {}/{}), retrying in {}s: {}",
                item.local_path,
                attempt,
                self.policy.max_attempts,
                delay.as_secs(),
                err
            );
            self.log_failure(&err, "upload failed, will retry", info);
            Ok(Attempt::Retried)
        } else {
            self.db.fail_upload(item, &err.to_string())?;
            error!(
                "Upload of {} failed permanently after {} attempt(s): {}",
                item.local_path, attempt, err
            );
            self.log_failure(&err, "upload failed permanently", info);
            Ok(Attempt::Failed)
        }
    }

    fn log_failure(&self, err: &Error, msg: &str, info: serde_json::Value) {
        if let Some(log) = &self.error_log {
            log.log_error("upload", Some(err), msg, Some(info));
        }
    }
}
