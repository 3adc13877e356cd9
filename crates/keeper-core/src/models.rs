//! Domain models for Receipt Keeper

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a receipt was paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cash" => Ok(Self::Cash),
            "card" => Ok(Self::Card),
            _ => Err(format!("Unknown payment method: {}", s)),
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Replication state of a receipt image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Waiting in (or for) the upload queue
    #[default]
    Pending,
    /// An upload attempt is in flight
    Uploading,
    /// Replicated; `remote_path` is set and no queue item remains
    Success,
    /// Gave up after a permanent error or too many attempts
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Whether the store accepts a move from `self` to `next`
    ///
    /// Re-asserting the current status is always allowed. `Success` is
    /// terminal; `Failed` can only go back to `Pending` (manual retry).
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Uploading)
                | (Pending, Failed)
                | (Uploading, Success)
                | (Uploading, Failed)
                | (Uploading, Pending)
                | (Failed, Pending)
        )
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown upload status: {}", s)),
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-field extraction confidences stored alongside the OCR columns
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FieldConfidences {
    pub date: f64,
    pub amount: f64,
    pub tax: f64,
    pub invoice_number: f64,
    pub vendor: f64,
}

/// A captured receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: i64,
    /// Image filename (immutable)
    pub filename: String,
    /// Absolute local path of the image (immutable, unique)
    pub file_path: String,
    /// Target path on the remote drive
    pub remote_path: Option<String>,
    pub payment_method: PaymentMethod,
    pub card_label: Option<String>,
    /// Local wall-clock time of capture
    pub captured_at: NaiveDateTime,
    pub created_at: DateTime<Utc>,
    /// Four-digit year of `captured_at`
    pub year: String,
    /// Two-digit month of `captured_at`
    pub month: String,
    pub upload_status: UploadStatus,
    // OCR fields, null until extraction completes
    pub vendor_name: Option<String>,
    pub total_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub invoice_number: Option<String>,
    pub category: Option<String>,
    pub currency: String,
    pub receipt_date: Option<NaiveDate>,
    pub raw_ocr_text: Option<String>,
    pub ocr_confidence: Option<f64>,
    pub field_confidences: Option<FieldConfidences>,
    pub extracted_at: Option<DateTime<Utc>>,
    /// Identifier and URL reported by the remote drive on upload
    pub remote_id: Option<String>,
    pub remote_url: Option<String>,
}

impl Receipt {
    /// Whether OCR extraction has been persisted for this receipt
    pub fn is_extracted(&self) -> bool {
        self.extracted_at.is_some()
    }
}

/// New receipt for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReceipt {
    pub filename: String,
    pub file_path: String,
    pub remote_path: Option<String>,
    pub payment_method: PaymentMethod,
    pub card_label: Option<String>,
    /// Defaults to the insert time when absent
    pub captured_at: Option<NaiveDateTime>,
    pub year: String,
    pub month: String,
}

/// OCR columns written after extraction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrPatch {
    pub vendor_name: Option<String>,
    pub total_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub invoice_number: Option<String>,
    /// ISO currency code; the store keeps its current value (default USD) when absent
    pub currency: Option<String>,
    pub receipt_date: Option<NaiveDate>,
    pub raw_ocr_text: Option<String>,
    pub ocr_confidence: Option<f64>,
    pub field_confidences: Option<FieldConfidences>,
}

/// User edits from the receipt detail editor
///
/// `None` leaves a column unchanged; `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default)]
pub struct ReceiptUpdate {
    pub vendor_name: Option<Option<String>>,
    pub total_amount: Option<Option<f64>>,
    pub tax_amount: Option<Option<f64>>,
    pub invoice_number: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub currency: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub card_label: Option<Option<String>>,
}

/// Applied schema migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: String,
    pub name: String,
    pub applied_at: DateTime<Utc>,
    pub version: u32,
}

/// State of an upload queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    #[default]
    Pending,
    InFlight,
    /// Terminal until purged or explicitly retried
    Failed,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for QueueState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in_flight" | "in-flight" => Ok(Self::InFlight),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown queue state: {}", s)),
        }
    }
}

/// A pending replication of one local file to one remote path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub local_path: String,
    pub remote_path: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub state: QueueState,
    pub created_at: DateTime<Utc>,
}

/// What `enqueue` did with a `(local_path, remote_path)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// A new queue item was created
    Queued,
    /// An item for the same pair already exists
    Coalesced,
    /// The receipt for this file is already replicated
    AlreadyUploaded,
}

/// Aggregate queue counts shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueStats {
    pub pending: i64,
    pub in_flight: i64,
    pub failed: i64,
    /// Receipts replicated successfully
    pub uploaded: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_method_round_trip() {
        assert_eq!("cash".parse::<PaymentMethod>().unwrap(), PaymentMethod::Cash);
        assert_eq!("CARD".parse::<PaymentMethod>().unwrap(), PaymentMethod::Card);
        assert!("cheque".parse::<PaymentMethod>().is_err());
        assert_eq!(PaymentMethod::Card.to_string(), "card");
    }

    #[test]
    fn test_upload_status_transitions() {
        use UploadStatus::*;
        assert!(Pending.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Success));
        assert!(Uploading.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
        assert!(Success.can_transition_to(Success));

        assert!(!Success.can_transition_to(Pending));
        assert!(!Success.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Success));
        assert!(!Failed.can_transition_to(Success));
    }

    #[test]
    fn test_queue_state_parse() {
        assert_eq!("in_flight".parse::<QueueState>().unwrap(), QueueState::InFlight);
        assert_eq!("in-flight".parse::<QueueState>().unwrap(), QueueState::InFlight);
        assert!("done".parse::<QueueState>().is_err());
    }

    #[test]
    fn test_upload_status_serde() {
        let json = serde_json::to_string(&UploadStatus::Uploading).unwrap();
        assert_eq!(json, "\"uploading\"");
    }
}
