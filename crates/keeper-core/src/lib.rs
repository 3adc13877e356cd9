//! Keeper Core Library
//!
//! Shared functionality for Receipt Keeper:
//! - Clock abstraction and receipt filename layout
//! - OCR field extraction (date, amount, tax, invoice number, vendor)
//! - Receipt store with forward-only migrations
//! - Storage scanner for adopting images already on disk
//! - Durable upload queue with pluggable remote drives
//! - Size-capped error log for the UI
//! - Ingestion orchestrator tying it together

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod logsink;
pub mod models;
pub mod remote;
pub mod scanner;
pub mod upload;

/// Test utilities including mock remote drive server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::KeeperConfig;
pub use db::{Database, MigrationMode, ReceiptFilter, RemoteCredentials};
pub use error::{Error, Result};
pub use extract::{extract, extract_at, ExtractionResult, Field};
pub use ingest::{IngestRequest, Ingested, Ingestor, ReconcileReport};
pub use logsink::{ErrorLog, LogEntry, LogLevel};
pub use remote::{
    HttpRemoteStore, LocalRemoteStore, MockFailure, MockRemoteStore, PutResult, RemoteEntry,
    RemoteStore, UnconfiguredRemoteStore,
};
pub use scanner::{ScanReport, Scanner};
pub use upload::{CancelToken, DrainReport, Drainer, DrainerHandle, RetryPolicy, UploadQueue};
