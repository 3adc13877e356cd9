//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Receipt Keeper - capture, extract and back up receipts
#[derive(Parser)]
#[command(name = "keeper")]
#[command(about = "Local-first receipt store with OCR extraction and drive backup", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path (overrides config and KEEPER_DB)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Config file (defaults to the data directory's keeper.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database, image and log directories
    Init,

    /// Store a captured image, extract its OCR text and queue it for upload
    Ingest {
        /// Receipt image (ideally <root>/YYYY/MM/DD-HHMMSS.jpg)
        #[arg(long)]
        image: PathBuf,

        /// File holding the OCR text ("-" for stdin); empty when omitted
        #[arg(long)]
        ocr: Option<PathBuf>,

        /// Card label; the receipt is recorded as cash when omitted
        #[arg(long)]
        card: Option<String>,
    },

    /// Run the field extractor over an OCR text file without storing anything
    Extract {
        /// OCR text file ("-" for stdin)
        file: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Adopt images under the image root that are not in the database
    Scan {
        /// Image root (defaults to the local_receipts_path setting, then config)
        root: Option<PathBuf>,
    },

    /// Receipt management
    Receipts {
        #[command(subcommand)]
        action: Option<ReceiptsAction>,
    },

    /// Upload queue management
    Queue {
        #[command(subcommand)]
        action: Option<QueueAction>,
    },

    /// Keep draining the upload queue until Ctrl-C
    Watch,

    /// Application settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },

    /// Show the error log
    Logs {
        /// Number of entries to show (newest first)
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Delete the log instead of showing it
        #[arg(long)]
        clear: bool,
    },

    /// Show applied schema migrations
    Migrations,
}

#[derive(Subcommand)]
pub enum ReceiptsAction {
    /// List receipts, newest capture first
    List {
        /// Number of receipts to show
        #[arg(short, long, default_value = "20")]
        limit: i64,

        /// Search vendor, invoice number and filename
        #[arg(short, long)]
        search: Option<String>,

        /// Filter by category
        #[arg(long)]
        category: Option<String>,

        /// Filter by upload status (pending, uploading, success, failed)
        #[arg(long)]
        status: Option<String>,

        /// Captured on or after (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Captured on or before (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Minimum total amount
        #[arg(long)]
        min: Option<f64>,

        /// Maximum total amount
        #[arg(long)]
        max: Option<f64>,
    },

    /// Show one receipt with its extracted fields
    Show {
        /// Receipt ID
        id: i64,
    },

    /// Delete a receipt (the image file is kept)
    Delete {
        /// Receipt ID
        id: i64,
    },

    /// Correct extracted fields
    Edit {
        /// Receipt ID
        id: i64,

        #[arg(long)]
        vendor: Option<String>,

        #[arg(long)]
        total: Option<f64>,

        #[arg(long)]
        tax: Option<f64>,

        #[arg(long)]
        invoice: Option<String>,

        #[arg(long)]
        category: Option<String>,

        /// ISO currency code (e.g. EUR)
        #[arg(long)]
        currency: Option<String>,

        /// Mark as paid by card with this label
        #[arg(long, conflicts_with = "cash")]
        card: Option<String>,

        /// Mark as paid in cash
        #[arg(long)]
        cash: bool,
    },

    /// Re-run extraction over the stored OCR text
    Reextract {
        /// Receipt ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum QueueAction {
    /// Show queue counts
    Status,

    /// List queue items
    List {
        /// Only items in this state (pending, in_flight, failed)
        #[arg(long)]
        state: Option<String>,
    },

    /// Upload every ready item now
    Drain,

    /// Delete items that failed permanently
    Purge,

    /// Give failed items a fresh set of attempts
    Retry,
}

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print a setting
    Get {
        key: String,
    },

    /// Set a setting
    Set {
        key: String,
        value: String,
    },

    /// Remove a setting
    Unset {
        key: String,
    },

    /// List all settings (tokens are masked)
    List,
}
