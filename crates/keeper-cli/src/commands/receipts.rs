//! Receipt management commands

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use keeper_core::db::Database;
use keeper_core::models::{PaymentMethod, Receipt, ReceiptUpdate, UploadStatus};
use keeper_core::ReceiptFilter;

use super::{truncate, App};

/// Filters for `keeper receipts list`
#[derive(Debug, Clone)]
pub struct ListArgs {
    pub limit: i64,
    pub search: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Default for ListArgs {
    fn default() -> Self {
        Self {
            limit: 20,
            search: None,
            category: None,
            status: None,
            from: None,
            to: None,
            min: None,
            max: None,
        }
    }
}

/// Field corrections for `keeper receipts edit`
#[derive(Debug, Clone, Default)]
pub struct EditArgs {
    pub vendor: Option<String>,
    pub total: Option<f64>,
    pub tax: Option<f64>,
    pub invoice: Option<String>,
    pub category: Option<String>,
    pub currency: Option<String>,
    pub card: Option<String>,
    pub cash: bool,
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}

/// Turn CLI arguments into a store filter
pub fn build_filter(args: &ListArgs) -> Result<ReceiptFilter> {
    let status = args
        .status
        .as_deref()
        .map(|s| s.parse::<UploadStatus>().map_err(|e| anyhow!(e)))
        .transpose()?;

    let mut filter = ReceiptFilter::new()
        .search(args.search.as_deref())
        .category(args.category.as_deref())
        .upload_status(status)
        .limit(Some(args.limit));

    if args.from.is_some() || args.to.is_some() {
        let from = match &args.from {
            Some(s) => parse_date(s)?,
            None => NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN),
        };
        let to = match &args.to {
            Some(s) => parse_date(s)?,
            None => NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX),
        };
        if from > to {
            return Err(anyhow!("--from {} is after --to {}", from, to));
        }
        filter = filter.date_range(from, to);
    }

    if args.min.is_some() || args.max.is_some() {
        let min = args.min.unwrap_or(f64::MIN);
        let max = args.max.unwrap_or(f64::MAX);
        if min > max {
            return Err(anyhow!("--min {} is greater than --max {}", min, max));
        }
        filter = filter.amount_range(min, max);
    }

    Ok(filter)
}

/// List receipts, newest capture first
pub fn cmd_receipts_list(db: &Database, args: &ListArgs) -> Result<()> {
    let filter = build_filter(args)?;
    let receipts = db.list_receipts(&filter)?;
    let total = db.count_receipts(&filter.clone().limit(None))?;

    if receipts.is_empty() {
        println!("No receipts found");
        return Ok(());
    }

    println!("\n🧾 Receipts ({} of {})", receipts.len(), total);
    println!("{}", "─".repeat(78));
    println!(
        "  {:<6} {:<17} {:<24} {:>10} {:<4} {}",
        "ID", "CAPTURED", "VENDOR", "TOTAL", "CUR", "UPLOAD"
    );

    for receipt in &receipts {
        let vendor = receipt.vendor_name.as_deref().unwrap_or("Unknown");
        let total = receipt
            .total_amount
            .map(|t| format!("{:.2}", t))
            .unwrap_or_else(|| "N/A".to_string());
        println!(
            "  #{:<5} {:<17} {:<24} {:>10} {:<4} {}",
            receipt.id,
            receipt.captured_at.format("%Y-%m-%d %H:%M"),
            truncate(vendor, 24),
            total,
            receipt.currency,
            status_icon(receipt.upload_status)
        );
    }

    println!();
    Ok(())
}

fn status_icon(status: UploadStatus) -> &'static str {
    match status {
        UploadStatus::Pending => "⏳ pending",
        UploadStatus::Uploading => "⬆️  uploading",
        UploadStatus::Success => "☁️  uploaded",
        UploadStatus::Failed => "❌ failed",
    }
}

fn require_receipt(db: &Database, id: i64) -> Result<Receipt> {
    db.get_receipt(id)?
        .ok_or_else(|| anyhow!("Receipt #{} not found", id))
}

/// Show one receipt in detail
pub fn cmd_receipts_show(db: &Database, id: i64) -> Result<()> {
    let receipt = require_receipt(db, id)?;

    println!("\n🧾 Receipt #{}", receipt.id);
    println!("{}", "─".repeat(60));
    println!("  File:      {}", receipt.file_path);
    println!(
        "  Captured:  {}",
        receipt.captured_at.format("%Y-%m-%d %H:%M:%S")
    );
    match receipt.payment_method {
        PaymentMethod::Card => println!(
            "  Payment:   card ({})",
            receipt.card_label.as_deref().unwrap_or("unlabelled")
        ),
        PaymentMethod::Cash => println!("  Payment:   cash"),
    }
    println!("  Upload:    {}", status_icon(receipt.upload_status));
    if let Some(remote) = &receipt.remote_path {
        println!("  Remote:    {}", remote);
    }
    if let Some(url) = &receipt.remote_url {
        println!("  URL:       {}", url);
    }

    if !receipt.is_extracted() {
        println!("\n  Not extracted yet");
        println!();
        return Ok(());
    }

    let conf = receipt.field_confidences.unwrap_or_default();
    println!();
    println!(
        "  Vendor:    {:<30} ({:.2})",
        receipt.vendor_name.as_deref().unwrap_or("-"),
        conf.vendor
    );
    println!(
        "  Total:     {:<30} ({:.2})",
        receipt
            .total_amount
            .map(|t| format!("{:.2} {}", t, receipt.currency))
            .unwrap_or_else(|| "-".to_string()),
        conf.amount
    );
    println!(
        "  Tax:       {:<30} ({:.2})",
        receipt
            .tax_amount
            .map(|t| format!("{:.2}", t))
            .unwrap_or_else(|| "-".to_string()),
        conf.tax
    );
    println!(
        "  Date:      {:<30} ({:.2})",
        receipt
            .receipt_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string()),
        conf.date
    );
    println!(
        "  Invoice:   {:<30} ({:.2})",
        receipt.invoice_number.as_deref().unwrap_or("-"),
        conf.invoice_number
    );
    if let Some(category) = &receipt.category {
        println!("  Category:  {}", category);
    }
    if let Some(confidence) = receipt.ocr_confidence {
        println!("  Overall confidence: {:.0}%", confidence * 100.0);
    }
    println!();

    Ok(())
}

/// Delete a receipt row; the image stays on disk
pub fn cmd_receipts_delete(db: &Database, id: i64) -> Result<()> {
    if !db.delete_receipt(id)? {
        return Err(anyhow!("Receipt #{} not found", id));
    }
    println!("✅ Deleted receipt #{}", id);
    Ok(())
}

fn to_update(args: &EditArgs) -> ReceiptUpdate {
    // Empty strings clear the column
    fn text(value: &Option<String>) -> Option<Option<String>> {
        value.as_ref().map(|v| {
            let v = v.trim();
            (!v.is_empty()).then(|| v.to_string())
        })
    }

    let (payment_method, card_label) = match (&args.card, args.cash) {
        (Some(label), _) => (Some(PaymentMethod::Card), text(&Some(label.clone()))),
        (None, true) => (Some(PaymentMethod::Cash), Some(None)),
        (None, false) => (None, None),
    };

    ReceiptUpdate {
        vendor_name: text(&args.vendor),
        total_amount: args.total.map(Some),
        tax_amount: args.tax.map(Some),
        invoice_number: text(&args.invoice),
        category: text(&args.category),
        currency: args.currency.as_ref().map(|c| c.trim().to_uppercase()),
        payment_method,
        card_label,
    }
}

/// Apply user corrections to a receipt
pub fn cmd_receipts_edit(db: &Database, id: i64, args: &EditArgs) -> Result<()> {
    require_receipt(db, id)?;
    let receipt = db
        .update_receipt(id, &to_update(args))
        .with_context(|| format!("Failed to update receipt #{}", id))?;
    println!("✅ Updated receipt #{}", receipt.id);
    Ok(())
}

/// Re-run extraction over the stored OCR text
pub fn cmd_receipts_reextract(app: &App, id: i64) -> Result<()> {
    require_receipt(&app.db, id)?;
    let result = app
        .ingestor()?
        .reextract(id)
        .with_context(|| format!("Failed to re-extract receipt #{}", id))?;
    println!("✅ Re-extracted receipt #{}", id);
    super::ingest::print_extraction(&result);
    Ok(())
}
