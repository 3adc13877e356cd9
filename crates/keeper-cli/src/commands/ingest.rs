//! Ingest, extract and scan commands

use std::io::{self, Read};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use keeper_core::models::{EnqueueOutcome, PaymentMethod};
use keeper_core::{extract, ExtractionResult, IngestRequest};

use super::App;

/// Read text from a file, or stdin for "-"
pub fn read_text(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Store a captured image and queue it for upload
pub async fn cmd_ingest(
    app: &App,
    image: &Path,
    ocr: Option<&Path>,
    card: Option<String>,
) -> Result<()> {
    if !image.is_file() {
        return Err(anyhow!("File not found: {}", image.display()));
    }

    let ocr_text = match ocr {
        Some(path) => read_text(path)?,
        None => String::new(),
    };
    let payment_method = if card.is_some() {
        PaymentMethod::Card
    } else {
        PaymentMethod::Cash
    };

    let ingestor = app.ingestor()?;
    let ingested = ingestor
        .ingest(IngestRequest {
            image_path: image.to_path_buf(),
            ocr_text,
            payment_method,
            card_label: card,
        })
        .await
        .context("Failed to ingest receipt")?;

    if ingested.created {
        println!("✅ Receipt #{} stored", ingested.receipt_id);
    } else {
        println!("Receipt already exists with ID #{}", ingested.receipt_id);
    }

    if let Some(receipt) = app.db.get_receipt(ingested.receipt_id)? {
        print_fields(&receipt);
    }

    match ingested.upload {
        None => println!("   ☁️  Already uploaded"),
        Some(handle) => {
            let outcome = handle.await.context("Enqueue task failed")??;
            match outcome {
                EnqueueOutcome::Queued => println!("   ⏳ Queued for upload"),
                EnqueueOutcome::Coalesced => println!("   ⏳ Already queued for upload"),
                EnqueueOutcome::AlreadyUploaded => println!("   ☁️  Already uploaded"),
            }
        }
    }

    Ok(())
}

fn print_fields(receipt: &keeper_core::models::Receipt) {
    println!(
        "   Vendor: {}",
        receipt.vendor_name.as_deref().unwrap_or("Unknown")
    );
    match receipt.total_amount {
        Some(total) => println!("   Total: {:.2} {}", total, receipt.currency),
        None => println!("   Total: N/A"),
    }
    if let Some(tax) = receipt.tax_amount {
        println!("   Tax: {:.2}", tax);
    }
    if let Some(date) = receipt.receipt_date {
        println!("   Date: {}", date);
    }
    if let Some(invoice) = &receipt.invoice_number {
        println!("   Invoice: {}", invoice);
    }
    if let Some(confidence) = receipt.ocr_confidence {
        println!("   Confidence: {:.0}%", confidence * 100.0);
    }
}

/// Run the extractor over a text file without touching the database
pub fn cmd_extract(file: &Path, json: bool) -> Result<()> {
    let text = read_text(file)?;
    let result = extract(&text);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    print_extraction(&result);
    Ok(())
}

pub(crate) fn print_extraction(result: &ExtractionResult) {
    fn line<T: std::fmt::Display>(label: &str, value: Option<T>, confidence: f64) {
        match value {
            Some(v) => println!("  {:<10} {:<30} ({:.2})", label, v, confidence),
            None => println!("  {:<10} {:<30}", label, "-"),
        }
    }

    line("Date", result.date.value, result.date.confidence);
    line(
        "Total",
        result.amount.value.map(|v| format!("{:.2}", v)),
        result.amount.confidence,
    );
    line(
        "Tax",
        result.tax.value.map(|v| format!("{:.2}", v)),
        result.tax.confidence,
    );
    line(
        "Invoice",
        result.invoice_number.value.as_deref(),
        result.invoice_number.confidence,
    );
    line("Vendor", result.vendor.value.as_deref(), result.vendor.confidence);
    if let Some(currency) = &result.currency {
        println!("  {:<10} {}", "Currency", currency);
    }
    println!("  Overall confidence: {:.2}", result.overall_confidence());
}

/// Adopt images on disk that the database does not know, then queue them
pub fn cmd_scan(app: &App, root: Option<&Path>) -> Result<()> {
    let root = match root {
        Some(root) => root.to_path_buf(),
        None => app.image_root()?,
    };

    println!("🔍 Scanning {}...", root.display());
    let report = app
        .ingestor()?
        .reconcile(&root)
        .with_context(|| format!("Failed to scan {}", root.display()))?;

    println!("   Adopted: {}", report.scan.count());
    println!("   Already known: {}", report.scan.skipped);
    if report.scan.errors > 0 {
        println!("   ⚠️  Errors: {} (see `keeper logs`)", report.scan.errors);
    }
    println!("   Queued for upload: {}", report.queued);

    Ok(())
}
