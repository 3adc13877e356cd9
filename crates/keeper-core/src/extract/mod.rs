//! OCR field extraction
//!
//! Turns free-form OCR text into typed receipt fields, each with a heuristic
//! confidence in `[0, 1]`. Extraction is pure and never fails: anything that
//! cannot be recognized comes back as `{ value: None, confidence: 0.0 }`.
//!
//! # Cascades
//!
//! Every field is extracted by a ranked cascade of regex matchers ordered by
//! descending confidence. The first matcher that yields a *valid* candidate
//! wins; a lower-confidence matcher only runs while nothing better has been
//! found. Validity rules are per field (date window, amount bounds, token
//! shape), so a matcher that finds only junk falls through to the next one.
//!
//! | Field   | Matchers (confidence) |
//! |---------|-----------------------|
//! | date    | ISO 0.95, written month 0.90, US 0.85, EU 0.80 |
//! | amount  | keyword + symbol 0.95, last `$` amount 0.92, keyword 0.85, other symbols 0.85 |
//! | tax     | tax/gst/vat label 0.90 |
//! | invoice | invoice 0.95, receipt 0.92, transaction/order/ref 0.88, `#token` 0.75, bare digits 0.60 |
//! | vendor  | store/company label 0.90, welcome/thanks 0.85, first plain line 0.70 |

mod amount;
mod date;
mod invoice;
mod tax;
mod vendor;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::{FieldConfidences, OcrPatch};

pub use amount::{parse_number, Money};

/// An extracted value with its confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field<T> {
    pub value: Option<T>,
    pub confidence: f64,
}

impl<T> Field<T> {
    /// No candidate found
    pub fn empty() -> Self {
        Self {
            value: None,
            confidence: 0.0,
        }
    }

    pub fn found(value: T, confidence: f64) -> Self {
        Self {
            value: Some(value),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn is_found(&self) -> bool {
        self.value.is_some()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        Field {
            value: self.value.map(f),
            confidence: self.confidence,
        }
    }
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Everything recognized in one OCR pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub date: Field<NaiveDate>,
    pub amount: Field<f64>,
    pub tax: Field<f64>,
    pub invoice_number: Field<String>,
    pub vendor: Field<String>,
    /// ISO code implied by the currency symbol of the winning amount
    pub currency: Option<String>,
    /// The input text, unchanged
    pub raw: String,
}

impl ExtractionResult {
    fn empty(raw: &str) -> Self {
        Self {
            date: Field::empty(),
            amount: Field::empty(),
            tax: Field::empty(),
            invoice_number: Field::empty(),
            vendor: Field::empty(),
            currency: None,
            raw: raw.to_string(),
        }
    }

    pub fn confidences(&self) -> FieldConfidences {
        FieldConfidences {
            date: self.date.confidence,
            amount: self.amount.confidence,
            tax: self.tax.confidence,
            invoice_number: self.invoice_number.confidence,
            vendor: self.vendor.confidence,
        }
    }

    /// Arithmetic mean of the five field confidences (null fields count as 0)
    pub fn overall_confidence(&self) -> f64 {
        let c = self.confidences();
        let sum = c.date + c.amount + c.tax + c.invoice_number + c.vendor;
        (sum / 5.0).clamp(0.0, 1.0)
    }

    /// OCR columns to persist for this result
    pub fn to_patch(&self) -> OcrPatch {
        OcrPatch {
            vendor_name: self.vendor.value.clone(),
            total_amount: self.amount.value,
            tax_amount: self.tax.value,
            invoice_number: self.invoice_number.value.clone(),
            currency: self.currency.clone(),
            receipt_date: self.date.value,
            raw_ocr_text: Some(self.raw.clone()),
            ocr_confidence: Some(self.overall_confidence()),
            field_confidences: Some(self.confidences()),
        }
    }
}

/// Extract fields, validating dates against today's local date
pub fn extract(text: &str) -> ExtractionResult {
    extract_at(text, Local::now().date_naive())
}

/// Extract fields, validating dates against the given "today"
pub fn extract_at(text: &str, today: NaiveDate) -> ExtractionResult {
    if text.trim().is_empty() {
        return ExtractionResult::empty(text);
    }

    let date = date::extract_date(text, today);
    let money = amount::extract_amount(text);
    let mut tax = tax::extract_tax(text);
    let invoice_number = invoice::extract_invoice(text);
    let vendor = vendor::extract_vendor(text);

    // Keep tax <= total so the pair is always storable
    if let (Some(total), Some(t)) = (money.value.as_ref(), tax.value) {
        if t > total.value {
            tax = Field::empty();
        }
    }

    let currency = money
        .value
        .as_ref()
        .and_then(|m| m.currency)
        .map(str::to_string);

    ExtractionResult {
        date,
        amount: money.map(|m| m.value),
        tax,
        invoice_number,
        vendor,
        currency,
        raw: text.to_string(),
    }
}

/// One step of a cascade
pub(crate) struct Matcher<T> {
    pub confidence: f64,
    /// Candidates in preference order
    pub candidates: fn(&str) -> Vec<T>,
}

/// Run a ranked cascade and return the first valid candidate
pub(crate) fn run_cascade<T>(
    text: &str,
    matchers: &[Matcher<T>],
    is_valid: impl Fn(&T) -> bool,
) -> Field<T> {
    let mut best = Field::empty();
    for matcher in matchers {
        if best.confidence >= matcher.confidence {
            break;
        }
        if let Some(value) = (matcher.candidates)(text)
            .into_iter()
            .find(|c| is_valid(c))
        {
            best = Field::found(value, matcher.confidence);
        }
    }
    best
}
