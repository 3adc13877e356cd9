//! Tax amount extraction

use std::sync::LazyLock;

use regex::Regex;

use super::amount::parse_number;
use super::{run_cascade, Field, Matcher};

static TAX_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:sales[ \t]+tax|tax|gst|vat|hst|pst)\b").expect("valid regex")
});

// Lines that mention tax but do not carry the tax amount
static NOT_TAX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:sub[ \t]*-?[ \t]*total|before[ \t]+tax|pre-?[ \t]*tax|incl(?:\.|uding|usive)?|excl(?:\.|uding|usive)?|tax[ \t]+(?:id|no|number|reg(?:istration)?)|vat[ \t]+(?:id|no|number|reg(?:istration)?))\b",
    )
    .expect("valid regex")
});

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d{1,3}(?:\.\d{3})+,\d{2}|\d+,\d{2}|\d+(?:\.\d{1,2})?")
        .expect("valid regex")
});

static MATCHERS: [Matcher<f64>; 1] = [Matcher {
    confidence: 0.90,
    candidates: labelled_tax,
}];

pub(super) fn extract_tax(text: &str) -> Field<f64> {
    run_cascade(text, &MATCHERS, |v| *v >= 0.0 && *v < 100_000.0)
}

/// Tax lines from the bottom up, taking the last non-percentage amount on each
fn labelled_tax(text: &str) -> Vec<f64> {
    let mut found = Vec::new();
    for line in text.lines().rev() {
        if NOT_TAX_RE.is_match(line) {
            continue;
        }
        let Some(label) = TAX_LABEL_RE.find(line) else {
            continue;
        };
        let rest = &line[label.end()..];
        let amount = AMOUNT_RE
            .find_iter(rest)
            .filter(|m| !rest[m.end()..].trim_start().starts_with('%'))
            .filter_map(|m| parse_number(m.as_str()))
            .last();
        if let Some(amount) = amount {
            found.push(amount);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_tax_line() {
        let result = extract_tax("TOTAL    7.63\nTAX       0.68");
        assert_eq!(result.value, Some(0.68));
        assert_eq!(result.confidence, 0.90);
    }

    #[test]
    fn test_percentage_is_skipped() {
        let result = extract_tax("Sales Tax 8.25% $0.66");
        assert_eq!(result.value, Some(0.66));

        let result = extract_tax("VAT 20 % 3,40");
        assert_eq!(result.value, Some(3.4));
    }

    #[test]
    fn test_non_tax_lines_are_skipped() {
        let text = "Subtotal before tax 12.00\nTax ID 9876543\nPrices incl. VAT 2.00\nGST 0.60";
        let result = extract_tax(text);
        assert_eq!(result.value, Some(0.6));
    }

    #[test]
    fn test_zero_tax_is_valid() {
        assert_eq!(extract_tax("TAX 0.00").value, Some(0.0));
    }

    #[test]
    fn test_no_tax() {
        assert_eq!(extract_tax("TOTAL 7.63"), Field::empty());
        assert_eq!(extract_tax("TAX"), Field::empty());
    }
}
