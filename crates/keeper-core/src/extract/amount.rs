//! Total amount extraction

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{run_cascade, Field, Matcher};

/// A monetary amount with the currency implied by its symbol, if any
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Money {
    pub value: f64,
    pub currency: Option<&'static str>,
}

// US thousands, EU thousands with decimal comma, bare decimal comma, plain
const NUM: &str = r"\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d{1,3}(?:\.\d{3})+,\d{2}|\d+,\d{2}|\d+(?:\.\d{1,2})?";
const NUM_DECIMAL: &str = r"\d{1,3}(?:,\d{3})+\.\d{2}|\d{1,3}(?:\.\d{3})+,\d{2}|\d+[.,]\d{2}";
const KEYWORDS: &str =
    r"grand\s+total|total\s+due|amount\s+due|balance\s+due|sub\s*-?\s*total|total|balance|due";

static KEYWORD_SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({KEYWORDS})\b[\s:=.\-]*([$€£¥₹])\s*({NUM})"
    ))
    .expect("valid regex")
});

static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({KEYWORDS})\b[\s:=.\-]*({NUM_DECIMAL})\b"))
        .expect("valid regex")
});

static DOLLAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(?:\$|\bUSD)\s*({NUM})")).expect("valid regex")
});

static OTHER_SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)([€£¥₹])\s*({NUM})|({NUM})\s*([€£])|\b(EUR|GBP|JPY|INR)\s*({NUM})"
    ))
    .expect("valid regex")
});

static MATCHERS: [Matcher<Money>; 4] = [
    Matcher {
        confidence: 0.95,
        candidates: keyword_with_symbol,
    },
    Matcher {
        confidence: 0.92,
        candidates: last_dollar_amount,
    },
    Matcher {
        confidence: 0.85,
        candidates: keyword_without_symbol,
    },
    Matcher {
        confidence: 0.85,
        candidates: other_symbol_amount,
    },
];

pub(super) fn extract_amount(text: &str) -> Field<Money> {
    run_cascade(text, &MATCHERS, |m| m.value > 0.0 && m.value < 1_000_000.0)
}

/// Parse a receipt-style number ("1,234.56", "1.234,56", "12,50", "7.63")
///
/// The rightmost separator followed by exactly two digits is the decimal
/// separator; every other separator groups thousands.
pub fn parse_number(s: &str) -> Option<f64> {
    let s: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return None;
    }

    let last_sep = s.rfind([',', '.']);
    let normalized = match last_sep {
        Some(pos) if s.len() - pos - 1 == 2 => {
            let (int_part, frac) = s.split_at(pos);
            let int_part: String = int_part.chars().filter(|c| c.is_ascii_digit()).collect();
            format!("{}.{}", int_part, &frac[1..])
        }
        Some(pos) if s.len() - pos - 1 == 1 && &s[pos..pos + 1] == "." => s.replace(',', ""),
        _ => s.chars().filter(|c| c.is_ascii_digit()).collect(),
    };

    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some((value * 100.0).round() / 100.0)
}

fn currency_for(symbol: &str) -> Option<&'static str> {
    match symbol.to_uppercase().as_str() {
        "$" | "USD" => Some("USD"),
        "€" | "EUR" => Some("EUR"),
        "£" | "GBP" => Some("GBP"),
        "¥" | "JPY" => Some("JPY"),
        "₹" | "INR" => Some("INR"),
        _ => None,
    }
}

/// Lower ranks are preferred; subtotals only win when nothing else is labelled
fn keyword_rank(keyword: &str) -> u8 {
    let k: String = keyword
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    match k.as_str() {
        "grand total" => 0,
        "total due" | "amount due" | "balance due" | "total" => 1,
        "balance" | "due" => 2,
        _ => 3,
    }
}

/// Order keyword candidates by rank, then by last occurrence
fn ranked(mut found: Vec<(u8, usize, Money)>) -> Vec<Money> {
    found.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    found.into_iter().map(|(_, _, m)| m).collect()
}

fn keyword_with_symbol(text: &str) -> Vec<Money> {
    let found = KEYWORD_SYMBOL_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let value = parse_number(&caps[3])?;
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            Some((
                keyword_rank(&caps[1]),
                start,
                Money {
                    value,
                    currency: currency_for(&caps[2]),
                },
            ))
        })
        .collect();
    ranked(found)
}

fn keyword_without_symbol(text: &str) -> Vec<Money> {
    let found = KEYWORD_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let value = parse_number(&caps[2])?;
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            Some((
                keyword_rank(&caps[1]),
                start,
                Money {
                    value,
                    currency: None,
                },
            ))
        })
        .collect();
    ranked(found)
}

fn last_dollar_amount(text: &str) -> Vec<Money> {
    let mut found: Vec<Money> = DOLLAR_RE
        .captures_iter(text)
        .filter_map(|caps| {
            Some(Money {
                value: parse_number(&caps[1])?,
                currency: Some("USD"),
            })
        })
        .collect();
    found.reverse();
    found
}

fn other_symbol_amount(text: &str) -> Vec<Money> {
    let mut found: Vec<Money> = OTHER_SYMBOL_RE
        .captures_iter(text)
        .filter_map(|caps| symbol_and_number(&caps))
        .collect();
    found.reverse();
    found
}

fn symbol_and_number(caps: &Captures<'_>) -> Option<Money> {
    let (symbol, number) = if let (Some(s), Some(n)) = (caps.get(1), caps.get(2)) {
        (s.as_str(), n.as_str())
    } else if let (Some(n), Some(s)) = (caps.get(3), caps.get(4)) {
        (s.as_str(), n.as_str())
    } else {
        (caps.get(5)?.as_str(), caps.get(6)?.as_str())
    };
    Some(Money {
        value: parse_number(number)?,
        currency: currency_for(symbol),
    })
}
