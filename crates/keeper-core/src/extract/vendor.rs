//! Vendor name extraction

use std::sync::LazyLock;

use regex::Regex;

use super::{run_cascade, Field, Matcher};

static LABELLED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:store|company|merchant|vendor|business)(?:[ \t]+name)?[ \t]*:[ \t]*(.+?)[ \t]*$",
    )
    .expect("valid regex")
});

static GREETING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:welcome[ \t]+to|thanks?[ \t]+(?:you[ \t]+)?for[ \t]+(?:visiting|shopping[ \t]+(?:at|with)))[ \t]+([^\n!.,;]+)",
    )
    .expect("valid regex")
});

// Lines that describe the receipt rather than name the merchant
static LABEL_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:total|subtotal|sub-total|tax|gst|vat|date|time|address|addr|tel|telephone|phone|fax|email|www|http|https|receipt|invoice|cashier|server|table|change|cash|card|visa|mastercard|amex|balance|due|qty|item|items|order|transaction|thank|thanks|welcome)\b",
    )
    .expect("valid regex")
});

static DATE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,4}[/.\-]\d{1,2}[/.\-]\d{2,4}|\d{1,2}:\d{2}").expect("valid regex")
});

static AMOUNT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[$€£¥₹][ \t]*\d|\d+[.,]\d{2}\b").expect("valid regex")
});

static STREET_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\d+[ \t]+\w+.*\b(?:st|street|ave|avenue|rd|road|blvd|boulevard|dr|drive|ln|lane|way|hwy|highway)\b",
    )
    .expect("valid regex")
});

static MATCHERS: [Matcher<String>; 3] = [
    Matcher {
        confidence: 0.90,
        candidates: labelled,
    },
    Matcher {
        confidence: 0.85,
        candidates: greeting,
    },
    Matcher {
        confidence: 0.70,
        candidates: first_plain_line,
    },
];

pub(super) fn extract_vendor(text: &str) -> Field<String> {
    run_cascade(text, &MATCHERS, |name| is_plausible_name(name))
}

/// 2 to 50 characters, at least two letters, mostly not digits
fn is_plausible_name(name: &str) -> bool {
    let len = name.chars().count();
    if !(2..=50).contains(&len) {
        return false;
    }
    let letters = name.chars().filter(|c| c.is_alphabetic()).count();
    if letters < 2 {
        return false;
    }
    let visible = name.chars().filter(|c| !c.is_whitespace()).count();
    let digits = name.chars().filter(|c| c.is_ascii_digit()).count();
    (digits as f64) / (visible.max(1) as f64) <= 0.3
}

fn clean(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn labelled(text: &str) -> Vec<String> {
    LABELLED_RE
        .captures_iter(text)
        .map(|caps| clean(&caps[1]))
        .collect()
}

fn greeting(text: &str) -> Vec<String> {
    GREETING_RE
        .captures_iter(text)
        .map(|caps| clean(&caps[1]))
        .collect()
}

fn first_plain_line(text: &str) -> Vec<String> {
    text.lines()
        .map(clean)
        .filter(|line| {
            !line.is_empty()
                && !LABEL_LINE_RE.is_match(line)
                && !DATE_LINE_RE.is_match(line)
                && !AMOUNT_LINE_RE.is_match(line)
                && !STREET_LINE_RE.is_match(line)
                && !line.starts_with('#')
        })
        .collect()
}
