//! Invoice / receipt number extraction

use std::sync::LazyLock;

use regex::Regex;

use super::{run_cascade, Field, Matcher};

// Optional "no." / "number" / "#" / "id" between a label and its token
const SUFFIX: &str = r"\.?[ \t]*(?:no\.?|num(?:ber)?|#|id)?[ \t]*[:#.]?[ \t]*";
const TOKEN: &str = r"([A-Za-z0-9][A-Za-z0-9\-_]*)";

static INVOICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:invoice|inv)\b{SUFFIX}{TOKEN}")).expect("valid regex")
});

static RECEIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:receipt|rcpt)\b{SUFFIX}{TOKEN}")).expect("valid regex")
});

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:transaction|trans|txn|order|ref(?:erence)?)\b{SUFFIX}{TOKEN}"
    ))
    .expect("valid regex")
});

static HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"#[ \t]*{TOKEN}")).expect("valid regex"));

static BARE_DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(\d{4,20})[ \t]*$").expect("valid regex"));

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9\-_]{2,20}$").expect("valid regex"));

/// Words that follow a label but are never the number itself
const STOP_WORDS: &[&str] = &[
    "number", "num", "no", "id", "date", "time", "total", "receipt", "invoice", "order", "ref",
    "copy", "customer", "merchant", "store", "transaction", "type", "details", "summary", "for",
    "of", "to", "from", "the", "is", "tax", "amount", "cash", "card", "items", "item", "qty",
    "page", "subtotal", "balance", "due", "paid", "thank", "thanks", "you",
];

static MATCHERS: [Matcher<String>; 5] = [
    Matcher {
        confidence: 0.95,
        candidates: invoice_labelled,
    },
    Matcher {
        confidence: 0.92,
        candidates: receipt_labelled,
    },
    Matcher {
        confidence: 0.88,
        candidates: reference_labelled,
    },
    Matcher {
        confidence: 0.75,
        candidates: hash_prefixed,
    },
    Matcher {
        confidence: 0.60,
        candidates: bare_digits,
    },
];

pub(super) fn extract_invoice(text: &str) -> Field<String> {
    run_cascade(text, &MATCHERS, |token| is_valid_token(token))
}

fn is_valid_token(token: &str) -> bool {
    TOKEN_RE.is_match(token) && !STOP_WORDS.contains(&token.to_lowercase().as_str())
}

fn first_group(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches(['-', '_']).to_string())
        .collect()
}

fn invoice_labelled(text: &str) -> Vec<String> {
    first_group(&INVOICE_RE, text)
}

fn receipt_labelled(text: &str) -> Vec<String> {
    first_group(&RECEIPT_RE, text)
}

fn reference_labelled(text: &str) -> Vec<String> {
    first_group(&REFERENCE_RE, text)
}

fn hash_prefixed(text: &str) -> Vec<String> {
    first_group(&HASH_RE, text)
}

fn bare_digits(text: &str) -> Vec<String> {
    first_group(&BARE_DIGITS_RE, text)
}
