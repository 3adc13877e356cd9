//! Receipt date extraction

use std::sync::LazyLock;

use chrono::{Months, NaiveDate};
use regex::Regex;

use super::{run_cascade, Field, Matcher};

const MONTHS: &str = r"jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

static ISO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})[-/](\d{1,2})[-/](\d{1,2})\b").expect("valid regex"));

static MONTH_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({MONTHS})\.?[ \t]+(\d{{1,2}})(?:st|nd|rd|th)?,?[ \t]+(\d{{4}})\b"
    ))
    .expect("valid regex")
});

static DAY_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?[ \t]+({MONTHS})\.?,?[ \t]+(\d{{4}})\b"
    ))
    .expect("valid regex")
});

static US_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})\b").expect("valid regex"));

static EU_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})[./\-](\d{1,2})[./\-](\d{4})\b").expect("valid regex"));

static MATCHERS: [Matcher<NaiveDate>; 4] = [
    Matcher {
        confidence: 0.95,
        candidates: iso_dates,
    },
    Matcher {
        confidence: 0.90,
        candidates: written_dates,
    },
    Matcher {
        confidence: 0.85,
        candidates: us_dates,
    },
    Matcher {
        confidence: 0.80,
        candidates: eu_dates,
    },
];

/// Earliest receipt date accepted
fn earliest() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or(NaiveDate::MIN)
}

pub(super) fn extract_date(text: &str, today: NaiveDate) -> Field<NaiveDate> {
    let latest = today.checked_add_months(Months::new(12));
    run_cascade(text, &MATCHERS, |d| {
        *d >= earliest() && latest.map_or(true, |latest| *d < latest)
    })
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    let n = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(n)
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// Two-digit years pivot at 70: `24` is 2024, `95` is 1995
fn full_year(year: &str) -> Option<i32> {
    let y: i32 = year.parse().ok()?;
    Some(match year.len() {
        2 if y < 70 => 2000 + y,
        2 => 1900 + y,
        _ => y,
    })
}

fn iso_dates(text: &str) -> Vec<NaiveDate> {
    ISO_RE
        .captures_iter(text)
        .filter_map(|caps| ymd(&caps[1], &caps[2], &caps[3]))
        .collect()
}

fn written_dates(text: &str) -> Vec<NaiveDate> {
    let mut found: Vec<(usize, NaiveDate)> = Vec::new();
    for caps in MONTH_FIRST_RE.captures_iter(text) {
        let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let date = month_number(&caps[1]).and_then(|m| {
            NaiveDate::from_ymd_opt(caps[3].parse().ok()?, m, caps[2].parse().ok()?)
        });
        if let Some(date) = date {
            found.push((start, date));
        }
    }
    for caps in DAY_FIRST_RE.captures_iter(text) {
        let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let date = month_number(&caps[2]).and_then(|m| {
            NaiveDate::from_ymd_opt(caps[3].parse().ok()?, m, caps[1].parse().ok()?)
        });
        if let Some(date) = date {
            found.push((start, date));
        }
    }
    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, d)| d).collect()
}

fn us_dates(text: &str) -> Vec<NaiveDate> {
    US_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let year = full_year(&caps[3])?;
            NaiveDate::from_ymd_opt(year, caps[1].parse().ok()?, caps[2].parse().ok()?)
        })
        .collect()
}

fn eu_dates(text: &str) -> Vec<NaiveDate> {
    EU_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let year: i32 = caps[3].parse().ok()?;
            let first: u32 = caps[1].parse().ok()?;
            let second: u32 = caps[2].parse().ok()?;
            // DD/MM unless the second number cannot be a month
            let (day, month) = if second > 12 && first <= 12 {
                (second, first)
            } else {
                (first, second)
            };
            NaiveDate::from_ymd_opt(year, month, day)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_iso_date() {
        let result = extract_date("2024-01-15 14:32", today());
        assert_eq!(result.value, date(2024, 1, 15));
        assert_eq!(result.confidence, 0.95);

        let result = extract_date("Date: 2024/03/07", today());
        assert_eq!(result.value, date(2024, 3, 7));
    }

    #[test]
    fn test_written_month_both_orders() {
        let result = extract_date("Jan 15, 2024", today());
        assert_eq!(result.value, date(2024, 1, 15));
        assert_eq!(result.confidence, 0.90);

        let result = extract_date("15th January 2024", today());
        assert_eq!(result.value, date(2024, 1, 15));

        let result = extract_date("Sept. 3 2023", today());
        assert_eq!(result.value, date(2023, 9, 3));
    }

    #[test]
    fn test_us_date_is_preferred_when_valid() {
        let result = extract_date("05/13/2024", today());
        assert_eq!(result.value, date(2024, 5, 13));
        assert_eq!(result.confidence, 0.85);

        let result = extract_date("01/02/24", today());
        assert_eq!(result.value, date(2024, 1, 2));
    }

    #[test]
    fn test_eu_date_when_us_is_impossible() {
        let result = extract_date("13/05/2024", today());
        assert_eq!(result.value, date(2024, 5, 13));
        assert_eq!(result.confidence, 0.80);

        let result = extract_date("13.05.2024", today());
        assert_eq!(result.value, date(2024, 5, 13));
    }

    #[test]
    fn test_eu_swap_when_second_is_not_a_month() {
        let result = extract_date("01-15-2024", today());
        assert_eq!(result.value, date(2024, 1, 15));
        assert_eq!(result.confidence, 0.80);
    }

    #[test]
    fn test_validity_window() {
        // One year out is rejected, one day less is accepted
        assert!(extract_date("2025-06-01", today()).value.is_none());
        assert!(extract_date("2025-06-02", today()).value.is_none());
        assert_eq!(extract_date("2025-05-31", today()).value, date(2025, 5, 31));

        assert!(extract_date("1989-12-31", today()).value.is_none());
        assert_eq!(extract_date("1990-01-01", today()).value, date(1990, 1, 1));
    }

    #[test]
    fn test_invalid_iso_falls_through() {
        // Feb 30 is not a date; the written date further on is used
        let result = extract_date("2024-02-30\nMarch 1, 2024", today());
        assert_eq!(result.value, date(2024, 3, 1));
        assert_eq!(result.confidence, 0.90);
    }

    #[test]
    fn test_no_date() {
        let result = extract_date("STARBUCKS COFFEE\nTOTAL 7.63", today());
        assert_eq!(result, Field::empty());
    }
}
