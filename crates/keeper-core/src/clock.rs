//! Time source, receipt filenames and timestamp formatting
//!
//! Receipt images live at `<root>/<YYYY>/<MM>/<DD>-<HHMMSS>.jpg`, where the
//! time is the local wall-clock time of capture. The storage scanner only
//! adopts files whose names match [`RECEIPT_FILENAME_PATTERN`], so every
//! filename produced here must round-trip through [`parse_receipt_filename`].

use std::sync::{Arc, LazyLock, Mutex};

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;

/// Filename pattern recognized by the storage scanner
pub const RECEIPT_FILENAME_PATTERN: &str = r"^(\d{2})-(\d{2})(\d{2})(\d{2})\.(jpg|jpeg)$";

/// Storage format for timestamps in SQLite ("YYYY-MM-DD HH:MM:SS")
pub const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(RECEIPT_FILENAME_PATTERN).expect("valid regex"));

/// Source of the current time
///
/// Every component that needs "now" takes a [`SharedClock`] so tests can
/// drive backoff and defaults deterministically.
pub trait Clock: Send + Sync {
    /// Current instant in UTC
    fn now(&self) -> DateTime<Utc>;

    /// Current local wall-clock time (used for capture timestamps and filenames)
    fn local_now(&self) -> NaiveDateTime;
}

pub type SharedClock = Arc<dyn Clock>;

/// The real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A manually driven clock for tests
///
/// Local time is reported as the UTC wall-clock so results do not depend on
/// the machine's timezone.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Create a clock at the given UTC wall-clock time
    pub fn at(ts: NaiveDateTime) -> Self {
        Self::new(ts.and_utc())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn local_now(&self) -> NaiveDateTime {
        self.now().naive_utc()
    }
}

/// Create the default shared clock
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Calendar components of a capture timestamp, zero-padded for storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ymd {
    /// Four-digit year ("2024")
    pub year: String,
    /// Two-digit month ("03")
    pub month: String,
    /// Two-digit day ("09")
    pub day: String,
}

/// Split a timestamp into zero-padded year, month and day
pub fn ymd(ts: NaiveDateTime) -> Ymd {
    Ymd {
        year: format!("{:04}", ts.year()),
        month: format!("{:02}", ts.month()),
        day: format!("{:02}", ts.day()),
    }
}

/// Receipt filename for a capture time: `DD-HHMMSS.<ext>`
pub fn filename_for(ts: NaiveDateTime, ext: &str) -> String {
    format!("{}.{}", ts.format("%d-%H%M%S"), ext.trim_start_matches('.'))
}

/// Whether a filename matches the receipt naming scheme
pub fn is_receipt_filename(name: &str) -> bool {
    FILENAME_RE.is_match(name)
}

/// Parse the day of month and capture time out of a receipt filename
pub fn parse_receipt_filename(name: &str) -> Option<(u32, NaiveTime)> {
    let caps = FILENAME_RE.captures(name)?;
    let day: u32 = caps[1].parse().ok()?;
    let hour: u32 = caps[2].parse().ok()?;
    let minute: u32 = caps[3].parse().ok()?;
    let second: u32 = caps[4].parse().ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    Some((day, time))
}

/// Rebuild the capture timestamp from the `<YYYY>/<MM>/<filename>` layout
///
/// Returns `None` when the components do not form a real date/time
/// (e.g. `31-...` inside `02/`).
pub fn captured_at_for(year: &str, month: &str, filename: &str) -> Option<NaiveDateTime> {
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let (day, time) = parse_receipt_filename(filename)?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_time(time))
}

/// Format a UTC instant for storage
pub fn format_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(DB_TIMESTAMP_FORMAT).to_string()
}

/// Format a local wall-clock time for storage
pub fn format_naive_timestamp(ts: NaiveDateTime) -> String {
    ts.format(DB_TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp
pub fn parse_naive_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DB_TIMESTAMP_FORMAT).ok()
}
