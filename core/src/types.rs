//! Shared primitive types used across the pipeline.

use chrono::{NaiveDate, NaiveDateTime};

/// Core banking account number (`ACCTNBR`).
pub type AccountId = i64;

/// Person or organization number (`PERSNBR` / `ORGNBR`).
pub type EntityId = i64;

/// The canonical run identifier, stamped on every log line of a run.
pub type RunId = String;

/// Date format used on the wire and in the audit file.
pub const DATE_FORMAT: &str = "%m/%d/%Y";

/// Render a date the way the audit file and the email templates expect.
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

const DATE_FORMATS: [&str; 4] = ["%m/%d/%Y", "%m-%d-%Y", "%m.%d.%Y", "%Y-%m-%d"];

/// Timestamp shapes drivers hand back for DATE columns; the time is dropped.
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
];

/// Parse `MM/DD/YYYY` (also `-` or `.` separated), ISO `YYYY-MM-DD`, or either
/// of those followed by a time of day.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
        })
}
