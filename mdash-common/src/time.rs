//! Timestamp and calendar-date utilities

use chrono::{DateTime, NaiveDate, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Today's calendar date in UTC
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Number of calendar days in `[start, end]`, counting both ends
///
/// Returns 0 for a reversed range.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> u32 {
    if end < start {
        return 0;
    }
    (end - start).num_days() as u32 + 1
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Parse the date formats seen in spreadsheets and API payloads
///
/// Accepts ISO dates, RFC 3339 timestamps (date part in UTC), `MM/DD/YYYY`
/// and `DD.MM.YYYY`.
pub fn parse_flexible_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(date) = parse_iso_date(value) {
        return Some(date);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }

    // ISO date followed by a time portion ("2024-01-05 10:00:00")
    if value.len() > 10 && value.is_char_boundary(10) {
        if let Some(date) = parse_iso_date(&value[..10]) {
            return Some(date);
        }
    }

    for format in ["%m/%d/%Y", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_days_inclusive_single_day() {
        assert_eq!(days_inclusive(date(2024, 1, 1), date(2024, 1, 1)), 1);
    }

    #[test]
    fn test_days_inclusive_across_month() {
        assert_eq!(days_inclusive(date(2024, 1, 30), date(2024, 2, 2)), 4);
    }

    #[test]
    fn test_days_inclusive_reversed_is_zero() {
        assert_eq!(days_inclusive(date(2024, 2, 2), date(2024, 1, 30)), 0);
    }

    #[test]
    fn test_parse_flexible_date_formats() {
        assert_eq!(parse_flexible_date("2024-03-05"), Some(date(2024, 3, 5)));
        assert_eq!(parse_flexible_date("03/05/2024"), Some(date(2024, 3, 5)));
        assert_eq!(parse_flexible_date("05.03.2024"), Some(date(2024, 3, 5)));
        assert_eq!(
            parse_flexible_date("2024-03-05T23:30:00+00:00"),
            Some(date(2024, 3, 5))
        );
        assert_eq!(parse_flexible_date("2024-03-05 10:00"), Some(date(2024, 3, 5)));
        assert_eq!(parse_flexible_date(""), None);
        assert_eq!(parse_flexible_date("soon"), None);
    }
}
