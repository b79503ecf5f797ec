use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Asia::Jerusalem;
use tracing::info;

/// Date format expected by the portal's date pickers.
pub const PORTAL_DATE_FORMAT: &str = "%d/%m/%Y";

/// The report target date: yesterday in the portal's timezone (Asia/Jerusalem).
///
/// The portal operates on Israel local time, so "yesterday" is computed there
/// rather than in UTC or the machine's local zone. A run at 00:30 UTC would
/// otherwise pick the wrong day for most of the year.
pub fn target_date() -> NaiveDate {
    let date = yesterday_of(Utc::now());
    info!("Target report date (Asia/Jerusalem yesterday): {}", date);
    date
}

/// Yesterday in Asia/Jerusalem relative to the given instant.
pub fn yesterday_of(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Jerusalem).date_naive() - Duration::days(1)
}

/// Format a date the way the portal's date pickers expect it (`dd/mm/yyyy`).
pub fn format_portal_date(date: NaiveDate) -> String {
    date.format(PORTAL_DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn portal_format_is_day_month_year() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(format_portal_date(date), "07/03/2024");
    }

    #[test]
    fn yesterday_crosses_midnight_before_utc() {
        // 22:30 UTC is already the next day in Jerusalem (UTC+2/+3), so
        // "yesterday" there is still the current UTC date.
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 22, 30, 0).unwrap();
        assert_eq!(yesterday_of(now), NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
    }

    #[test]
    fn yesterday_during_the_day() {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        assert_eq!(yesterday_of(now), NaiveDate::from_ymd_opt(2024, 1, 9).unwrap());
    }

    #[test]
    fn yesterday_crosses_month_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(yesterday_of(now), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }
}
