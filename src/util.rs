use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc, Weekday};
use chrono_tz::Asia::Dubai;

use crate::errors::{CrawlerError, Result};

// Clock helpers: the crawler lives on the bank's calendar (Gulf Standard Time).
pub fn now_local() -> NaiveDateTime {
    let now = Utc::now().with_timezone(&Dubai).naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn today_local() -> NaiveDate {
    now_local().date()
}

// The bank publishes rates that take effect a configured number of days
// after the publication date.
pub fn effective_rate_date(update_date: NaiveDate, days_to_add: i64) -> NaiveDate {
    update_date + Duration::days(days_to_add)
}

// Most recent weekday strictly before `today`; weekend days step back to Friday.
pub fn last_weekday(today: NaiveDate) -> NaiveDate {
    let mut date = today - Duration::days(1);
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date -= Duration::days(1);
    }
    date
}

// Rates are compared at six-decimal precision everywhere.
pub fn rates_equal(a: f64, b: f64) -> bool {
    (a * 1e6).round() == (b * 1e6).round()
}

pub fn rate_presentation(value: f64) -> String {
    format!("{:.6}", value)
}

pub fn time_presentation(value: NaiveDateTime) -> String {
    value.format("%H:%M:%S").to_string()
}

// Compact date formats used by the read API.
pub fn compact_date(value: NaiveDate) -> String {
    value.format("%Y%m%d").to_string()
}

pub fn compact_datetime(value: NaiveDateTime) -> String {
    value.format("%Y%m%d%H%M%S").to_string()
}

// An API date segment is either 8 digits (a date) or 14 digits (a date with time).
pub fn parse_compact_datetime(value: &str) -> Result<NaiveDateTime> {
    match value.len() {
        8 => {
            let date = NaiveDate::parse_from_str(value, "%Y%m%d")?;
            date.and_hms_opt(0, 0, 0)
                .ok_or_else(|| CrawlerError::DataError(format!("Invalid date: {}", value)))
        }
        14 => Ok(NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%S")?),
        _ => Err(CrawlerError::DataError(format!(
            "Invalid date length: {}",
            value
        ))),
    }
}
