use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Month, NaiveDate, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use scraper::{ElementRef, Selector};

use crate::models::NormalizeError;
use crate::utils::strip_artifacts;

/// Schedule pages print times in UTC-4 without saying so.
pub const SCHEDULE_UTC_OFFSET_SECS: i32 = -4 * 3600;

// "Sat Oct 19,3:00 PM"; the weekday is optional and never checked against the date.
static SCHEDULE_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:[a-z]+\.?\s+)?([a-z]{3,9})\.?\s+(\d{1,2}),\s*(\d{1,2}):(\d{2})\s*([ap]m)$")
        .expect("valid schedule date regex")
});

pub fn inner_text(element: ElementRef<'_>) -> String {
    strip_artifacts(&element.text().collect::<String>())
}

pub fn first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(inner_text)
        .filter(|text| !text.is_empty())
}

pub fn first_attr(element: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(strip_artifacts)
}

pub fn fetch_html(url: &str) -> Result<String> {
    static CLIENT: Lazy<Client> = Lazy::new(|| {
        Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("lm-calendar/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("http client")
    });

    let response = CLIENT
        .get(url)
        .send()
        .with_context(|| format!("request failed for {url}"))?;
    let response = response
        .error_for_status()
        .with_context(|| format!("non-success status for {url}"))?;
    response
        .text()
        .with_context(|| format!("unable to read response body for {url}"))
}

pub fn schedule_offset() -> Option<FixedOffset> {
    FixedOffset::east_opt(SCHEDULE_UTC_OFFSET_SECS)
}

/// Parses a year-less schedule timestamp, placing it in `year` at UTC-4.
pub fn parse_schedule_datetime(
    text: &str,
    year: i32,
) -> Result<DateTime<FixedOffset>, NormalizeError> {
    let cleaned = strip_artifacts(text);
    let bad_date = || NormalizeError::BadDate(cleaned.clone());

    let caps = SCHEDULE_DATE_RE.captures(&cleaned).ok_or_else(bad_date)?;
    let month = caps[1].parse::<Month>().map_err(|_| bad_date())?;
    let day: u32 = caps[2].parse().map_err(|_| bad_date())?;
    let hour: u32 = caps[3].parse().map_err(|_| bad_date())?;
    let minute: u32 = caps[4].parse().map_err(|_| bad_date())?;
    if !(1..=12).contains(&hour) {
        return Err(bad_date());
    }
    let is_pm = caps[5].eq_ignore_ascii_case("pm");
    let hour = hour % 12 + if is_pm { 12 } else { 0 };

    let naive = NaiveDate::from_ymd_opt(year, month.number_from_month(), day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .ok_or_else(bad_date)?;
    schedule_offset()
        .and_then(|offset| offset.from_local_datetime(&naive).single())
        .ok_or_else(bad_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_schedule_timestamp_in_fixed_offset() {
        let dt = parse_schedule_datetime("Sat Oct 19,\n3:05 PM", 2030).expect("parse");
        assert_eq!((dt.year(), dt.month(), dt.day()), (2030, 10, 19));
        assert_eq!((dt.hour(), dt.minute()), (15, 5));
        assert_eq!(dt.offset().local_minus_utc(), -4 * 3600);
        assert_eq!(dt.to_rfc3339(), "2030-10-19T15:05:00-04:00");
    }

    #[test]
    fn ignores_weekday_mismatch() {
        // Oct 19 2031 is a Sunday.
        let dt = parse_schedule_datetime("Sat Oct 19,3:00 PM", 2031).expect("parse");
        assert_eq!(dt.day(), 19);
    }

    #[test]
    fn handles_midnight_and_noon() {
        let midnight = parse_schedule_datetime("Mon Jan 6,12:30 AM", 2030).expect("parse");
        let noon = parse_schedule_datetime("Mon Jan 6,12:30 PM", 2030).expect("parse");
        assert_eq!(midnight.hour(), 0);
        assert_eq!(noon.hour(), 12);
    }

    #[test]
    fn rejects_malformed_dates() {
        for text in ["TBD", "Sat Foo 19,3:00 PM", "Sat Feb 30,3:00 PM", "Sat Oct 19,13:00 PM"] {
            assert!(
                matches!(parse_schedule_datetime(text, 2030), Err(NormalizeError::BadDate(_))),
                "{text} should not parse"
            );
        }
    }
}
