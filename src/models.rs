use std::fmt;

use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};
use thiserror::Error;

use crate::calendar::CalendarItem;

/// Name the calendar stores next to every start/end timestamp.
pub const CALENDAR_TIMEZONE: Tz = chrono_tz::Etc::GMTMinus4;

const PARTICIPANT_SEPARATOR: &str = " vs ";
const COMMENTATOR_SEPARATOR: &str = ", ";
const DESCRIPTION_PREFIX: &str = "Commentary Panel: ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("unrecognized schedule date: {0:?}")]
    BadDate(String),
    #[error("schedule row has {found} cells, expected at least {expected}")]
    MissingCells { found: usize, expected: usize },
    #[error("record has no participants")]
    NoParticipants,
    #[error("calendar item {id:?} has no {field} dateTime")]
    MissingTimestamp { id: Option<String>, field: &'static str },
    #[error("calendar item {id:?} has an invalid timestamp {value:?}")]
    BadTimestamp { id: Option<String>, value: String },
}

/// One scheduled match, normalized from either the schedule page or the calendar.
#[derive(Debug, Clone)]
pub struct Event {
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub stream_url: String,
    pub participants: Vec<String>,
    pub commentators: Vec<String>,
    /// Set only for events read from (or written to) the calendar.
    pub event_id: Option<String>,
}

impl Event {
    /// Builds an event with the default one hour slot.
    pub fn new(
        start_time: DateTime<FixedOffset>,
        stream_url: impl Into<String>,
        participants: Vec<String>,
        commentators: Vec<String>,
    ) -> Result<Self, NormalizeError> {
        if participants.iter().all(|name| name.is_empty()) {
            return Err(NormalizeError::NoParticipants);
        }
        Ok(Self {
            start_time,
            end_time: start_time + Duration::hours(1),
            stream_url: stream_url.into(),
            participants,
            commentators,
            event_id: None,
        })
    }

    /// Normalizes one item returned by the calendar API.
    pub fn from_calendar_item(item: &CalendarItem) -> Result<Self, NormalizeError> {
        let start_time = parse_item_time(item, item.start.date_time.as_deref(), "start")?;
        let end_time = parse_item_time(item, item.end.date_time.as_deref(), "end")?;

        let participants = split_participants(item.summary.as_deref().unwrap_or_default());
        if participants.is_empty() {
            return Err(NormalizeError::NoParticipants);
        }

        let commentators = item
            .description
            .as_deref()
            .and_then(|text| text.split(": ").last())
            .map(split_commentators)
            .unwrap_or_default();

        Ok(Self {
            start_time,
            end_time,
            stream_url: item.location.clone().unwrap_or_default(),
            participants,
            commentators,
            event_id: item.id.clone(),
        })
    }

    pub fn summary(&self) -> String {
        self.participants.join(PARTICIPANT_SEPARATOR)
    }

    pub fn description(&self) -> String {
        format!(
            "{DESCRIPTION_PREFIX}{}",
            self.commentators.join(COMMENTATOR_SEPARATOR)
        )
    }

    /// Sorted, lower-cased participants. Two events pair only if their keys match.
    pub fn participants_key(&self) -> Vec<String> {
        normalized(&self.participants)
    }

    /// True when both events are still upcoming and list the same participants.
    pub fn is_paired_with(&self, other: &Event, now: DateTime<Utc>) -> bool {
        self.is_upcoming(now)
            && other.is_upcoming(now)
            && participants_equal(&self.participants, &other.participants)
    }

    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.start_time.with_timezone(&Utc) > now
    }

    /// Request body for the calendar's insert and update calls.
    pub fn to_json(&self) -> Value {
        json!({
            "summary": self.summary(),
            "location": self.stream_url,
            "description": self.description(),
            "start": {
                "dateTime": self.start_time.to_rfc3339_opts(SecondsFormat::Secs, false),
                "timeZone": CALENDAR_TIMEZONE.name(),
            },
            "end": {
                "dateTime": self.end_time.to_rfc3339_opts(SecondsFormat::Secs, false),
                "timeZone": CALENDAR_TIMEZONE.name(),
            },
            "attendeesOmitted": true,
        })
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.start_time == other.start_time
            && self.end_time == other.end_time
            && self.stream_url == other.stream_url
            && participants_equal(&self.participants, &other.participants)
            && participants_equal(&self.commentators, &other.commentators)
    }
}

impl Eq for Event {}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]: {} (commentators: {}) -> {}",
            self.start_time.format("%b %d, %I:%M %p"),
            self.summary(),
            self.commentators.join(COMMENTATOR_SEPARATOR),
            self.stream_url
        )
    }
}

/// Case-insensitive, order-independent list comparison.
pub fn participants_equal(first: &[String], second: &[String]) -> bool {
    first.len() == second.len() && normalized(first) == normalized(second)
}

pub fn split_participants(text: &str) -> Vec<String> {
    split_names(text, PARTICIPANT_SEPARATOR)
}

pub fn split_commentators(text: &str) -> Vec<String> {
    split_names(text, COMMENTATOR_SEPARATOR)
}

fn split_names(text: &str, separator: &str) -> Vec<String> {
    text.split(separator)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalized(names: &[String]) -> Vec<String> {
    let mut lowered: Vec<String> = names.iter().map(|name| name.to_lowercase()).collect();
    lowered.sort();
    lowered
}

fn parse_item_time(
    item: &CalendarItem,
    value: Option<&str>,
    field: &'static str,
) -> Result<DateTime<FixedOffset>, NormalizeError> {
    let value = value.ok_or_else(|| NormalizeError::MissingTimestamp {
        id: item.id.clone(),
        field,
    })?;
    DateTime::parse_from_rfc3339(value).map_err(|_| NormalizeError::BadTimestamp {
        id: item.id.clone(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    fn at(hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::west_opt(4 * 3600)
            .expect("offset")
            .with_ymd_and_hms(2030, 6, 1, hour, 0, 0)
            .single()
            .expect("valid time")
    }

    fn event(participants: &[&str], commentators: &[&str], stream: &str) -> Event {
        Event::new(at(15), stream, names(participants), names(commentators)).expect("event")
    }

    fn calendar_item(value: Value) -> CalendarItem {
        serde_json::from_value(value).expect("calendar item")
    }

    #[test]
    fn equality_is_reflexive_and_symmetric() {
        let a = event(&["Alice", "Bob"], &["Cid"], "https://twitch.tv/a");
        let b = event(&["bob", "ALICE"], &["cid"], "https://twitch.tv/a");
        let c = event(&["Alice", "Bob"], &["Cid"], "https://twitch.tv/c");

        assert_eq!(a, a);
        assert_eq!(a == b, b == a);
        assert!(a == b);
        assert_eq!(a == c, c == a);
        assert!(a != c);
    }

    #[test]
    fn equality_ignores_event_id() {
        let mut a = event(&["A", "B"], &[], "");
        let b = event(&["A", "B"], &[], "");
        a.event_id = Some("abc123".into());
        assert_eq!(a, b);
    }

    #[test]
    fn participants_compare_case_insensitively_in_any_order() {
        assert!(participants_equal(
            &names(&["Alice", "Bob"]),
            &names(&["bob", "alice"])
        ));
        assert!(!participants_equal(
            &names(&["Alice", "Bob"]),
            &names(&["Alice", "Carol"])
        ));
        assert!(!participants_equal(&names(&["Alice"]), &names(&["Alice", "Alice"])));
    }

    #[test]
    fn pairing_requires_matching_participants() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let a = event(&["A", "B"], &["x"], "one");
        let b = event(&["b", "a"], &[], "two");
        let c = event(&["A", "C"], &["x"], "one");

        assert!(a.is_paired_with(&b, now));
        assert!(!a.is_paired_with(&c, now));
    }

    #[test]
    fn pairing_requires_both_events_upcoming() {
        let a = event(&["A", "B"], &[], "");
        let b = event(&["A", "B"], &[], "");
        let after_start = at(16).with_timezone(&Utc);
        assert!(!a.is_paired_with(&b, after_start));
    }

    #[test]
    fn new_rejects_empty_participants() {
        assert_eq!(
            Event::new(at(12), "", Vec::new(), Vec::new()).unwrap_err(),
            NormalizeError::NoParticipants
        );
    }

    #[test]
    fn new_derives_one_hour_end() {
        let e = event(&["A", "B"], &[], "");
        assert_eq!(e.end_time - e.start_time, Duration::hours(1));
    }

    #[test]
    fn calendar_item_round_trips_through_to_json() {
        let raw = json!({
            "id": "evt1",
            "summary": "Alice vs Bob",
            "location": "https://twitch.tv/speedgaming",
            "description": "Commentary Panel: Cid, Dee",
            "start": { "dateTime": "2030-06-01T15:00:00-04:00", "timeZone": "Etc/GMT-4" },
            "end": { "dateTime": "2030-06-01T16:00:00-04:00", "timeZone": "Etc/GMT-4" }
        });
        let event = Event::from_calendar_item(&calendar_item(raw.clone())).expect("normalize");

        assert_eq!(event.event_id.as_deref(), Some("evt1"));
        assert_eq!(event.participants, names(&["Alice", "Bob"]));
        assert_eq!(event.commentators, names(&["Cid", "Dee"]));

        let projected = event.to_json();
        for key in ["summary", "location", "description"] {
            assert_eq!(projected[key], raw[key], "{key} should survive the round trip");
        }
        assert_eq!(projected["start"]["dateTime"], raw["start"]["dateTime"]);
        assert_eq!(projected["end"]["dateTime"], raw["end"]["dateTime"]);
        assert_eq!(projected["start"]["timeZone"], "Etc/GMT-4");
        assert_eq!(projected["attendeesOmitted"], true);
    }

    #[test]
    fn calendar_item_without_location_or_commentators() {
        let raw = json!({
            "id": "evt2",
            "summary": "Alice vs Bob",
            "description": "Commentary Panel: ",
            "start": { "dateTime": "2030-06-01T15:00:00-04:00" },
            "end": { "dateTime": "2030-06-01T16:00:00-04:00" }
        });
        let event = Event::from_calendar_item(&calendar_item(raw)).expect("normalize");
        assert_eq!(event.stream_url, "");
        assert!(event.commentators.is_empty());
        assert_eq!(event.to_json()["description"], "Commentary Panel: ");
    }

    #[test]
    fn all_day_calendar_items_are_rejected() {
        let raw = json!({
            "id": "allday",
            "summary": "Alice vs Bob",
            "start": { "date": "2030-06-01" },
            "end": { "date": "2030-06-02" }
        });
        let err = Event::from_calendar_item(&calendar_item(raw)).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingTimestamp { field: "start", .. }));
    }

    #[test]
    fn display_matches_log_format() {
        let e = event(&["A", "B"], &["C", "D"], "https://s");
        assert_eq!(
            e.to_string(),
            "[Jun 01, 03:00 PM]: A vs B (commentators: C, D) -> https://s"
        );
    }
}
