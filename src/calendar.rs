//! Google Calendar v3 access.
//!
//! [`CalendarBackend`] is the seam the reconciler talks to; [`GoogleCalendar`]
//! implements it over blocking HTTP with an explicitly passed OAuth session.

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::Event;
use crate::oauth::{OAuthError, TokenProvider};

pub const GOOGLE_CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";

const PAGE_SIZE: &str = "250";

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("calendar api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("authorization failed: {0}")]
    Auth(#[from] OAuthError),
    #[error("invalid calendar url: {0}")]
    InvalidUrl(String),
    #[error("no calendar name contains {0:?}")]
    CalendarNotFound(String),
}

impl CalendarError {
    /// The resource no longer exists on the server.
    pub fn is_gone(&self) -> bool {
        matches!(self, CalendarError::Api { status, .. } if *status == 404 || *status == 410)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDateTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

/// Raw event resource as the calendar API returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarItem {
    pub id: Option<String>,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub start: EventDateTime,
    #[serde(default)]
    pub end: EventDateTime,
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    items: Vec<CalendarItem>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarListPage {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarListEntry {
    id: String,
    #[serde(default)]
    summary: String,
}

pub trait CalendarBackend {
    fn list_events(&mut self) -> Result<Vec<CalendarItem>, CalendarError>;
    fn get_event(&mut self, event_id: &str) -> Result<CalendarItem, CalendarError>;
    fn create_event(&mut self, body: &Value) -> Result<CalendarItem, CalendarError>;
    fn update_event(
        &mut self,
        event_id: &str,
        body: &Value,
    ) -> Result<CalendarItem, CalendarError>;
    fn delete_event(&mut self, event_id: &str) -> Result<(), CalendarError>;
}

/// Lists the calendar and normalizes every timed, non-cancelled item.
/// Items that fail to normalize are logged and skipped.
pub fn fetch_calendar_events(
    backend: &mut dyn CalendarBackend,
) -> Result<Vec<Event>, CalendarError> {
    let items = backend.list_events()?;
    let mut events = Vec::with_capacity(items.len());
    for item in items {
        if item.status.as_deref() == Some("cancelled") {
            continue;
        }
        match Event::from_calendar_item(&item) {
            Ok(event) => events.push(event),
            Err(err) => warn!(id = ?item.id, "skipping calendar item: {err}"),
        }
    }
    Ok(events)
}

pub struct GoogleCalendar {
    http: Client,
    base_url: Url,
    calendar_id: String,
    tokens: Box<dyn TokenProvider>,
}

impl GoogleCalendar {
    pub fn new(
        tokens: Box<dyn TokenProvider>,
        calendar_id: impl Into<String>,
    ) -> Result<Self, CalendarError> {
        Self::with_base_url(tokens, calendar_id, GOOGLE_CALENDAR_API)
    }

    pub fn with_base_url(
        tokens: Box<dyn TokenProvider>,
        calendar_id: impl Into<String>,
        base_url: &str,
    ) -> Result<Self, CalendarError> {
        let base_url =
            Url::parse(base_url).map_err(|err| CalendarError::InvalidUrl(err.to_string()))?;
        let http = Client::builder()
            .user_agent(concat!("lm-calendar/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            calendar_id: calendar_id.into(),
            tokens,
        })
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    /// Points the client at the first calendar whose name contains `name`
    /// (case-insensitive) and returns its id.
    pub fn select_calendar(&mut self, name: &str) -> Result<String, CalendarError> {
        let id = self.find_calendar_id(name)?;
        self.calendar_id = id.clone();
        Ok(id)
    }

    pub fn find_calendar_id(&mut self, name: &str) -> Result<String, CalendarError> {
        let needle = name.to_lowercase();
        let mut page_token: Option<String> = None;

        loop {
            let url = self.url(&["users", "me", "calendarList"])?;
            let mut request = self.http.get(url);
            if let Some(token) = page_token.as_deref() {
                request = request.query(&[("pageToken", token)]);
            }
            let page: CalendarListPage = self.send(request)?.json()?;

            if let Some(entry) = page
                .items
                .into_iter()
                .find(|entry| entry.summary.to_lowercase().contains(&needle))
            {
                debug!(calendar = %entry.summary, id = %entry.id, "matched calendar");
                return Ok(entry.id);
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Err(CalendarError::CalendarNotFound(name.to_string())),
            }
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, CalendarError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CalendarError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn events_url(&self, event_id: Option<&str>) -> Result<Url, CalendarError> {
        match event_id {
            Some(id) => self.url(&["calendars", self.calendar_id.as_str(), "events", id]),
            None => self.url(&["calendars", self.calendar_id.as_str(), "events"]),
        }
    }

    fn send(&mut self, request: RequestBuilder) -> Result<Response, CalendarError> {
        let token = self.tokens.access_token()?;
        let response = request.bearer_auth(token).send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(CalendarError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

impl CalendarBackend for GoogleCalendar {
    fn list_events(&mut self) -> Result<Vec<CalendarItem>, CalendarError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = self.events_url(None)?;
            let mut request = self.http.get(url).query(&[("maxResults", PAGE_SIZE)]);
            if let Some(token) = page_token.as_deref() {
                request = request.query(&[("pageToken", token)]);
            }
            let page: EventsPage = self.send(request)?.json()?;
            items.extend(page.items);

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(count = items.len(), calendar = %self.calendar_id, "listed calendar events");
        Ok(items)
    }

    fn get_event(&mut self, event_id: &str) -> Result<CalendarItem, CalendarError> {
        let url = self.events_url(Some(event_id))?;
        let request = self.http.get(url);
        Ok(self.send(request)?.json()?)
    }

    fn create_event(&mut self, body: &Value) -> Result<CalendarItem, CalendarError> {
        let url = self.events_url(None)?;
        let request = self.http.post(url).json(body);
        let created: CalendarItem = self.send(request)?.json()?;
        debug!(id = ?created.id, "created calendar event");
        Ok(created)
    }

    fn update_event(
        &mut self,
        event_id: &str,
        body: &Value,
    ) -> Result<CalendarItem, CalendarError> {
        let url = self.events_url(Some(event_id))?;
        let request = self.http.put(url).json(body);
        let updated: CalendarItem = self.send(request)?.json()?;
        debug!(id = %event_id, "updated calendar event");
        Ok(updated)
    }

    fn delete_event(&mut self, event_id: &str) -> Result<(), CalendarError> {
        let url = self.events_url(Some(event_id))?;
        let request = self.http.delete(url);
        let response = self.send(request)?;
        if response.status() != StatusCode::NO_CONTENT {
            debug!(id = %event_id, status = %response.status(), "unexpected delete status");
        }
        Ok(())
    }
}
