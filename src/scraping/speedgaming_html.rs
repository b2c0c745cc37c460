use std::fs;

use anyhow::{Context, Result};
use chrono::{Datelike, Local};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use super::base;
use super::ScheduleSource;
use crate::config::ScheduleLocation;
use crate::models::{split_commentators, split_participants, Event, NormalizeError};

const DATE_CELL: usize = 0;
const PARTICIPANTS_CELL: usize = 1;
const STREAM_CELL: usize = 2;
const COMMENTATORS_CELL: usize = 3;
const REQUIRED_CELLS: usize = 4;

static TABLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table").expect("schedule table selector"));
static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr").expect("schedule row selector"));
static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td").expect("schedule cell selector"));
static SPAN_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span").expect("schedule date span"));
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("schedule stream link"));

/// A SpeedGaming-style schedule: one table, a header row, then one row per
/// match with date, participants, stream and commentator cells.
pub struct SpeedGaming {
    location: ScheduleLocation,
}

impl SpeedGaming {
    pub fn new(location: ScheduleLocation) -> Self {
        Self { location }
    }
}

impl ScheduleSource for SpeedGaming {
    fn origin(&self) -> String {
        match &self.location {
            ScheduleLocation::Url(url) => url.clone(),
            ScheduleLocation::LocalIndex(path) => path.display().to_string(),
        }
    }

    fn fetch(&self) -> Result<Vec<Event>> {
        let html = match &self.location {
            ScheduleLocation::Url(url) => {
                debug!("fetching schedule from the web -> {url}");
                base::fetch_html(url)?
            }
            ScheduleLocation::LocalIndex(path) => {
                debug!("reading schedule from local file -> {}", path.display());
                fs::read_to_string(path)
                    .with_context(|| format!("unable to read local index {}", path.display()))?
            }
        };
        Ok(parse_document(&html, Local::now().year()))
    }
}

/// Normalizes every well-formed row of the first table. Rows that cannot be
/// normalized are logged and left out.
pub fn parse_document(html: &str, year: i32) -> Vec<Event> {
    let document = Html::parse_document(html);
    let table = match document.select(&TABLE_SELECTOR).next() {
        Some(table) => table,
        None => {
            warn!("schedule page has no table");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    // The first row is the header.
    for row in table.select(&ROW_SELECTOR).skip(1) {
        match parse_row(row, year) {
            Ok(event) => events.push(event),
            Err(err) => warn!("tossing schedule row ({err}): {}", base::inner_text(row)),
        }
    }
    debug!(count = events.len(), "parsed schedule events");
    events
}

fn parse_row(row: ElementRef<'_>, year: i32) -> Result<Event, NormalizeError> {
    let cells: Vec<ElementRef<'_>> = row.select(&CELL_SELECTOR).collect();
    if cells.len() < REQUIRED_CELLS {
        return Err(NormalizeError::MissingCells {
            found: cells.len(),
            expected: REQUIRED_CELLS,
        });
    }

    let date_cell = cells[DATE_CELL];
    let date_text = base::first_text(&date_cell, &SPAN_SELECTOR)
        .unwrap_or_else(|| base::inner_text(date_cell));
    let start_time = base::parse_schedule_datetime(&date_text, year)?;

    let participants = split_participants(&base::inner_text(cells[PARTICIPANTS_CELL]));
    let stream_url =
        base::first_attr(&cells[STREAM_CELL], &LINK_SELECTOR, "href").unwrap_or_default();
    let commentators = split_commentators(&base::inner_text(cells[COMMENTATORS_CELL]));

    Event::new(start_time, stream_url, participants, commentators)
}
