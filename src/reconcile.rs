//! Pairing of calendar events with schedule events, and the create/update/delete
//! plan that brings the calendar in line with the schedule.
//!
//! Pairing and classification are pure; only [`apply_actions`] and
//! [`reconcile`] talk to a [`CalendarBackend`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use tracing::{debug, error, info, warn};

use crate::calendar::CalendarBackend;
use crate::models::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PairingStrategy {
    /// Match on the normalized participants, independent of list order.
    #[default]
    Keyed,
    /// Compare only the last remaining event of each list and stop at the
    /// first mismatch.
    TailGreedy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PastEventPolicy {
    /// Events that already started are left alone on both sides.
    #[default]
    Preserve,
    /// Events that already started never pair, so they are deleted from the
    /// calendar or created from the schedule like any other leftover.
    Strict,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub strategy: PairingStrategy,
    pub past_events: PastEventPolicy,
}

/// Result of matching the calendar against the schedule.
#[derive(Debug, Default)]
pub struct Pairing {
    /// `(calendar, schedule)` events describing the same match.
    pub pairs: Vec<(Event, Event)>,
    /// Deletion candidates.
    pub unpaired_calendar: Vec<Event>,
    /// Creation candidates.
    pub unpaired_schedule: Vec<Event>,
    /// Past events set aside under [`PastEventPolicy::Preserve`].
    pub retained: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    Unchanged { calendar: Event, schedule: Event },
    Update { event_id: String, event: Event },
    Create { event: Event },
    Delete { event_id: String, event: Event },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub unchanged: usize,
    pub updated: usize,
    pub created: usize,
    pub deleted: usize,
    pub failed: usize,
    pub retained: usize,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unchanged: {}, updated: {}, created: {}, deleted: {}, failed: {}, retained: {}",
            self.unchanged, self.updated, self.created, self.deleted, self.failed, self.retained
        )
    }
}

pub fn pair_events(
    calendar: Vec<Event>,
    schedule: Vec<Event>,
    options: &ReconcileOptions,
    now: DateTime<Utc>,
) -> Pairing {
    let mut retained = Vec::new();
    let (calendar, schedule) = match options.past_events {
        PastEventPolicy::Strict => (calendar, schedule),
        PastEventPolicy::Preserve => {
            let (calendar, past_calendar) = split_upcoming(calendar, now);
            let (schedule, past_schedule) = split_upcoming(schedule, now);
            retained.extend(past_calendar);
            retained.extend(past_schedule);
            (calendar, schedule)
        }
    };

    let mut pairing = match options.strategy {
        PairingStrategy::Keyed => pair_keyed(calendar, schedule, now),
        PairingStrategy::TailGreedy => pair_tail_greedy(calendar, schedule, now),
    };
    pairing.retained = retained;

    info!(
        paired = pairing.pairs.len(),
        unpaired_calendar = pairing.unpaired_calendar.len(),
        unpaired_schedule = pairing.unpaired_schedule.len(),
        retained = pairing.retained.len(),
        "pairing stats"
    );
    pairing
}

fn split_upcoming(events: Vec<Event>, now: DateTime<Utc>) -> (Vec<Event>, Vec<Event>) {
    events.into_iter().partition(|event| event.is_upcoming(now))
}

fn sort_by_start(events: &mut [Event]) {
    events.sort_by_key(|event| event.start_time);
}

fn pair_tail_greedy(
    mut calendar: Vec<Event>,
    mut schedule: Vec<Event>,
    now: DateTime<Utc>,
) -> Pairing {
    sort_by_start(&mut calendar);
    sort_by_start(&mut schedule);

    let mut pairs = Vec::new();
    while let (Some(cal), Some(sched)) = (calendar.last(), schedule.last()) {
        if !cal.is_paired_with(sched, now) {
            debug!(calendar = %cal, schedule = %sched, "tail events differ, pairing stops");
            break;
        }
        if let (Some(cal), Some(sched)) = (calendar.pop(), schedule.pop()) {
            pairs.push((cal, sched));
        }
    }

    Pairing {
        pairs,
        unpaired_calendar: calendar,
        unpaired_schedule: schedule,
        retained: Vec::new(),
    }
}

fn pair_keyed(mut calendar: Vec<Event>, mut schedule: Vec<Event>, now: DateTime<Utc>) -> Pairing {
    sort_by_start(&mut calendar);
    sort_by_start(&mut schedule);

    let mut slots: Vec<Option<Event>> = schedule.into_iter().map(Some).collect();
    let mut by_key: HashMap<Vec<String>, VecDeque<usize>> = HashMap::new();
    for (index, event) in slots.iter().enumerate() {
        if let Some(event) = event {
            by_key
                .entry(event.participants_key())
                .or_default()
                .push_back(index);
        }
    }

    let mut pairs = Vec::new();
    let mut unpaired_calendar = Vec::new();
    for cal in calendar {
        let matched = by_key.get_mut(&cal.participants_key()).and_then(|queue| {
            let position = queue.iter().position(|&index| {
                slots[index]
                    .as_ref()
                    .is_some_and(|sched| cal.is_paired_with(sched, now))
            })?;
            queue.remove(position)
        });

        match matched.and_then(|index| slots[index].take()) {
            Some(sched) => pairs.push((cal, sched)),
            None => unpaired_calendar.push(cal),
        }
    }

    Pairing {
        pairs,
        unpaired_calendar,
        unpaired_schedule: slots.into_iter().flatten().collect(),
        retained: Vec::new(),
    }
}

/// Turns a pairing into the actions that make the calendar match the schedule.
pub fn classify(pairing: Pairing) -> Vec<SyncAction> {
    let mut actions = Vec::with_capacity(
        pairing.pairs.len() + pairing.unpaired_calendar.len() + pairing.unpaired_schedule.len(),
    );

    for (calendar, schedule) in pairing.pairs {
        if calendar == schedule {
            actions.push(SyncAction::Unchanged { calendar, schedule });
            continue;
        }
        match calendar.event_id {
            Some(event_id) => actions.push(SyncAction::Update {
                event_id,
                event: schedule,
            }),
            None => warn!("paired calendar event has no id, cannot update {schedule}"),
        }
    }

    for event in pairing.unpaired_schedule {
        actions.push(SyncAction::Create { event });
    }

    for event in pairing.unpaired_calendar {
        match event.event_id.clone() {
            Some(event_id) => actions.push(SyncAction::Delete { event_id, event }),
            None => warn!("unpaired calendar event has no id, cannot delete {event}"),
        }
    }

    actions
}

/// Applies `actions` one at a time. A failed call is logged and counted and
/// never stops the remaining actions. `delete_delay` is slept between deletions.
pub fn apply_actions(
    actions: Vec<SyncAction>,
    backend: &mut dyn CalendarBackend,
    delete_delay: Duration,
) -> SyncReport {
    let mut report = SyncReport::default();
    let mut deletes_done = 0usize;

    for action in actions {
        match action {
            SyncAction::Unchanged { .. } => report.unchanged += 1,
            SyncAction::Update { event_id, event } => {
                info!("Updating {}", event.summary());
                match backend.update_event(&event_id, &event.to_json()) {
                    Ok(_) => report.updated += 1,
                    Err(err) => {
                        error!(id = %event_id, "update failed: {err}");
                        report.failed += 1;
                    }
                }
            }
            SyncAction::Create { event } => {
                info!("Creating event: {}", event.summary());
                match backend.create_event(&event.to_json()) {
                    Ok(_) => report.created += 1,
                    Err(err) => {
                        error!("create failed for {}: {err}", event.summary());
                        report.failed += 1;
                    }
                }
            }
            SyncAction::Delete { event_id, event } => {
                if deletes_done > 0 && !delete_delay.is_zero() {
                    thread::sleep(delete_delay);
                }
                deletes_done += 1;
                match delete_one(backend, &event_id, &event) {
                    Ok(true) => report.deleted += 1,
                    Ok(false) => {}
                    Err(err) => {
                        error!(id = %event_id, "delete failed: {err}");
                        report.failed += 1;
                    }
                }
            }
        }
    }

    report
}

/// Returns `Ok(false)` when the event was already gone.
fn delete_one(
    backend: &mut dyn CalendarBackend,
    event_id: &str,
    event: &Event,
) -> Result<bool, crate::calendar::CalendarError> {
    let summary = match backend.get_event(event_id) {
        Ok(item) => item.summary.unwrap_or_else(|| event.summary()),
        Err(err) if err.is_gone() => {
            info!(id = %event_id, "event already removed: {}", event.summary());
            return Ok(false);
        }
        Err(err) => return Err(err),
    };
    info!("Deleting event: {summary}");
    backend.delete_event(event_id)?;
    Ok(true)
}

/// Pairs with the default options, pushes schedule data onto every paired
/// calendar event that drifted, and returns the deletion and creation
/// candidates `(unpaired_calendar, unpaired_schedule)`.
pub fn reconcile(
    calendar: Vec<Event>,
    schedule: Vec<Event>,
    backend: &mut dyn CalendarBackend,
    now: DateTime<Utc>,
) -> (Vec<Event>, Vec<Event>) {
    let pairing = pair_events(calendar, schedule, &ReconcileOptions::default(), now);
    info!(
        "Searching through {} paired events for potential updates.",
        pairing.pairs.len()
    );

    let updates: Vec<SyncAction> = pairing
        .pairs
        .into_iter()
        .filter(|(calendar, schedule)| calendar != schedule)
        .filter_map(|(calendar, schedule)| {
            calendar.event_id.map(|event_id| SyncAction::Update {
                event_id,
                event: schedule,
            })
        })
        .collect();
    apply_actions(updates, backend, Duration::ZERO);

    (pairing.unpaired_calendar, pairing.unpaired_schedule)
}
