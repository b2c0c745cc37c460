mod calendar;
mod cli;
mod config;
mod models;
mod oauth;
mod reconcile;
pub mod scraping;
mod utils;

use std::thread;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use calendar::{fetch_calendar_events, GoogleCalendar};
use cli::Cli;
use config::SyncConfig;
use oauth::{OAuthSession, CALENDAR_SCOPE};
use reconcile::{apply_actions, classify, pair_events, ReconcileOptions, SyncAction, SyncReport};
use scraping::ScheduleSource;

pub use calendar::{CalendarBackend, CalendarError};
pub use config::ScheduleLocation;
pub use models::Event;
pub use reconcile::reconcile;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// One pass: scrape, read the calendar, pair, then apply (or log) the plan.
fn sync_cycle(
    source: &dyn ScheduleSource,
    backend: &mut dyn CalendarBackend,
    config: &SyncConfig,
) -> Result<SyncReport> {
    let schedule = source
        .fetch()
        .with_context(|| format!("fetching schedule from {}", source.origin()))?;
    info!("Found {} events on the schedule", schedule.len());

    let calendar = fetch_calendar_events(backend).context("reading calendar events")?;
    info!("Found {} events on the calendar", calendar.len());

    let options = ReconcileOptions {
        strategy: config.pairing,
        past_events: config.past_events,
    };
    let pairing = pair_events(calendar, schedule, &options, Utc::now());
    let retained = pairing.retained.len();
    let actions = classify(pairing);

    let mut report = if config.dry_run {
        plan_only(&actions)
    } else {
        apply_actions(actions, backend, config.delete_delay)
    };
    report.retained = retained;
    Ok(report)
}

fn plan_only(actions: &[SyncAction]) -> SyncReport {
    let mut report = SyncReport::default();
    for action in actions {
        match action {
            SyncAction::Unchanged { .. } => report.unchanged += 1,
            SyncAction::Update { event_id, event } => {
                info!("[dry run] would update {event_id}: {event}");
                report.updated += 1;
            }
            SyncAction::Create { event } => {
                info!("[dry run] would create {event}");
                report.created += 1;
            }
            SyncAction::Delete { event_id, event } => {
                info!("[dry run] would delete {event_id}: {event}");
                report.deleted += 1;
            }
        }
    }
    report
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = SyncConfig::from_cli(&cli)?;
    info!("using configuration in {}", config.config_dir.display());

    let session = OAuthSession::load_or_authorize(
        &config.client_secrets_path(),
        &config.token_path(),
        &[CALENDAR_SCOPE],
    )
    .context("authorizing with Google")?;

    let mut calendar = GoogleCalendar::new(Box::new(session), "primary")?;
    calendar
        .select_calendar(&config.calendar_name)
        .with_context(|| format!("looking up calendar {:?}", config.calendar_name))?;
    info!("syncing into calendar {}", calendar.calendar_id());

    let source = scraping::source_for(&config.schedule);
    loop {
        match sync_cycle(source.as_ref(), &mut calendar, &config) {
            Ok(report) => info!("sync finished ({report})"),
            Err(err) if config.run_once => return Err(err),
            Err(err) => error!("sync failed: {err:#}"),
        }
        if config.run_once {
            return Ok(());
        }
        if config.interval.is_zero() {
            warn!("interval is zero, looping without pause");
        }
        thread::sleep(config.interval);
    }
}
