pub mod base;
pub mod speedgaming_html;

use crate::config::ScheduleLocation;
use crate::models::Event;

/// A page listing upcoming matches.
pub trait ScheduleSource {
    /// Human readable origin, used in logs.
    fn origin(&self) -> String;
    fn fetch(&self) -> anyhow::Result<Vec<Event>>;
}

pub fn source_for(location: &ScheduleLocation) -> Box<dyn ScheduleSource> {
    Box::new(speedgaming_html::SpeedGaming::new(location.clone()))
}
