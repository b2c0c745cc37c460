use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::reconcile::{PairingStrategy, PastEventPolicy};

#[derive(Debug, Parser)]
#[command(
    name = "lm-calendar",
    version,
    about = "Keeps a Google Calendar in step with a tournament schedule page"
)]
pub struct Cli {
    /// Increase log output (-v info, -vv debug). RUST_LOG overrides this.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Read the schedule from a local HTML file instead of the live page.
    #[arg(short, long, value_name = "FILE")]
    pub local_index: Option<PathBuf>,

    /// Schedule page to scrape for matches.
    #[arg(short, long, value_name = "URL", required_unless_present = "local_index")]
    pub schedule_url: Option<String>,

    /// Part or all of the name of the calendar to manage.
    #[arg(short = 'n', long, value_name = "NAME", default_value = "luigi's mansion")]
    pub calendar_name: String,

    /// Directory holding client.json and token.json.
    #[arg(short, long, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Seconds to wait between calendar deletions.
    #[arg(short, long, value_name = "SECS", default_value_t = 30)]
    pub delay: u64,

    /// Seconds to wait between sync cycles.
    #[arg(short, long, value_name = "SECS", default_value_t = 60)]
    pub interval: u64,

    /// Run a single sync cycle and exit.
    #[arg(long)]
    pub once: bool,

    /// Log the planned calendar changes without applying them.
    #[arg(long)]
    pub dry_run: bool,

    /// How calendar and schedule events are matched.
    #[arg(long, value_enum, default_value_t = PairingStrategy::Keyed)]
    pub pairing: PairingStrategy,

    /// Whether events that already started may be created or deleted.
    #[arg(long, value_enum, default_value_t = PastEventPolicy::Preserve)]
    pub past_events: PastEventPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_usual_run() {
        let cli = Cli::parse_from(["lm-calendar", "-s", "https://example.com/schedule"]);
        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.calendar_name, "luigi's mansion");
        assert_eq!(cli.delay, 30);
        assert_eq!(cli.pairing, PairingStrategy::Keyed);
        assert_eq!(cli.past_events, PastEventPolicy::Preserve);
        assert!(!cli.once);
    }

    #[test]
    fn schedule_source_is_required() {
        assert!(Cli::try_parse_from(["lm-calendar"]).is_err());
        assert!(Cli::try_parse_from(["lm-calendar", "-l", "index.html"]).is_ok());
    }

    #[test]
    fn verbosity_counts_and_strategies_parse() {
        let cli = Cli::parse_from([
            "lm-calendar",
            "-vv",
            "-l",
            "index.html",
            "--pairing",
            "tail-greedy",
            "--past-events",
            "strict",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.pairing, PairingStrategy::TailGreedy);
        assert_eq!(cli.past_events, PastEventPolicy::Strict);
    }
}
