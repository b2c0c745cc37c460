use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::cli::Cli;
use crate::reconcile::{PairingStrategy, PastEventPolicy};
use crate::utils;

pub const CLIENT_SECRETS_FILE: &str = "client.json";
pub const TOKEN_FILE: &str = "token.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("either a schedule url or a local index file is required")]
    MissingSchedule,
}

/// Where the schedule comes from on each cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleLocation {
    Url(String),
    LocalIndex(PathBuf),
}

/// Everything a sync run needs, resolved from the command line.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub schedule: ScheduleLocation,
    pub calendar_name: String,
    pub config_dir: PathBuf,
    pub delete_delay: Duration,
    pub interval: Duration,
    pub run_once: bool,
    pub dry_run: bool,
    pub pairing: PairingStrategy,
    pub past_events: PastEventPolicy,
}

impl SyncConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let schedule = match (&cli.local_index, &cli.schedule_url) {
            (Some(path), _) => ScheduleLocation::LocalIndex(path.clone()),
            (None, Some(url)) => ScheduleLocation::Url(url.clone()),
            (None, None) => return Err(ConfigError::MissingSchedule),
        };

        Ok(Self {
            schedule,
            calendar_name: cli.calendar_name.clone(),
            config_dir: cli
                .config_dir
                .clone()
                .unwrap_or_else(utils::default_config_root),
            delete_delay: Duration::from_secs(cli.delay),
            interval: Duration::from_secs(cli.interval),
            run_once: cli.once,
            dry_run: cli.dry_run,
            pairing: cli.pairing,
            past_events: cli.past_events,
        })
    }

    pub fn client_secrets_path(&self) -> PathBuf {
        self.config_dir.join(CLIENT_SECRETS_FILE)
    }

    pub fn token_path(&self) -> PathBuf {
        self.config_dir.join(TOKEN_FILE)
    }
}

/// Reads a JSON document, returning `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    utils::ensure_parent(path);
    let contents = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, contents).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let value: Option<Sample> = read_json(&dir.path().join("absent.json")).expect("read");
        assert!(value.is_none());
    }

    #[test]
    fn json_written_can_be_read_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sub").join("sample.json");
        let sample = Sample {
            name: "token".into(),
            count: 3,
        };
        write_json(&path, &sample).expect("write");
        assert_eq!(read_json::<Sample>(&path).expect("read"), Some(sample));
    }

    #[test]
    fn corrupt_json_is_reported_with_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write");
        let err = read_json::<Sample>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Json { path: ref p, .. } if p == &path));
    }

    #[test]
    fn local_index_wins_over_url() {
        let cli = Cli::parse_from([
            "lm-calendar",
            "--schedule-url",
            "https://example.com/schedule",
            "--local-index",
            "index.html",
            "--config-dir",
            "/tmp/lm",
            "--once",
        ]);
        let config = SyncConfig::from_cli(&cli).expect("config");
        assert_eq!(
            config.schedule,
            ScheduleLocation::LocalIndex(PathBuf::from("index.html"))
        );
        assert_eq!(config.token_path(), PathBuf::from("/tmp/lm/token.json"));
        assert_eq!(config.client_secrets_path(), PathBuf::from("/tmp/lm/client.json"));
        assert!(config.run_once);
        assert_eq!(config.delete_delay, Duration::from_secs(30));
    }
}
