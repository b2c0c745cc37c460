use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::warn;

const APP_DIR: &str = "lm-calendar";

/// `<config dir>/lm-calendar`, or the working directory when the platform has none.
pub fn default_config_root() -> PathBuf {
    dirs::config_dir()
        .map(|base| base.join(APP_DIR))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

pub fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!("failed to create parent {:?}: {err}", parent);
        }
    }
}

/// Removes the formatting artifacts schedule markup carries inside text cells.
pub fn strip_artifacts(input: &str) -> String {
    input
        .chars()
        .filter(|ch| !matches!(ch, '\n' | '\t' | '\r' | '\u{a0}'))
        .collect::<String>()
        .trim()
        .to_string()
}
