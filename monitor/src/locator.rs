//! Log directory discovery.
//!
//! VRChat writes one `output_log_<timestamp>.txt` per launch into a fixed
//! per-user directory. [`LogLocator`] picks the first existing directory out
//! of an ordered candidate list; [`enumerate_log_files`] lists the log files
//! inside it.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use tracing::{debug, trace};

use crate::types::LogFile;

/// File name prefix of the host application's log files.
pub const LOG_FILE_PREFIX: &str = "output_log_";

/// File name suffix of the host application's log files.
pub const LOG_FILE_SUFFIX: &str = ".txt";

/// VRChat's Steam app id, used to find the Proton prefix on Linux.
const VRCHAT_STEAM_APP_ID: &str = "438100";

/// Finds the log directory among an ordered list of candidates.
#[derive(Debug, Clone, Default)]
pub struct LogLocator {
    candidates: Vec<PathBuf>,
}

impl LogLocator {
    /// Creates a locator over the given candidates, tried in order.
    #[must_use]
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    /// Creates a locator that tries `override_dir` first, then the platform defaults.
    #[must_use]
    pub fn with_override(override_dir: Option<PathBuf>) -> Self {
        let mut candidates: Vec<PathBuf> = override_dir.into_iter().collect();
        candidates.extend(default_candidates());
        Self::new(candidates)
    }

    /// Returns the candidate directories in the order they are tried.
    #[must_use]
    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Returns the first candidate that exists as a directory, or `None`.
    #[must_use]
    pub fn locate(&self) -> Option<PathBuf> {
        let found = self.candidates.iter().find(|dir| dir.is_dir()).cloned();
        match &found {
            Some(dir) => debug!(dir = %dir.display(), "Located log directory"),
            None => debug!(
                candidates = self.candidates.len(),
                "No log directory candidate exists"
            ),
        }
        found
    }
}

/// Platform-specific default locations of the VRChat log directory.
#[must_use]
pub fn default_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(profile) = env::var("USERPROFILE") {
        candidates.push(
            PathBuf::from(profile)
                .join("AppData")
                .join("LocalLow")
                .join("VRChat")
                .join("VRChat"),
        );
    }

    if let Some(base_dirs) = BaseDirs::new() {
        let home = base_dirs.home_dir();
        if cfg!(windows) {
            candidates.push(
                home.join("AppData")
                    .join("LocalLow")
                    .join("VRChat")
                    .join("VRChat"),
            );
        } else {
            for steam_root in [".steam/steam", ".local/share/Steam"] {
                candidates.push(
                    home.join(steam_root)
                        .join("steamapps/compatdata")
                        .join(VRCHAT_STEAM_APP_ID)
                        .join("pfx/drive_c/users/steamuser/AppData/LocalLow/VRChat/VRChat"),
                );
            }
        }
    }

    candidates.dedup();
    candidates
}

/// Returns true if the file name follows the host's log naming convention.
#[must_use]
pub fn is_log_file_name(name: &str) -> bool {
    name.len() > LOG_FILE_PREFIX.len() + LOG_FILE_SUFFIX.len()
        && name.starts_with(LOG_FILE_PREFIX)
        && name.ends_with(LOG_FILE_SUFFIX)
}

/// Lists the log files in `dir` with their modification times.
///
/// Entries whose metadata cannot be read are skipped; they are picked up on a
/// later scan once readable.
///
/// # Errors
///
/// Returns the I/O error if the directory itself cannot be read.
pub fn enumerate_log_files(dir: &Path) -> io::Result<Vec<LogFile>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let is_match = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(is_log_file_name);
        if !is_match {
            continue;
        }

        match entry.metadata() {
            Ok(meta) if meta.is_file() => {
                if let Ok(modified) = meta.modified() {
                    files.push(LogFile::new(path, modified));
                }
            }
            Ok(_) => {}
            Err(e) => {
                trace!(path = %path.display(), error = %e, "Skipping unreadable log file");
            }
        }
    }

    Ok(files)
}
