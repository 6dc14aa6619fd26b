//! Configuration module for VRCNotif Monitor.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `VRCNOTIF_LOG_DIR` | No | platform default | VRChat log directory, tried before the platform candidates |
//! | `VRCNOTIF_AUDIO_DIR` | No | `./Audio` | Directory containing the `.wav` clips |
//! | `VRCNOTIF_DATA_DIR` | No | platform data dir | Where credentials and the session token are stored |
//! | `VRCNOTIF_API_URL` | No | `https://api.vrchat.cloud/api/1` | REST API base URL |
//! | `VRCNOTIF_PIPELINE_URL` | No | `wss://pipeline.vrchat.cloud/` | Push notification endpoint |
//! | `VRCNOTIF_USER_AGENT` | No | `VRCNotif/<version>` | User-Agent sent to the API and pipeline |
//! | `VRCNOTIF_SCAN_INTERVAL_MS` | No | 250 | Log directory scan and tail poll period |
//! | `VRCNOTIF_MAX_EMPTY_SCANS` | No | 10 | Empty scans before log discovery gives up |
//! | `VRCNOTIF_RECONNECT_SECS` | No | 5 | Fixed delay before reconnecting the pipeline |
//!
//! # Example
//!
//! ```no_run
//! use vrcnotif_monitor::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Audio clips: {}", config.audio_dir.display());
//! ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use thiserror::Error;

/// Default directory holding the audio clips, relative to the working directory.
const DEFAULT_AUDIO_DIR: &str = "Audio";

/// Default VRChat REST API base URL.
pub const DEFAULT_API_URL: &str = "https://api.vrchat.cloud/api/1";

/// Default VRChat pipeline (push notification) endpoint.
pub const DEFAULT_PIPELINE_URL: &str = "wss://pipeline.vrchat.cloud/";

/// Default scan interval for the log directory and the tail poll, in milliseconds.
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 250;

/// Default number of consecutive empty scans before log discovery stops.
pub const DEFAULT_MAX_EMPTY_SCANS: u32 = 10;

/// Default fixed reconnect backoff for the pipeline, in seconds.
pub const DEFAULT_RECONNECT_SECS: u64 = 5;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Configuration for the VRCNotif Monitor.
#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit log directory, tried before the platform candidates.
    pub log_dir: Option<PathBuf>,

    /// Directory containing the audio clips.
    pub audio_dir: PathBuf,

    /// Directory for stored credentials and the session token.
    pub data_dir: PathBuf,

    /// REST API base URL used for authentication.
    pub api_url: String,

    /// Push notification endpoint.
    pub pipeline_url: String,

    /// User-Agent header for API and pipeline requests.
    pub user_agent: String,

    /// Log directory scan period, also the idle wait while tailing.
    pub scan_interval: Duration,

    /// Consecutive empty scans before log discovery gives up.
    pub max_empty_scans: u32,

    /// Fixed delay between pipeline reconnect attempts.
    pub reconnect_backoff: Duration,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - A numeric variable is set but is not a positive integer
    /// - `VRCNOTIF_DATA_DIR` is unset and no platform data directory exists
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_dir = env::var("VRCNOTIF_LOG_DIR").ok().map(PathBuf::from);

        let audio_dir = env::var("VRCNOTIF_AUDIO_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_AUDIO_DIR));

        let data_dir = match env::var("VRCNOTIF_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => ProjectDirs::from("", "", "vrcnotif")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .ok_or(ConfigError::NoHomeDirectory)?,
        };

        let api_url = env::var("VRCNOTIF_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let pipeline_url =
            env::var("VRCNOTIF_PIPELINE_URL").unwrap_or_else(|_| DEFAULT_PIPELINE_URL.to_string());
        let user_agent = env::var("VRCNOTIF_USER_AGENT")
            .unwrap_or_else(|_| format!("VRCNotif/{}", env!("CARGO_PKG_VERSION")));

        let scan_interval = Duration::from_millis(parse_positive(
            "VRCNOTIF_SCAN_INTERVAL_MS",
            DEFAULT_SCAN_INTERVAL_MS,
        )?);
        let max_empty_scans = parse_positive("VRCNOTIF_MAX_EMPTY_SCANS", DEFAULT_MAX_EMPTY_SCANS)?;
        let reconnect_backoff = Duration::from_secs(parse_positive(
            "VRCNOTIF_RECONNECT_SECS",
            DEFAULT_RECONNECT_SECS,
        )?);

        Ok(Self {
            log_dir,
            audio_dir,
            data_dir,
            api_url,
            pipeline_url,
            user_agent,
            scan_interval,
            max_empty_scans,
            reconnect_backoff,
        })
    }
}

/// Reads an optional positive integer variable, falling back to `default` when unset.
fn parse_positive<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let Ok(val) = env::var(key) else {
        return Ok(default);
    };

    let parsed = val.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected positive integer, got '{val}'"),
    })?;

    if parsed == T::default() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value must be greater than 0".to_string(),
        });
    }

    Ok(parsed)
}
