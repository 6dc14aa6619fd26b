//! VRCNotif Monitor - VRChat log and notification watcher.
//!
//! This crate follows the VRChat client's log file and its push notification
//! pipeline, and turns what it sees into audio cues.
//!
//! # Overview
//!
//! Two independent pipelines share one [`AudioBackend`]:
//!
//! - **Log pipeline**: [`locator`] finds the log directory, [`tailer`] follows
//!   the newest `output_log_*.txt`, [`classifier`] turns lines into events and
//!   [`session`] decides what to play. Leaving a room mutes the game and loops
//!   an ambience track; loading into a world restores it.
//! - **Notification pipeline**: [`subscriber`] keeps a websocket to the VRChat
//!   pipeline open and chimes on every `notification` message.
//!
//! [`monitor`] runs both as tokio tasks. [`login`], [`auth`] and
//! [`credentials`] obtain and store the session the notification pipeline
//! needs.
//!
//! # Modules
//!
//! - [`types`]: Shared data types
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for monitor operations
//! - [`locator`]: Log directory discovery
//! - [`tailer`]: Polling log tailer with rotation handling
//! - [`classifier`]: Ordered rule table for log lines
//! - [`session`]: Room state machine and audio effects
//! - [`audio`]: Audio backend trait, clips and backends
//! - [`subscriber`]: Notification pipeline websocket client
//! - [`auth`]: VRChat API login with two-factor support
//! - [`credentials`]: Credential and session cookie storage
//! - [`login`]: Session restoration and login flow
//! - [`monitor`]: Pipeline orchestration
//!
//! [`AudioBackend`]: audio::AudioBackend

pub mod audio;
pub mod auth;
pub mod classifier;
pub mod config;
pub mod credentials;
pub mod error;
pub mod locator;
pub mod login;
pub mod monitor;
pub mod session;
pub mod subscriber;
pub mod tailer;
pub mod types;

pub use audio::{AudioBackend, AudioCall, AudioError, Clip, ClipLibrary, RecordingAudio, TracingAudio};
pub use auth::{AuthError, AuthOutcome, AuthProvider, HttpAuthProvider, SecondFactorKind};
pub use classifier::{Classifier, Rule, DEFAULT_RULES};
pub use config::{Config, ConfigError};
pub use credentials::{CredentialError, CredentialStore, Credentials, FileCredentialStore, Session};
pub use error::{MonitorError, Result};
pub use locator::LogLocator;
pub use login::SessionManager;
pub use monitor::{run_log_pipeline, Monitor};
pub use session::{Effect, SessionStateMachine};
pub use subscriber::{
    classify_message, NotificationSubscriber, ReconnectPolicy, SubscriberConfig, SubscriberError,
};
pub use tailer::{LogTailer, TailError, TailEvent, TailerConfig};
pub use types::{Event, EventKind, LinkState, LogFile, LogLine, NotificationLink, RoomState, SessionState};
