//! Shared data types for the monitoring pipelines.
//!
//! Everything here is plain data: log files and the lines read from them,
//! classified events, and the observable state of the session and of the
//! notification link.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A log file written by the host application.
///
/// Identity is the absolute path; two `LogFile`s with the same path refer to
/// the same file even if their timestamps differ.
#[derive(Debug, Clone)]
pub struct LogFile {
    /// Absolute path of the file.
    pub path: PathBuf,

    /// Last modification time at the moment the file was enumerated.
    pub modified: SystemTime,

    /// When the monitor first saw the file.
    pub discovered_at: DateTime<Utc>,
}

impl LogFile {
    /// Creates a log file record discovered now.
    #[must_use]
    pub fn new(path: PathBuf, modified: SystemTime) -> Self {
        Self {
            path,
            modified,
            discovered_at: Utc::now(),
        }
    }
}

impl PartialEq for LogFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for LogFile {}

/// A single complete line read from the current log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Line content without the trailing line terminator.
    pub text: String,

    /// The file the line was read from.
    pub source: PathBuf,
}

impl LogLine {
    /// Creates a new log line.
    #[must_use]
    pub fn new(text: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
        }
    }

    /// Returns the path of the file this line came from.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Canonical kind of a classified event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The client finished loading a world and is presenting it.
    SceneReady,
    /// The client left the current room.
    LeftRoom,
    /// A remote player joined the room.
    PlayerJoined,
    /// A remote player left the room.
    PlayerLeft,
    /// The client's connection was authenticated.
    Authenticated,
    /// A push notification arrived on the pipeline channel.
    Notification,
    /// Any other pipeline message; ignored.
    Other,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SceneReady => "scene_ready",
            Self::LeftRoom => "left_room",
            Self::PlayerJoined => "player_joined",
            Self::PlayerLeft => "player_left",
            Self::Authenticated => "authenticated",
            Self::Notification => "notification",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// A classification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,

    /// Trimmed text captured after the marker, or empty.
    pub payload: String,

    /// The raw line or message the event was classified from.
    pub source_line: String,
}

impl Event {
    /// Creates a new event.
    #[must_use]
    pub fn new(kind: EventKind, payload: impl Into<String>, source_line: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            source_line: source_line.into(),
        }
    }
}

/// Room state tracked by the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomState {
    /// Not in a room: host audio muted, ambience playing.
    #[default]
    OutOfRoom,
    /// Loaded into a world: host audio restored, ambience stopped.
    InRoom,
}

/// Process-wide session state, owned by the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    pub in_room: bool,
    pub volume_muted: bool,
}

/// Connection state of the notification link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Subscribed,
}

/// Observable view of the notification link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotificationLink {
    /// Current connection state.
    pub state: LinkState,

    /// Number of reconnect attempts made since the last successful subscribe.
    pub retry_count: u32,
}

impl NotificationLink {
    /// Returns true while the link is subscribed.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.state == LinkState::Subscribed
    }
}
