//! Session state machine driven by classified log events.
//!
//! The machine tracks whether the local player is in a room and translates
//! events into audio [`Effect`]s:
//!
//! | Event | Next state | Effects |
//! |-------|------------|---------|
//! | `LeftRoom` | `OutOfRoom` | mute host, start ambience |
//! | `SceneReady` | `InRoom` | unmute host, stop ambience |
//! | `PlayerJoined` | unchanged | join chime |
//! | `PlayerLeft` | unchanged | leave chime |
//! | `Authenticated` | unchanged | logged-in chime |
//!
//! Before any room event has been seen, opening the first log file applies
//! the `OutOfRoom` effects: a freshly launched client has not loaded a world.
//!
//! Transitions are pure; [`apply`] hands the effects to an [`AudioBackend`].

use tracing::{debug, info};

use crate::audio::{fire, AudioBackend, AudioCall, Clip};
use crate::types::{Event, EventKind, RoomState, SessionState};

/// Host volume while muted.
pub const MUTED_VOLUME: f32 = 0.0;

/// Host volume while unmuted.
pub const FULL_VOLUME: f32 = 1.0;

/// A side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Silence the host application.
    Mute,
    /// Restore the host application's audio.
    Unmute,
    /// Loop the ambience clip from its beginning.
    StartAmbience,
    /// Stop the ambience loop.
    StopAmbience,
    /// Play a one-shot clip.
    Chime(Clip),
}

impl Effect {
    /// The backend call that realises this effect.
    #[must_use]
    pub fn audio_call(self) -> AudioCall {
        match self {
            Self::Mute => AudioCall::SetHostVolume(MUTED_VOLUME),
            Self::Unmute => AudioCall::SetHostVolume(FULL_VOLUME),
            Self::StartAmbience => AudioCall::LoadLoop(Clip::Ambience),
            Self::StopAmbience => AudioCall::StopLoop,
            Self::Chime(clip) => AudioCall::PlayOnce(clip),
        }
    }
}

/// Owns the session state; all mutation goes through [`handle`](Self::handle)
/// and [`on_file_opened`](Self::on_file_opened).
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    room: RoomState,
    state: SessionState,
    room_event_seen: bool,
    file_opened: bool,
}

impl SessionStateMachine {
    /// Creates a machine in the initial state: out of room, unmuted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current room state.
    #[must_use]
    pub fn room(&self) -> RoomState {
        self.room
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Applies an event and returns the effects to perform, in order.
    pub fn handle(&mut self, event: &Event) -> Vec<Effect> {
        let effects = match event.kind {
            EventKind::LeftRoom => {
                self.room_event_seen = true;
                self.enter_out_of_room()
            }
            EventKind::SceneReady => {
                self.room_event_seen = true;
                self.enter_in_room()
            }
            EventKind::PlayerJoined => vec![Effect::Chime(Clip::Join)],
            EventKind::PlayerLeft => vec![Effect::Chime(Clip::Leave)],
            EventKind::Authenticated => vec![Effect::Chime(Clip::LoggedIn)],
            EventKind::Notification | EventKind::Other => Vec::new(),
        };

        debug!(
            kind = %event.kind,
            payload = %event.payload,
            room = ?self.room,
            effects = effects.len(),
            "Session event handled"
        );

        effects
    }

    /// Called whenever the tailer opens a log file.
    ///
    /// Only the first file opened before any room event has been observed
    /// produces effects.
    pub fn on_file_opened(&mut self) -> Vec<Effect> {
        let first = !self.file_opened;
        self.file_opened = true;

        if first && !self.room_event_seen {
            info!("Client not in a room yet, starting ambience");
            self.enter_out_of_room()
        } else {
            Vec::new()
        }
    }

    fn enter_out_of_room(&mut self) -> Vec<Effect> {
        self.room = RoomState::OutOfRoom;
        self.state = SessionState {
            in_room: false,
            volume_muted: true,
        };
        vec![Effect::Mute, Effect::StartAmbience]
    }

    fn enter_in_room(&mut self) -> Vec<Effect> {
        self.room = RoomState::InRoom;
        self.state = SessionState {
            in_room: true,
            volume_muted: false,
        };
        vec![Effect::Unmute, Effect::StopAmbience]
    }
}

/// Performs effects on `backend`. Failures are logged and skipped.
pub fn apply(effects: &[Effect], backend: &dyn AudioBackend) {
    for effect in effects {
        fire(backend, effect.audio_call());
    }
}
