//! VRChat log line classifier.
//!
//! Each log line is matched against an ordered rule table. The first rule
//! whose marker occurs in the line, and whose exclusion does not apply, wins;
//! a line therefore yields at most one [`Event`].
//!
//! # Rule Table
//!
//! | Order | Kind | Marker | Payload | Exclusion |
//! |-------|------|--------|---------|-----------|
//! | 1 | `SceneReady` | `Lifting black fade` | - | - |
//! | 2 | `LeftRoom` | `OnLeftRoom` | - | - |
//! | 3 | `PlayerJoined` | `OnPlayerJoined` | player name | - |
//! | 4 | `PlayerLeft` | `OnPlayerLeft` | player name | remainder starts with `R` |
//! | 5 | `Authenticated` | `Authenticated` | detail text | - |
//!
//! The `PlayerLeft` exclusion rejects `OnPlayerLeftRoom`, which the client
//! logs when the local player leaves a room.
//!
//! # Example
//!
//! ```
//! use vrcnotif_monitor::classifier::Classifier;
//! use vrcnotif_monitor::types::EventKind;
//!
//! let classifier = Classifier::default();
//! let event = classifier
//!     .classify("2024.01.01 12:00:00 Log - [Behaviour] OnPlayerJoined Alice")
//!     .unwrap();
//! assert_eq!(event.kind, EventKind::PlayerJoined);
//! assert_eq!(event.payload, "Alice");
//! ```

use crate::types::{Event, EventKind};

/// Predicate over the untrimmed text that follows a marker.
pub type Exclusion = fn(&str) -> bool;

/// One entry of the classification table.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    /// Kind produced when the rule matches.
    pub kind: EventKind,

    /// Literal text that must occur in the line.
    pub marker: &'static str,

    /// Rejects a match based on the text following the marker.
    pub exclusion: Option<Exclusion>,
}

impl Rule {
    /// Creates a rule without an exclusion.
    #[must_use]
    pub const fn new(kind: EventKind, marker: &'static str) -> Self {
        Self {
            kind,
            marker,
            exclusion: None,
        }
    }

    /// Creates a rule that is rejected when `exclusion` holds for the remainder.
    #[must_use]
    pub const fn excluding(kind: EventKind, marker: &'static str, exclusion: Exclusion) -> Self {
        Self {
            kind,
            marker,
            exclusion: Some(exclusion),
        }
    }

    /// Returns the untrimmed remainder after the marker if the rule matches.
    #[must_use]
    pub fn apply<'a>(&self, line: &'a str) -> Option<&'a str> {
        let start = line.find(self.marker)?;
        let remainder = &line[start + self.marker.len()..];
        match self.exclusion {
            Some(excluded) if excluded(remainder) => None,
            _ => Some(remainder),
        }
    }
}

/// `OnPlayerLeftRoom` is a room-level departure, not a remote player leaving.
fn is_room_departure(remainder: &str) -> bool {
    remainder.starts_with('R')
}

/// The default rule table, in priority order.
pub const DEFAULT_RULES: [Rule; 5] = [
    Rule::new(EventKind::SceneReady, "Lifting black fade"),
    Rule::new(EventKind::LeftRoom, "OnLeftRoom"),
    Rule::new(EventKind::PlayerJoined, "OnPlayerJoined"),
    Rule::excluding(EventKind::PlayerLeft, "OnPlayerLeft", is_room_departure),
    Rule::new(EventKind::Authenticated, "Authenticated"),
];

/// Classifies log lines with an ordered rule table.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::with_rules(DEFAULT_RULES.to_vec())
    }
}

impl Classifier {
    /// Creates a classifier over `rules`, evaluated in order.
    #[must_use]
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Returns the rule table in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Classifies a line, returning the event of the first matching rule.
    #[must_use]
    pub fn classify(&self, line: &str) -> Option<Event> {
        self.rules.iter().find_map(|rule| {
            rule.apply(line)
                .map(|remainder| Event::new(rule.kind, remainder.trim(), line))
        })
    }
}
