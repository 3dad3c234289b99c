use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Characters that would let a pin reach into the topics of other pins
const TOPIC_RESERVED: [char; 3] = ['/', '+', '#'];

/// The short code identifying a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pin(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("\"{0}\" is not a valid pin")]
pub struct InvalidPin(pub String);

impl Pin {
    /// Creates a pin, returning [None] if the value is blank or contains
    /// topic separators or wildcards.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value: String = value.into();
        let trimmed = value.trim();

        if trimmed.is_empty() || trimmed.contains(TOPIC_RESERVED) {
            return None;
        }

        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Pin {
    type Error = InvalidPin;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Pin::new(value.as_str()).ok_or(InvalidPin(value))
    }
}

impl From<Pin> for String {
    fn from(pin: Pin) -> Self {
        pin.0
    }
}

impl Display for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A room as owned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub pin: Pin,
    #[serde(default)]
    pub playlist_id: Option<String>,
    /// Index into the track list of the track that is currently playing
    #[serde(default)]
    pub current_index: i64,
}

/// A track in the queue of a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    /// Artwork url, if any
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    /// Position of the track in the queue
    pub index: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteState {
    Up,
    Down,
}

impl VoteState {
    /// The contribution of this vote to a track's score
    pub fn weight(&self) -> i64 {
        match self {
            VoteState::Up => 1,
            VoteState::Down => -1,
        }
    }
}

/// A single user's vote on a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub track_id: String,
    /// The id of the user that cast the vote
    pub created_by: String,
    pub state: VoteState,
}

/// The identity and provider tokens of the local user.
///
/// Tokens are obtained and refreshed elsewhere, this crate only passes them along.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}
