use std::fmt::Display;

use lazy_static::lazy_static;
use regex::Regex;

use crate::Pin;

lazy_static! {
    static ref TOPIC_REGEX: Regex =
        Regex::new(r"^session/([^/]+)(?:/(votes|tracks/added|tracks/reordered|tracks/active))?$")
            .unwrap();
}

/// The kinds of topics a room publishes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// Carries a full room snapshot
    Room,
    /// Carries the full list of votes
    Votes,
    /// Signals that tracks were added to the queue
    TracksAdded,
    /// Signals that the queue was reordered
    TracksReordered,
    /// Signals that the active track changed. Older backends send this instead of `added`.
    TracksActive,
}

/// A broker topic scoped to a single room
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub pin: Pin,
    pub kind: TopicKind,
}

impl TopicKind {
    /// Topics the session subscribes to for every room
    pub const SUBSCRIBED: [TopicKind; 4] = [
        TopicKind::Room,
        TopicKind::Votes,
        TopicKind::TracksAdded,
        TopicKind::TracksReordered,
    ];

    fn suffix(&self) -> Option<&'static str> {
        match self {
            TopicKind::Room => None,
            TopicKind::Votes => Some("votes"),
            TopicKind::TracksAdded => Some("tracks/added"),
            TopicKind::TracksReordered => Some("tracks/reordered"),
            TopicKind::TracksActive => Some("tracks/active"),
        }
    }

    fn from_suffix(suffix: Option<&str>) -> Option<Self> {
        match suffix {
            None => Some(TopicKind::Room),
            Some("votes") => Some(TopicKind::Votes),
            Some("tracks/added") => Some(TopicKind::TracksAdded),
            Some("tracks/reordered") => Some(TopicKind::TracksReordered),
            Some("tracks/active") => Some(TopicKind::TracksActive),
            Some(_) => None,
        }
    }
}

impl Topic {
    pub fn new(pin: &Pin, kind: TopicKind) -> Self {
        Self {
            pin: pin.clone(),
            kind,
        }
    }

    /// Parses a raw topic string, returning [None] if it isn't a room topic
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = TOPIC_REGEX.captures(raw)?;

        let pin = captures.get(1).and_then(|m| Pin::new(m.as_str()))?;
        let kind = TopicKind::from_suffix(captures.get(2).map(|m| m.as_str()))?;

        Some(Self { pin, kind })
    }

    /// Returns the raw topic strings a session for the given pin subscribes to
    pub fn subscriptions_for(pin: &Pin) -> Vec<String> {
        TopicKind::SUBSCRIBED
            .iter()
            .map(|kind| Topic::new(pin, *kind).to_string())
            .collect()
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind.suffix() {
            Some(suffix) => write!(f, "session/{}/{}", self.pin, suffix),
            None => write!(f, "session/{}", self.pin),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Topic, TopicKind};
    use crate::Pin;

    fn pin(value: &str) -> Pin {
        Pin::new(value).unwrap()
    }

    #[test]
    fn test_topic_parsing() {
        assert_eq!(
            Topic::parse("session/ABCD"),
            Some(Topic::new(&pin("ABCD"), TopicKind::Room))
        );
        assert_eq!(
            Topic::parse("session/ABCD/votes"),
            Some(Topic::new(&pin("ABCD"), TopicKind::Votes))
        );
        assert_eq!(
            Topic::parse("session/ABCD/tracks/reordered"),
            Some(Topic::new(&pin("ABCD"), TopicKind::TracksReordered))
        );
        assert_eq!(
            Topic::parse("session/ABCD/tracks/active"),
            Some(Topic::new(&pin("ABCD"), TopicKind::TracksActive))
        );

        assert_eq!(Topic::parse("session/ABCD/unknown"), None);
        assert_eq!(Topic::parse("session/"), None);
        assert_eq!(Topic::parse("other/ABCD"), None);
    }

    #[test]
    fn test_topic_formatting_round_trips() {
        for raw in Topic::subscriptions_for(&pin("XYZ1")) {
            let topic = Topic::parse(&raw).unwrap();

            assert_eq!(topic.pin.as_str(), "XYZ1");
            assert_eq!(topic.to_string(), raw);
        }
    }

    #[test]
    fn test_subscriptions_are_scoped_to_one_pin() {
        let topics = Topic::subscriptions_for(&pin("ABCD"));

        assert_eq!(
            topics,
            vec![
                "session/ABCD",
                "session/ABCD/votes",
                "session/ABCD/tracks/added",
                "session/ABCD/tracks/reordered",
            ]
        );
    }
}
