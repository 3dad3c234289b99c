use std::fmt::Display;

use crossbeam::channel::{unbounded, Receiver, Sender};
use fissa_core::{gateway::GatewayError, Pin, Room, Track, Votes};
use log::warn;

pub type EventSender = Sender<SessionEvent>;
pub type EventReceiver = Receiver<SessionEvent>;

/// Events emitted by a [crate::RoomSession]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The room was fetched and the session is now bound to its pin
    Joined { pin: Pin },
    /// The session left a room, either on request or because a new pin was set
    Left { pin: Pin },
    /// The room snapshot was replaced
    RoomUpdated(Room),
    /// The track list was replaced. Tracks are ordered by their index.
    TracksUpdated(Vec<Track>),
    /// The aggregated votes were replaced
    VotesUpdated(Votes),
    /// Something the user should be told about
    Notification(Notification),
}

/// A user facing message about a failed or refused action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    RoomNotFound { pin: Pin },
    AlreadyPlaying,
    RequestFailed {
        action: Action,
        /// The HTTP status, if the backend answered at all
        status: Option<u16>,
    },
}

/// The user actions that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateRoom,
    Join,
    AddTracks,
    Vote,
    Play,
    Skip,
}

/// The sending and receiving half of the session's event channel
#[derive(Debug, Clone)]
pub struct Events {
    sender: EventSender,
    receiver: EventReceiver,
}

impl Events {
    pub fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.sender.send(event) {
            warn!("Failed to emit session event: {}", e);
        }
    }

    pub fn notify(&self, notification: Notification) {
        self.emit(SessionEvent::Notification(notification))
    }

    pub fn receiver(&self) -> EventReceiver {
        self.receiver.clone()
    }
}

impl Notification {
    pub fn request_failed(action: Action, error: &GatewayError) -> Self {
        Notification::RequestFailed {
            action,
            status: error.status(),
        }
    }
}

impl Default for Events {
    fn default() -> Self {
        let (sender, receiver) = unbounded();

        Self { sender, receiver }
    }
}

impl Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::RoomNotFound { pin } => write!(f, "Session {} not found", pin),
            Notification::AlreadyPlaying => f.write_str("Fissa is already playing"),
            Notification::RequestFailed {
                action,
                status: Some(status),
            } => write!(f, "Could not {} ({})", action, status),
            Notification::RequestFailed {
                action,
                status: None,
            } => write!(f, "Could not {}, check your connection", action),
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let description = match self {
            Action::CreateRoom => "create the session",
            Action::Join => "join the session",
            Action::AddTracks => "add tracks",
            Action::Vote => "cast your vote",
            Action::Play => "start playing",
            Action::Skip => "skip the track",
        };

        f.write_str(description)
    }
}

#[cfg(test)]
mod test {
    use fissa_core::Pin;

    use super::{Action, Events, Notification, SessionEvent};

    #[test]
    fn test_notification_messages() {
        let not_found = Notification::RoomNotFound {
            pin: Pin::new("ABCD").unwrap(),
        };
        let failed = Notification::RequestFailed {
            action: Action::Vote,
            status: Some(500),
        };
        let offline = Notification::RequestFailed {
            action: Action::Play,
            status: None,
        };

        assert_eq!(not_found.to_string(), "Session ABCD not found");
        assert_eq!(failed.to_string(), "Could not cast your vote (500)");
        assert_eq!(
            offline.to_string(),
            "Could not start playing, check your connection"
        );
    }

    #[test]
    fn test_events_are_received_in_order() {
        let events = Events::default();
        let receiver = events.receiver();

        events.notify(Notification::AlreadyPlaying);
        events.emit(SessionEvent::TracksUpdated(vec![]));

        assert_eq!(
            receiver.try_iter().collect::<Vec<_>>(),
            vec![
                SessionEvent::Notification(Notification::AlreadyPlaying),
                SessionEvent::TracksUpdated(vec![])
            ]
        );
    }
}
