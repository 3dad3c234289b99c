//! The room session store.
//!
//! A [RoomSession] is bound to at most one pin at a time. It owns the room, track and
//! vote snapshot of that pin and keeps it current by merging REST responses with
//! broker messages. Every join gets a fresh [SessionId], and anything that completes
//! after its session was left or replaced is discarded.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use fissa_core::{
    aggregate,
    broker::{Broker, Cancellation, Message, MessageHandle},
    gateway::{Api, ErrorKind, GatewayError, NewRoom, NewTracks, NewVote},
    Credentials, Id, InvalidPin, Pin, Room, Topic, TopicKind, Track, Vote, VoteState, Votes,
};
use futures_util::future::{join, join3};
use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{Action, EventReceiver, Events, Notification, SessionEvent};

pub type SessionId = Id<RoomSession>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {0} does not exist")]
    RoomNotFound(Pin),
    #[error(transparent)]
    InvalidPin(#[from] InvalidPin),
    #[error("Not in a session")]
    NotJoined,
    #[error("Joining {0} was superseded by another join or leave")]
    Superseded(Pin),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// The room is being fetched
    Joining,
    Joined,
}

/// The services a session works with
#[derive(Clone)]
pub struct SessionContext {
    pub api: Api,
    pub broker: Arc<Broker>,
    pub credentials: Credentials,
}

/// Tracks the state of the room the user is in.
pub struct RoomSession {
    me: Weak<Self>,
    context: SessionContext,
    events: Events,
    state: Mutex<SessionState>,
}

#[derive(Default)]
struct SessionState {
    binding: Binding,
    room: Option<Room>,
    tracks: Vec<Track>,
    votes: Votes,
    /// Unsubscriptions of pins that were left and may still be retrying
    unsubscribing: HashMap<Pin, Cancellation>,
}

#[derive(Default)]
enum Binding {
    #[default]
    Idle,
    Joining {
        id: SessionId,
        pin: Pin,
    },
    Joined {
        id: SessionId,
        pin: Pin,
        link: BrokerLink,
    },
}

/// Attachment of a joined session to the broker
struct BrokerLink {
    /// Detaches the message handler when dropped
    _handle: MessageHandle,
    subscription: Cancellation,
}

impl Binding {
    fn id(&self) -> Option<SessionId> {
        match self {
            Binding::Idle => None,
            Binding::Joining { id, .. } | Binding::Joined { id, .. } => Some(*id),
        }
    }

    fn joined_id(&self) -> Option<SessionId> {
        match self {
            Binding::Joined { id, .. } => Some(*id),
            _ => None,
        }
    }

    fn pin(&self) -> Option<&Pin> {
        match self {
            Binding::Idle => None,
            Binding::Joining { pin, .. } | Binding::Joined { pin, .. } => Some(pin),
        }
    }

    fn phase(&self) -> Phase {
        match self {
            Binding::Idle => Phase::Idle,
            Binding::Joining { .. } => Phase::Joining,
            Binding::Joined { .. } => Phase::Joined,
        }
    }
}

impl RoomSession {
    pub fn new(context: SessionContext) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            context,
            events: Default::default(),
            state: Default::default(),
        })
    }

    /// Returns a receiver for the events of this session.
    /// Every event is delivered to exactly one receiver.
    pub fn events(&self) -> EventReceiver {
        self.events.receiver()
    }

    /// Joins the room with the given pin, or leaves the current one if the pin is blank
    pub async fn set_pin(&self, pin: &str) -> Result<(), SessionError> {
        if pin.trim().is_empty() {
            self.leave();
            return Ok(());
        }

        let pin = Pin::try_from(pin.to_string())?;
        self.join(pin).await
    }

    /// Leaves the current room and joins another.
    ///
    /// The room is fetched first. If it exists the session subscribes to its topics
    /// and fetches tracks and votes, otherwise the user is notified once and the
    /// session stays idle.
    pub async fn join(&self, pin: Pin) -> Result<(), SessionError> {
        let id = SessionId::new();

        self.leave();

        {
            let mut state = self.state.lock();

            if let Some(unsubscription) = state.unsubscribing.remove(&pin) {
                unsubscription.cancel();
            }

            state.binding = Binding::Joining {
                id,
                pin: pin.clone(),
            };
        }

        info!("Joining session {}", pin);

        let room = match self.context.api.room(&pin).await {
            Ok(room) => room,
            Err(e) => return Err(self.fail_join(id, &pin, e)),
        };

        let Some(subscription) = self.bind(id, &pin, room.clone()) else {
            debug!("Discarding room {}, the join was superseded", pin);
            return Err(SessionError::Superseded(pin));
        };

        self.events.emit(SessionEvent::Joined { pin: pin.clone() });
        self.events.emit(SessionEvent::RoomUpdated(room));
        self.subscribe(&pin, subscription);

        let (tracks, votes) = join(self.refresh_tracks(id), self.refresh_votes(id)).await;

        if let Err(e) = tracks.and(votes) {
            if self.state.lock().binding.joined_id() == Some(id) {
                warn!("Failed to fetch the queue of {}: {}", pin, e);
                self.events
                    .notify(Notification::request_failed(Action::Join, &e));
            }
        }

        Ok(())
    }

    /// Leaves the current room. Does nothing if the session is idle.
    pub fn leave(&self) {
        let binding = {
            let mut state = self.state.lock();

            state.room = None;
            state.tracks.clear();
            state.votes = Votes::default();

            std::mem::take(&mut state.binding)
        };

        match binding {
            Binding::Idle => {}
            Binding::Joining { pin, .. } => debug!("Stopped joining {}", pin),
            Binding::Joined { pin, link, .. } => {
                link.subscription.cancel();
                drop(link);

                self.unsubscribe(&pin);

                info!("Left session {}", pin);
                self.events.emit(SessionEvent::Left { pin });
            }
        }
    }

    /// Fetches room, tracks and votes again to heal missed broker messages.
    /// Failures are only logged.
    pub async fn resync(&self) {
        let Some((id, pin)) = self.joined() else {
            debug!("Not in a session, nothing to resync");
            return;
        };

        debug!("Resyncing session {}", pin);

        let (room, tracks, votes) = join3(
            self.refresh_room(id),
            self.refresh_tracks(id),
            self.refresh_votes(id),
        )
        .await;

        for error in [room.err(), tracks.err(), votes.err()].into_iter().flatten() {
            debug!("Resync of {} failed: {}", pin, error);
        }
    }

    /// Creates a room for the user and joins it
    pub async fn create_room(&self, playlist_id: Option<String>) -> Result<Pin, SessionError> {
        let credentials = &self.context.credentials;
        let new_room = NewRoom {
            access_token: credentials.access_token.clone(),
            playlist_id,
            refresh_token: credentials.refresh_token.clone(),
        };

        let pin = match self.context.api.create_room(&new_room).await {
            Ok(pin) => pin,
            Err(e) => {
                warn!("Failed to create a session: {}", e);
                self.events
                    .notify(Notification::request_failed(Action::CreateRoom, &e));
                return Err(e.into());
            }
        };

        info!("Created session {}", pin);
        self.join(pin.clone()).await?;

        Ok(pin)
    }

    /// Adds tracks to the queue without waiting for the backend.
    /// The track list is refetched once the backend announces the change.
    pub fn add_tracks(&self, track_ids: Vec<String>) -> Result<JoinHandle<()>, SessionError> {
        let new_tracks = NewTracks {
            track_ids,
            pin: self.require_pin()?,
            created_by: self.context.credentials.user_id.clone(),
        };

        let api = self.context.api.clone();
        let events = self.events.clone();

        Ok(tokio::spawn(async move {
            if let Err(e) = api.add_tracks(&new_tracks).await {
                warn!("Failed to add {} tracks: {}", new_tracks.track_ids.len(), e);
                events.notify(Notification::request_failed(Action::AddTracks, &e));
            }
        }))
    }

    /// Votes on a track without waiting for the backend.
    /// Votes are replaced once the backend publishes them.
    pub fn cast_vote(
        &self,
        track_id: impl Into<String>,
        state: VoteState,
    ) -> Result<JoinHandle<()>, SessionError> {
        let new_vote = NewVote {
            state,
            pin: self.require_pin()?,
            track_id: track_id.into(),
            created_by: self.context.credentials.user_id.clone(),
        };

        let api = self.context.api.clone();
        let events = self.events.clone();

        Ok(tokio::spawn(async move {
            if let Err(e) = api.cast_vote(&new_vote).await {
                warn!("Failed to vote on {}: {}", new_vote.track_id, e);
                events.notify(Notification::request_failed(Action::Vote, &e));
            }
        }))
    }

    /// Starts playback in the current room
    pub async fn play(&self) -> Result<(), SessionError> {
        let pin = self.require_pin()?;

        match self.context.api.play(&pin).await {
            Ok(()) => {
                info!("Started playing {}", pin);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::Conflict => {
                self.events.notify(Notification::AlreadyPlaying);
                Err(e.into())
            }
            Err(e) => {
                warn!("Failed to start playing {}: {}", pin, e);
                self.events
                    .notify(Notification::request_failed(Action::Play, &e));
                Err(e.into())
            }
        }
    }

    /// Skips the current track
    pub async fn skip(&self) -> Result<(), SessionError> {
        let pin = self.require_pin()?;

        if let Err(e) = self
            .context
            .api
            .skip(&pin, &self.context.credentials.user_id)
            .await
        {
            warn!("Failed to skip in {}: {}", pin, e);
            self.events
                .notify(Notification::request_failed(Action::Skip, &e));
            return Err(e.into());
        }

        Ok(())
    }

    /// The pin the session is joining or joined to
    pub fn pin(&self) -> Option<Pin> {
        self.state.lock().binding.pin().cloned()
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().binding.phase()
    }

    pub fn room(&self) -> Option<Room> {
        self.state.lock().room.clone()
    }

    /// The queue, ordered by track index
    pub fn tracks(&self) -> Vec<Track> {
        self.state.lock().tracks.clone()
    }

    pub fn votes(&self) -> Votes {
        self.state.lock().votes.clone()
    }

    /// The track at the room's current index
    pub fn current_track(&self) -> Option<Track> {
        let state = self.state.lock();
        let room = state.room.as_ref()?;

        state
            .tracks
            .iter()
            .find(|t| t.index == room.current_index)
            .cloned()
    }

    pub fn score(&self, track_id: &str) -> i64 {
        self.state.lock().votes.score(track_id)
    }

    /// The local user's vote on a track
    pub fn my_vote(&self, track_id: &str) -> Option<VoteState> {
        self.state
            .lock()
            .votes
            .by_user(track_id, &self.context.credentials.user_id)
            .map(|v| v.state)
    }

    fn require_pin(&self) -> Result<Pin, SessionError> {
        self.joined()
            .map(|(_, pin)| pin)
            .ok_or(SessionError::NotJoined)
    }

    fn joined(&self) -> Option<(SessionId, Pin)> {
        match &self.state.lock().binding {
            Binding::Joined { id, pin, .. } => Some((*id, pin.clone())),
            _ => None,
        }
    }

    fn joined_pin(&self, id: SessionId) -> Option<Pin> {
        self.joined()
            .filter(|(current, _)| *current == id)
            .map(|(_, pin)| pin)
    }

    /// Locks the state if `id` is still the joined session
    fn current(&self, id: SessionId) -> Option<MutexGuard<'_, SessionState>> {
        let state = self.state.lock();
        (state.binding.joined_id() == Some(id)).then_some(state)
    }

    /// Moves a joining session to joined, unless it was superseded in the meantime
    fn bind(&self, id: SessionId, pin: &Pin, room: Room) -> Option<Cancellation> {
        let handle = self.attach(id);
        let subscription = Cancellation::new();

        let mut state = self.state.lock();

        if state.binding.id() != Some(id) {
            return None;
        }

        state.binding = Binding::Joined {
            id,
            pin: pin.clone(),
            link: BrokerLink {
                _handle: handle,
                subscription: subscription.clone(),
            },
        };
        state.room = Some(room);

        Some(subscription)
    }

    fn fail_join(&self, id: SessionId, pin: &Pin, error: GatewayError) -> SessionError {
        {
            let mut state = self.state.lock();

            if state.binding.id() != Some(id) {
                debug!("Ignoring failed join of {}: {}", pin, error);
                return SessionError::Superseded(pin.clone());
            }

            state.binding = Binding::Idle;
        }

        if error.kind() == ErrorKind::NotFound {
            info!("Session {} does not exist", pin);
            self.events
                .notify(Notification::RoomNotFound { pin: pin.clone() });

            SessionError::RoomNotFound(pin.clone())
        } else {
            warn!("Failed to join {}: {}", pin, error);
            self.events
                .notify(Notification::request_failed(Action::Join, &error));

            SessionError::Gateway(error)
        }
    }

    fn attach(&self, id: SessionId) -> MessageHandle {
        let session = self.me.clone();

        self.context.broker.on_message(move |message| {
            if let Some(session) = session.upgrade() {
                session.handle_message(id, message)
            }
        })
    }

    fn subscribe(&self, pin: &Pin, cancellation: Cancellation) {
        let broker = self.context.broker.clone();
        let topics = Topic::subscriptions_for(pin);

        tokio::spawn(async move {
            broker.subscribe_topics(&topics, &cancellation).await;
        });
    }

    fn unsubscribe(&self, pin: &Pin) {
        let cancellation = Cancellation::new();

        let previous = self
            .state
            .lock()
            .unsubscribing
            .insert(pin.clone(), cancellation.clone());

        if let Some(previous) = previous {
            previous.cancel();
        }

        let session = self.me.clone();
        let broker = self.context.broker.clone();
        let topics = Topic::subscriptions_for(pin);
        let pin = pin.clone();

        tokio::spawn(async move {
            broker.unsubscribe_topics(&topics, &cancellation).await;

            let Some(session) = session.upgrade() else {
                return;
            };

            // A later leave of the same pin may have replaced the entry
            let mut state = session.state.lock();
            if state
                .unsubscribing
                .get(&pin)
                .is_some_and(|c| c.is_same(&cancellation))
            {
                state.unsubscribing.remove(&pin);
            }
        });
    }

    fn handle_message(self: &Arc<Self>, id: SessionId, message: &Message) {
        let Some(topic) = Topic::parse(&message.topic) else {
            debug!("Ignoring message on {}", message.topic);
            return;
        };

        if self.joined_pin(id).as_ref() != Some(&topic.pin) {
            debug!("Ignoring message for another session on {}", message.topic);
            return;
        }

        match topic.kind {
            TopicKind::Room => match message.decode::<Room>() {
                Ok(room) if room.pin == topic.pin => self.apply_room(id, room),
                Ok(room) => warn!("Dropping room {} published on {}", room.pin, message.topic),
                Err(e) => warn!("Dropping malformed room on {}: {}", message.topic, e),
            },
            TopicKind::Votes => match message.decode::<Vec<Vote>>() {
                Ok(votes) => self.apply_votes(id, votes),
                Err(e) => warn!("Dropping malformed votes on {}: {}", message.topic, e),
            },
            TopicKind::TracksAdded | TopicKind::TracksReordered | TopicKind::TracksActive => {
                let session = self.clone();

                tokio::spawn(async move {
                    if let Err(e) = session.refresh_tracks(id).await {
                        debug!("Failed to refetch tracks: {}", e);
                    }
                });
            }
        }
    }

    async fn refresh_room(&self, id: SessionId) -> Result<(), GatewayError> {
        let Some(pin) = self.joined_pin(id) else {
            return Ok(());
        };

        let room = self.context.api.room(&pin).await?;
        self.apply_room(id, room);

        Ok(())
    }

    async fn refresh_tracks(&self, id: SessionId) -> Result<(), GatewayError> {
        let Some(pin) = self.joined_pin(id) else {
            return Ok(());
        };

        let tracks = self.context.api.tracks(&pin).await?;
        self.apply_tracks(id, tracks);

        Ok(())
    }

    async fn refresh_votes(&self, id: SessionId) -> Result<(), GatewayError> {
        let Some(pin) = self.joined_pin(id) else {
            return Ok(());
        };

        let votes = self.context.api.votes(&pin).await?;
        self.apply_votes(id, votes);

        Ok(())
    }

    fn apply_room(&self, id: SessionId, room: Room) {
        let Some(mut state) = self.current(id) else {
            debug!("Discarding room of a superseded session");
            return;
        };

        state.room = Some(room.clone());
        self.events.emit(SessionEvent::RoomUpdated(room));
    }

    fn apply_tracks(&self, id: SessionId, mut tracks: Vec<Track>) {
        tracks.sort_by_key(|t| t.index);

        let Some(mut state) = self.current(id) else {
            debug!("Discarding tracks of a superseded session");
            return;
        };

        state.tracks = tracks.clone();
        self.events.emit(SessionEvent::TracksUpdated(tracks));
    }

    fn apply_votes(&self, id: SessionId, votes: Vec<Vote>) {
        let votes = aggregate(votes);

        let Some(mut state) = self.current(id) else {
            debug!("Discarding votes of a superseded session");
            return;
        };

        state.votes = votes.clone();
        self.events.emit(SessionEvent::VotesUpdated(votes));
    }
}

impl Drop for RoomSession {
    /// Closes the topics of the joined room. Unsubscriptions that are still
    /// retrying are left to finish.
    fn drop(&mut self) {
        let Binding::Joined { pin, link, .. } = std::mem::take(&mut self.state.get_mut().binding)
        else {
            return;
        };

        link.subscription.cancel();
        drop(link);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to unsubscribe from {} on", pin);
            return;
        };

        let broker = self.context.broker.clone();
        let topics = Topic::subscriptions_for(&pin);

        runtime.spawn(async move {
            broker.unsubscribe_topics(&topics, &Cancellation::new()).await;
        });
    }
}
