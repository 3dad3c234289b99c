//! Fakes shared by the tests of this crate

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use fissa_core::{
    broker::{Broker, MemoryTransport, Message},
    gateway::{Api, Gateway, GatewayError, Method, Response, Result},
    Credentials, Pin, RetryPolicy,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::{EventReceiver, RoomSession, SessionContext, SessionEvent};

/// Answers requests by path. Responses can be held back to resolve them in any order.
#[derive(Default)]
pub struct ScriptedGateway {
    routes: Mutex<HashMap<String, (u16, Value)>>,
    held: Mutex<HashMap<String, VecDeque<oneshot::Receiver<(u16, Value)>>>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    /// Answers every request to `path` with `content` wrapped in an envelope
    pub fn respond(&self, path: &str, content: Value) {
        self.respond_with(path, 200, json!({ "content": content }))
    }

    pub fn respond_with(&self, path: &str, status: u16, body: Value) {
        self.routes.lock().insert(path.to_string(), (status, body));
    }

    /// Holds the next request to `path` until the returned sender is used
    pub fn hold(&self, path: &str) -> oneshot::Sender<(u16, Value)> {
        let (sender, receiver) = oneshot::channel();

        self.held
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(receiver);

        sender
    }

    /// Every request so far as `METHOD path`
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn count(&self, request: &str) -> usize {
        self.requests.lock().iter().filter(|r| *r == request).count()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn request(&self, method: Method, path: &str, _body: Option<Value>) -> Result<Response> {
        self.requests.lock().push(format!("{} {}", method, path));

        let held = self.held.lock().get_mut(path).and_then(|q| q.pop_front());

        let (status, content) = match held {
            Some(receiver) => receiver
                .await
                .map_err(|_| GatewayError::Transport("held response was dropped".into()))?,
            None => self
                .routes
                .lock()
                .get(path)
                .cloned()
                .unwrap_or((404, Value::Null)),
        };

        Response { status, content }.ensure_success()
    }
}

pub struct Fixture {
    pub session: Arc<RoomSession>,
    pub gateway: Arc<ScriptedGateway>,
    pub transport: MemoryTransport,
    pub broker: Arc<Broker>,
    pub events: EventReceiver,
}

impl Fixture {
    pub fn new() -> Self {
        let gateway = Arc::new(ScriptedGateway::default());
        let transport = MemoryTransport::connected();
        let broker = Broker::new(
            transport.clone(),
            RetryPolicy {
                attempts: 5,
                step: Duration::from_millis(1000),
            },
        );

        let session = RoomSession::new(SessionContext {
            api: Api::new(gateway.clone()),
            broker: broker.clone(),
            credentials: Credentials {
                user_id: "u1".to_string(),
                access_token: "access".to_string(),
                refresh_token: Some("refresh".to_string()),
            },
        });

        let events = session.events();

        Self {
            session,
            gateway,
            transport,
            broker,
            events,
        }
    }

    /// Serves a room with the given tracks and no votes
    pub fn serve_room(&self, pin: &str, track_ids: &[&str]) {
        let tracks: Vec<Value> = track_ids
            .iter()
            .enumerate()
            .map(|(index, id)| track(id, index as i64))
            .collect();

        self.gateway.respond(&format!("/room/{}", pin), room(pin, 0));
        self.gateway
            .respond(&format!("/room/track?pin={}", pin), Value::Array(tracks));
        self.gateway
            .respond(&format!("/room/vote?pin={}", pin), json!([]));
    }

    pub fn publish(&self, topic: &str, payload: Value) {
        self.broker
            .dispatch(Message::new(topic, payload.to_string().into_bytes()));
    }

    pub fn drain_events(&self) -> Vec<SessionEvent> {
        self.events.try_iter().collect()
    }
}

pub fn pin(value: &str) -> Pin {
    Pin::new(value).unwrap()
}

pub fn room(pin: &str, current_index: i64) -> Value {
    json!({ "pin": pin, "playlistId": "p1", "currentIndex": current_index })
}

pub fn track(id: &str, index: i64) -> Value {
    json!({
        "id": id,
        "name": format!("Track {}", id),
        "artists": ["Artist"],
        "durationMs": 1000,
        "index": index
    })
}

pub fn vote(track_id: &str, user_id: &str, state: &str) -> Value {
    json!({ "trackId": track_id, "createdBy": user_id, "state": state })
}

/// Lets spawned tasks run to completion
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await
}
