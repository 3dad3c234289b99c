use std::{fmt::Display, sync::Arc};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{util::encode_query_value, Pin, Room, Track, Vote, VoteState};

pub type Result<T> = std::result::Result<T, GatewayError>;
pub type SharedGateway = Arc<dyn Gateway>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The backend answered with a non-2xx status
    #[error("Request failed with status {status}")]
    Http { status: u16 },
    /// The request never got a response
    #[error("Request could not be sent: {0}")]
    Transport(String),
    /// The response did not have the expected shape
    #[error("Response could not be decoded: {0}")]
    Decode(String),
}

/// How callers should treat a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The resource does not exist (404)
    NotFound,
    /// The action was already done or is in progress (409)
    Conflict,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// A raw response from the backend
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    /// The parsed JSON body, [Value::Null] if there was none
    pub content: Value,
}

/// Issues requests against the session backend.
///
/// Implementations must fail with [GatewayError::Http] on any non-2xx status and
/// must not retry on their own.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Response>;
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Http { status: 404 } => ErrorKind::NotFound,
            GatewayError::Http { status: 409 } => ErrorKind::Conflict,
            _ => ErrorKind::Other,
        }
    }

    /// The HTTP status, if the backend answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Http { status } => Some(*status),
            _ => None,
        }
    }
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into an error
    pub fn ensure_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(GatewayError::Http {
                status: self.status,
            })
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTracks {
    pub track_ids: Vec<String>,
    pub pin: Pin,
    pub created_by: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVote {
    pub state: VoteState,
    pub pin: Pin,
    pub track_id: String,
    pub created_by: String,
}

#[derive(Debug, Serialize)]
struct PinBody<'a> {
    pin: &'a Pin,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SkipBody<'a> {
    pin: &'a Pin,
    created_by: &'a str,
}

/// Every successful backend response wraps its payload like this
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    content: T,
}

/// Typed endpoints of the session backend
#[derive(Clone)]
pub struct Api {
    gateway: SharedGateway,
}

impl Api {
    pub fn new(gateway: SharedGateway) -> Self {
        Self { gateway }
    }

    /// Creates a room and returns its pin
    pub async fn create_room(&self, new_room: &NewRoom) -> Result<Pin> {
        let pin: String = self.post_for("/room", new_room).await?;

        Pin::new(pin).ok_or_else(|| GatewayError::Decode("backend returned an invalid pin".into()))
    }

    pub async fn room(&self, pin: &Pin) -> Result<Room> {
        self.get(&format!("/room/{}", encode_query_value(pin.as_str())))
            .await
    }

    pub async fn tracks(&self, pin: &Pin) -> Result<Vec<Track>> {
        self.get(&format!("/room/track?pin={}", encode_query_value(pin.as_str())))
            .await
    }

    pub async fn votes(&self, pin: &Pin) -> Result<Vec<Vote>> {
        self.get(&format!("/room/vote?pin={}", encode_query_value(pin.as_str())))
            .await
    }

    pub async fn add_tracks(&self, new_tracks: &NewTracks) -> Result<()> {
        self.post("/room/track", new_tracks).await
    }

    pub async fn cast_vote(&self, new_vote: &NewVote) -> Result<()> {
        self.post("/room/vote", new_vote).await
    }

    /// Starts playback in a room. Fails with [ErrorKind::Conflict] if it is already playing.
    pub async fn play(&self, pin: &Pin) -> Result<()> {
        self.post("/room/play", &PinBody { pin }).await
    }

    pub async fn skip(&self, pin: &Pin, created_by: &str) -> Result<()> {
        self.post("/room/skip", &SkipBody { pin, created_by })
            .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::Get, path, None).await?;
        unwrap_content(response)
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        self.send(Method::Post, path, Some(to_value(body)?))
            .await
            .map(|_| ())
    }

    async fn post_for<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.send(Method::Post, path, Some(to_value(body)?)).await?;
        unwrap_content(response)
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Response> {
        self.gateway
            .request(method, path, body)
            .await?
            .ensure_success()
    }
}

fn to_value<B: Serialize>(body: &B) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| GatewayError::Decode(e.to_string()))
}

fn unwrap_content<T: DeserializeOwned>(response: Response) -> Result<T> {
    serde_json::from_value::<Envelope<T>>(response.content)
        .map(|e| e.content)
        .map_err(|e| GatewayError::Decode(e.to_string()))
}
