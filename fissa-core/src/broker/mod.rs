//! A thin wrapper around one shared broker connection.
//!
//! The [Broker] owns a [Transport] and fans every incoming [Message] out to the
//! handlers registered with [Broker::on_message]. Subscribing and unsubscribing is
//! best-effort: while the transport is disconnected, attempts are retried with a
//! bounded linear backoff and then abandoned with a warning.

mod cancellation;
mod memory;

use std::{
    fmt::Display,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::sleep;

use crate::{Id, RetryPolicy};

pub use cancellation::*;
pub use memory::*;

pub type Result<T> = std::result::Result<T, BrokerError>;

pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;
pub type HandlerId = Id<MessageHandle>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker is not connected")]
    NotConnected,
    #[error("Broker connection failed: {0}")]
    Connection(String),
    #[error("Could not {operation} {topic}: {reason}")]
    Rejected {
        operation: Operation,
        topic: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Subscribe,
    Unsubscribe,
}

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A connection to a broker that the [Broker] can drive.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns true if the connection to the broker is currently established
    fn is_connected(&self) -> bool;

    async fn subscribe(&self, topic: &str) -> Result<()>;

    async fn unsubscribe(&self, topic: &str) -> Result<()>;
}

/// Shares one transport between any number of message handlers.
pub struct Broker {
    me: Weak<Self>,
    transport: Box<dyn Transport>,
    retry: RetryPolicy,
    handlers: DashMap<HandlerId, Handler>,
}

/// Keeps a handler registered with a [Broker]. The handler is detached when this is dropped.
#[must_use = "the handler is detached as soon as the handle is dropped"]
pub struct MessageHandle {
    id: HandlerId,
    broker: Weak<Broker>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Decodes the JSON payload
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

impl Broker {
    pub fn new<T>(transport: T, retry: RetryPolicy) -> Arc<Self>
    where
        T: Transport + 'static,
    {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            transport: Box::new(transport),
            retry,
            handlers: Default::default(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Registers a handler that is called for every message on any subscribed topic
    pub fn on_message<F>(&self, handler: F) -> MessageHandle
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = HandlerId::new();
        self.handlers.insert(id, Arc::new(handler));

        MessageHandle {
            id,
            broker: self.me.clone(),
        }
    }

    /// Hands a message to every registered handler.
    /// Called by transports whenever a message arrives.
    pub fn dispatch(&self, message: Message) {
        // Handlers may attach or detach other handlers, so none of the map's locks can be held
        let handlers: Vec<Handler> = self.handlers.iter().map(|h| h.value().clone()).collect();

        for handler in handlers {
            handler(&message)
        }
    }

    /// The number of currently attached handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Subscribes to the given topics. Returns false if every attempt failed or the
    /// request was cancelled, this is never reported as an error.
    pub async fn subscribe_topics(&self, topics: &[String], cancellation: &Cancellation) -> bool {
        self.retry(Operation::Subscribe, topics, cancellation)
            .await
    }

    /// Unsubscribes from the given topics, with the same policy as [Broker::subscribe_topics]
    pub async fn unsubscribe_topics(&self, topics: &[String], cancellation: &Cancellation) -> bool {
        self.retry(Operation::Unsubscribe, topics, cancellation)
            .await
    }

    async fn retry(
        &self,
        operation: Operation,
        topics: &[String],
        cancellation: &Cancellation,
    ) -> bool {
        for attempt in 0..self.retry.attempts {
            let delay = self.retry.delay_for(attempt);

            if !delay.is_zero() {
                sleep(delay).await;
            }

            if cancellation.is_cancelled() {
                debug!("Cancelled {} of {:?}", operation, topics);
                return false;
            }

            match self.apply(operation, topics).await {
                Ok(()) => {
                    debug!("Completed {} of {:?}", operation, topics);
                    return true;
                }
                Err(e) => debug!("Attempt {} at {} failed: {}", attempt + 1, operation, e),
            }
        }

        warn!(
            "Gave up on {} of {:?} after {} attempts",
            operation, topics, self.retry.attempts
        );

        false
    }

    async fn apply(&self, operation: Operation, topics: &[String]) -> Result<()> {
        if !self.transport.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        for topic in topics {
            match operation {
                Operation::Subscribe => self.transport.subscribe(topic).await?,
                Operation::Unsubscribe => self.transport.unsubscribe(topic).await?,
            }
        }

        Ok(())
    }

    fn detach(&self, id: HandlerId) {
        self.handlers.remove(&id);
    }
}

impl MessageHandle {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Detaches the handler now rather than when the handle goes out of scope
    pub fn detach(self) {}
}

impl Drop for MessageHandle {
    fn drop(&mut self) {
        if let Some(broker) = self.broker.upgrade() {
            broker.detach(self.id)
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Subscribe => f.write_str("subscribe"),
            Operation::Unsubscribe => f.write_str("unsubscribe"),
        }
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::{Broker, Cancellation, MemoryTransport, Message};
    use crate::RetryPolicy;

    fn topics() -> Vec<String> {
        vec!["session/ABCD".to_string(), "session/ABCD/votes".to_string()]
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_retries_exactly_five_times_when_disconnected() {
        let transport = MemoryTransport::disconnected();
        let broker = Broker::new(transport.clone(), RetryPolicy::default());

        let started = Instant::now();
        let subscribed = broker
            .subscribe_topics(&topics(), &Cancellation::new())
            .await;

        assert!(!subscribed);

        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 5);

        let mut previous = started;
        let gaps: Vec<_> = attempts
            .iter()
            .map(|at| {
                let gap = *at - previous;
                previous = *at;
                gap
            })
            .collect();

        assert_eq!(
            gaps,
            [0, 1000, 2000, 3000, 4000]
                .map(Duration::from_millis)
                .to_vec()
        );
        assert!(transport.subscriptions().is_empty());

        // Nothing is scheduled after giving up
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.attempts().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_succeeds_once_connected() {
        let transport = MemoryTransport::disconnected();
        let broker = Broker::new(transport.clone(), RetryPolicy::default());

        let connector = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            connector.set_connected(true);
        });

        let subscribed = broker
            .subscribe_topics(&topics(), &Cancellation::new())
            .await;

        assert!(subscribed);
        assert_eq!(transport.attempts().len(), 3);
        assert_eq!(transport.subscriptions(), topics());

        let unsubscribed = broker
            .unsubscribe_topics(&topics(), &Cancellation::new())
            .await;

        assert!(unsubscribed);
        assert!(transport.subscriptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_retries_stop_early() {
        let transport = MemoryTransport::disconnected();
        let broker = Broker::new(transport.clone(), RetryPolicy::default());
        let cancellation = Cancellation::new();

        let canceller = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            canceller.cancel();
        });

        let subscribed = broker.subscribe_topics(&topics(), &cancellation).await;

        assert!(!subscribed);
        // Attempts at 0ms and 1000ms ran, the one scheduled for 3000ms saw the cancellation
        assert_eq!(transport.attempts().len(), 2);
    }

    #[test]
    fn handlers_receive_messages_until_detached() {
        let broker = Broker::new(MemoryTransport::connected(), RetryPolicy::default());
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        let first = broker.on_message(move |m| sink.lock().push(m.topic.clone()));

        let sink = received.clone();
        let second = broker.on_message(move |m| sink.lock().push(format!("2:{}", m.topic)));

        assert_eq!(broker.handler_count(), 2);

        broker.dispatch(Message::new("session/ABCD", "{}"));
        first.detach();
        broker.dispatch(Message::new("session/ABCD/votes", "[]"));
        drop(second);
        broker.dispatch(Message::new("session/ABCD", "{}"));

        assert_eq!(broker.handler_count(), 0);
        assert_eq!(
            *received.lock(),
            vec!["session/ABCD", "2:session/ABCD", "2:session/ABCD/votes"]
        );
    }

    #[test]
    fn handlers_can_detach_themselves_while_dispatching() {
        let broker = Broker::new(MemoryTransport::connected(), RetryPolicy::default());
        let slot = Arc::new(Mutex::new(None));

        let handle_slot = slot.clone();
        let handle = broker.on_message(move |_| {
            handle_slot.lock().take();
        });
        *slot.lock() = Some(handle);

        broker.dispatch(Message::new("session/ABCD", "{}"));

        assert_eq!(broker.handler_count(), 0);
    }

    #[test]
    fn payloads_decode_as_json() {
        let message = Message::new("session/ABCD/votes", r#"[1, 2, 3]"#);
        let decoded: Vec<u32> = message.decode().unwrap();

        assert_eq!(decoded, vec![1, 2, 3]);
        assert!(Message::new("x", "not json").decode::<Vec<u32>>().is_err());
    }
}
