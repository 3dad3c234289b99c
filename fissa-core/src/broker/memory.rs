use std::sync::Arc;

use async_trait::async_trait;
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{Result, Transport};

/// A transport that keeps subscriptions in memory and never talks to a real broker.
///
/// Clones share state, so a clone kept outside the [Broker](super::Broker) can flip
/// the connection state and inspect what was subscribed. Messages are injected with
/// [Broker::dispatch](super::Broker::dispatch).
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    connected: AtomicCell<bool>,
    subscriptions: Mutex<Vec<String>>,
    /// Every time the connection state was checked
    probes: Mutex<Vec<Instant>>,
}

impl MemoryTransport {
    pub fn connected() -> Self {
        let transport = Self::default();
        transport.set_connected(true);
        transport
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected);
    }

    /// Topics currently subscribed to, in subscription order
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().clone()
    }

    /// The instants at which the connection state was checked.
    /// Every subscribe or unsubscribe attempt checks it exactly once.
    pub fn attempts(&self) -> Vec<Instant> {
        self.inner.probes.lock().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn is_connected(&self) -> bool {
        self.inner.probes.lock().push(Instant::now());
        self.inner.connected.load()
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        let mut subscriptions = self.inner.subscriptions.lock();

        if !subscriptions.iter().any(|t| t == topic) {
            subscriptions.push(topic.to_string());
        }

        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.inner.subscriptions.lock().retain(|t| t != topic);
        Ok(())
    }
}
