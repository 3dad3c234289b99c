use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use crossbeam::atomic::AtomicCell;
use fissa_core::{
    broker::{Broker, BrokerError, Message, Operation, Result, Transport},
    random_string, BrokerConfig, Protocol,
};
use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::{task::JoinHandle, time::sleep};

/// How long to wait before polling again after a connection error.
/// Polling after an error makes rumqttc reconnect.
const RECONNECT_PAUSE: Duration = Duration::from_secs(2);
const REQUEST_CAPACITY: usize = 64;

/// A [Transport] backed by an MQTT connection
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicCell<bool>>,
}

/// The process wide broker connection.
/// The connection is driven by a background task until [MqttConnection::close] is called.
pub struct MqttConnection {
    broker: Arc<Broker>,
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl MqttConnection {
    /// Opens the connection with a randomized client id.
    /// Must be called from within a tokio runtime.
    pub fn connect(config: &BrokerConfig) -> Self {
        let client_id = format!("fissa-{}", random_string(10));
        let options = mqtt_options(config, &client_id);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicCell::new(false));

        let transport = MqttTransport {
            client: client.clone(),
            connected: connected.clone(),
        };

        let broker = Broker::new(transport, config.retry);
        let task = tokio::spawn(drive(eventloop, Arc::downgrade(&broker), connected));

        info!(
            "Connecting to broker at {}://{}:{} as {}",
            config.protocol, config.host, config.port, client_id
        );

        Self {
            broker,
            client,
            task,
        }
    }

    pub fn broker(&self) -> Arc<Broker> {
        self.broker.clone()
    }

    /// Disconnects from the broker and stops the background task
    pub async fn close(self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("Disconnect request failed: {}", e);
        }

        self.task.abort();
        info!("Broker connection closed");
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn is_connected(&self) -> bool {
        self.connected.load()
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BrokerError::Rejected {
                operation: Operation::Subscribe,
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| BrokerError::Rejected {
                operation: Operation::Unsubscribe,
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

fn mqtt_options(config: &BrokerConfig, client_id: &str) -> MqttOptions {
    let host = match config.protocol {
        Protocol::Tcp | Protocol::Tls => config.host.clone(),
        Protocol::Ws | Protocol::Wss => {
            format!("{}://{}:{}/mqtt", config.protocol, config.host, config.port)
        }
    };

    let mut options = MqttOptions::new(client_id, host, config.port);

    match config.protocol {
        Protocol::Tcp => {}
        Protocol::Tls => {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        Protocol::Ws => {
            options.set_transport(rumqttc::Transport::Ws);
        }
        Protocol::Wss => {
            options.set_transport(rumqttc::Transport::wss_with_default_config());
        }
    }

    // A persistent session makes the broker restore our subscriptions after a reconnect
    options.set_clean_session(false);
    options.set_keep_alive(config.keep_alive);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }

    options
}

async fn drive(mut eventloop: EventLoop, broker: Weak<Broker>, connected: Arc<AtomicCell<bool>>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                connected.store(true);
                info!("Connected to broker (session present: {})", ack.session_present);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(broker) = broker.upgrade() else {
                    break;
                };

                broker.dispatch(Message::new(publish.topic, publish.payload.to_vec()));
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false);
                warn!("Broker closed the connection");
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false) {
                    warn!("Lost connection to broker: {}", e);
                } else {
                    debug!("Broker connection attempt failed: {}", e);
                }

                sleep(RECONNECT_PAUSE).await;
            }
        }

        if broker.strong_count() == 0 {
            break;
        }
    }

    debug!("Broker event loop stopped");
}

#[cfg(test)]
mod test {
    use fissa_core::{BrokerConfig, Protocol};

    use super::mqtt_options;

    #[test]
    fn test_options_request_persistent_session() {
        let options = mqtt_options(
            &BrokerConfig {
                protocol: Protocol::Tcp,
                host: "localhost".to_string(),
                port: 1883,
                ..Default::default()
            },
            "fissa-test",
        );

        assert!(!options.clean_session());
        assert_eq!(options.client_id(), "fissa-test");
        assert_eq!(
            options.broker_address(),
            ("localhost".to_string(), 1883)
        );
    }

    #[test]
    fn test_websocket_options_use_url_host() {
        let options = mqtt_options(
            &BrokerConfig {
                protocol: Protocol::Ws,
                host: "broker.example".to_string(),
                port: 8080,
                ..Default::default()
            },
            "fissa-test",
        );

        assert_eq!(options.broker_address().0, "ws://broker.example:8080/mqtt");
    }
}
