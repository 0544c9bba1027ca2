// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The transport contract the connection supervisor drives, and its two
//! implementations: [`RumqttcTransport`] for production, [`MockTransport`]
//! for supervisor unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectionError, Event, MqttOptions, Packet, QoS as RumqttcQos};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::pipeline::Qos;

/// Options passed to [`MqttTransport::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// MQTT client id.
    pub client_id: String,
    /// MQTT user name. Always `"unused"` for Cloud IoT Core (§6).
    pub username: String,
    /// MQTT password: the signed JWT.
    pub password: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
}

/// An inbound message delivered by the transport after connection.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// The full topic the message arrived on.
    pub topic: String,
    /// The raw payload.
    pub payload: Vec<u8>,
}

/// The transport contract the connection supervisor drives.
///
/// Modeled on §6's "Transport library (consumed)" surface: connect,
/// disconnect, force-disconnect, publish, subscribe, is-connected, and an
/// inbound message channel standing in for the transport's callback
/// interface (`set_callback` in the spec's vocabulary).
#[async_trait]
pub trait MqttTransport: Send + Sync {
    /// Opens a connection with the given options.
    async fn connect(&self, options: ConnectOptions) -> Result<(), TransportError>;

    /// Gracefully disconnects, if connected.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Forcibly closes the connection without a graceful MQTT disconnect.
    async fn force_disconnect(&self);

    /// Publishes `payload` to `topic` at `qos`. Device-state publishes
    /// always use QoS 1 per §6; callers pass the already-decided QoS.
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<(), TransportError>;

    /// Subscribes to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Whether the transport currently believes it is connected.
    fn is_connected(&self) -> bool;

    /// Takes ownership of the channel the supervisor drains for inbound
    /// messages and asynchronous connection-lost notifications. Returns
    /// `None` if already taken.
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}

/// An event delivered out-of-band by the transport: either an inbound
/// message, or an asynchronous notification that the connection was lost
/// (the spec's "transport library reports connection lost via its
/// callback", §4.7).
#[derive(Debug)]
pub enum TransportEvent {
    /// An inbound message on a subscribed topic.
    Message(InboundMessage),
    /// The connection was lost asynchronously, classified per §4.7.
    ConnectionLost(TransportError),
}

fn qos_to_rumqttc(qos: Qos) -> RumqttcQos {
    match qos {
        Qos::AtMostOnce => RumqttcQos::AtMostOnce,
        Qos::AtLeastOnce => RumqttcQos::AtLeastOnce,
    }
}

/// Classifies a `rumqttc` connection error into the reason-code surface
/// the supervisor's error-classification table (§4.7) expects.
///
/// `rumqttc::ConnectionError` has variants this crate doesn't need to
/// distinguish beyond the categories below, so unmatched variants fall back
/// to `Unknown` via their `Display` text rather than being named here.
fn classify_connection_error(err: &ConnectionError) -> TransportError {
    match err {
        ConnectionError::MqttState(_) => TransportError::ClientNotConnected,
        ConnectionError::Timeout(_) => TransportError::SocketTimeout,
        ConnectionError::Tls(e) => TransportError::Tls(e.to_string()),
        ConnectionError::Io(e) => {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::ConnectionLost { eof: true }
            } else {
                TransportError::ConnectionLost { eof: false }
            }
        }
        ConnectionError::ConnectionRefused(code) => {
            if format!("{code:?}").contains("NotAuthorized") || format!("{code:?}").contains("BadUserNamePassword") {
                TransportError::NotAuthorized
            } else {
                TransportError::ServerConnectError(format!("{code:?}"))
            }
        }
        other => TransportError::Unknown(other.to_string()),
    }
}

/// Production [`MqttTransport`] backed by `rumqttc`.
pub struct RumqttcTransport {
    client: Mutex<Option<AsyncClient>>,
    connected: Arc<AtomicBool>,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl RumqttcTransport {
    /// Creates a transport with no active connection.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            client: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            inbound_tx: tx,
            inbound_rx: Mutex::new(Some(rx)),
        })
    }
}

impl Default for RumqttcTransport {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            client: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            inbound_tx: tx,
            inbound_rx: Mutex::new(Some(rx)),
        }
    }
}

#[async_trait]
impl MqttTransport for RumqttcTransport {
    async fn connect(&self, options: ConnectOptions) -> Result<(), TransportError> {
        let mut mqtt_options = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_credentials(&options.username, &options.password);

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, 64);

        // Drive the event loop until ConnAck arrives, then hand it off to a
        // background task that forwards inbound publishes and connection-lost
        // notifications for the lifetime of this session.
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => continue,
                Err(e) => return Err(classify_connection_error(&e)),
            }
        }

        self.connected.store(true, Ordering::Release);
        *self.client.lock() = Some(client);

        let connected_flag = Arc::clone(&self.connected);
        let tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let _ = tx.send(TransportEvent::Message(InboundMessage {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        }));
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        connected_flag.store(false, Ordering::Release);
                        let _ = tx.send(TransportEvent::ConnectionLost(TransportError::ConnectionLost {
                            eof: true,
                        }));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        connected_flag.store(false, Ordering::Release);
                        let _ = tx.send(TransportEvent::ConnectionLost(classify_connection_error(&e)));
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let client = self.client.lock().clone();
        if let Some(client) = client {
            client.disconnect().await.map_err(|e| TransportError::Unknown(e.to_string()))?;
        }
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn force_disconnect(&self) {
        *self.client.lock() = None;
        self.connected.store(false, Ordering::Release);
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<(), TransportError> {
        let client = self.client.lock().clone();
        let Some(client) = client else {
            return Err(TransportError::ClientNotConnected);
        };
        client.publish(topic, qos_to_rumqttc(qos), false, payload).await.map_err(|e| {
            // A publish error from rumqttc's client handle means its paired
            // event loop task has already exited; the event loop task
            // itself flips `connected` false on its own read errors, but a
            // write error surfaces here first.
            self.connected.store(false, Ordering::Release);
            TransportError::ServerConnectError(e.to_string())
        })
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let client = self.client.lock().clone();
        let Some(client) = client else {
            return Err(TransportError::ClientNotConnected);
        };
        client
            .subscribe(topic, RumqttcQos::AtLeastOnce)
            .await
            .map_err(|e| TransportError::ServerConnectError(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.inbound_rx.lock().take()
    }
}

/// A scripted transport for unit-testing the connection supervisor without a
/// broker. Connect/publish outcomes are queued up front; publishes are
/// recorded for assertions.
pub struct MockTransport {
    connect_results: Mutex<std::collections::VecDeque<Result<(), TransportError>>>,
    publish_results: Mutex<std::collections::VecDeque<Result<(), TransportError>>>,
    pub(crate) published: Mutex<Vec<(String, Vec<u8>, Qos)>>,
    pub(crate) subscribed: Mutex<Vec<String>>,
    connected: AtomicBool,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl MockTransport {
    /// Creates a mock transport with no scripted outcomes (every `connect`
    /// and `publish` call succeeds).
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            connect_results: Mutex::new(std::collections::VecDeque::new()),
            publish_results: Mutex::new(std::collections::VecDeque::new()),
            published: Mutex::new(Vec::new()),
            subscribed: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            inbound_tx: tx,
            inbound_rx: Mutex::new(Some(rx)),
        })
    }

    /// Queues the outcome of the next `connect()` call (FIFO).
    pub fn push_connect_result(&self, result: Result<(), TransportError>) {
        self.connect_results.lock().push_back(result);
    }

    /// Queues the outcome of the next `publish()` call (FIFO).
    pub fn push_publish_result(&self, result: Result<(), TransportError>) {
        self.publish_results.lock().push_back(result);
    }

    /// Injects an inbound message as if delivered by the broker.
    pub fn deliver(&self, topic: impl Into<String>, payload: Vec<u8>) {
        let _ = self.inbound_tx.send(TransportEvent::Message(InboundMessage {
            topic: topic.into(),
            payload,
        }));
    }

    /// Injects an asynchronous connection-lost notification.
    pub fn lose_connection(&self, reason: TransportError) {
        self.connected.store(false, Ordering::Release);
        let _ = self.inbound_tx.send(TransportEvent::ConnectionLost(reason));
    }

    /// Returns the recorded `(topic, payload, qos)` publishes, in order.
    #[must_use]
    pub fn published_messages(&self) -> Vec<(String, Vec<u8>, Qos)> {
        self.published.lock().clone()
    }

    /// Returns the recorded subscribed topics, in order.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscribed.lock().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            connect_results: Mutex::new(std::collections::VecDeque::new()),
            publish_results: Mutex::new(std::collections::VecDeque::new()),
            published: Mutex::new(Vec::new()),
            subscribed: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            inbound_tx: tx,
            inbound_rx: Mutex::new(Some(rx)),
        }
    }
}

#[async_trait]
impl MqttTransport for MockTransport {
    async fn connect(&self, _options: ConnectOptions) -> Result<(), TransportError> {
        let result = self.connect_results.lock().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.connected.store(true, Ordering::Release);
        }
        result
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn force_disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<(), TransportError> {
        let result = self.publish_results.lock().pop_front().unwrap_or(Ok(()));
        match &result {
            Ok(()) => self.published.lock().push((topic.to_string(), payload, qos)),
            // Mirrors rumqttc: every publish failure except a malformed
            // payload means the underlying session is already gone.
            Err(TransportError::BadPayload(_)) => {}
            Err(_) => self.connected.store(false, Ordering::Release),
        }
        result
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.subscribed.lock().push(topic.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.inbound_rx.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ConnectOptions {
        ConnectOptions {
            host: "mqtt.googleapis.com".to_string(),
            port: 8883,
            client_id: "projects/p/locations/r/registries/reg/devices/d".to_string(),
            username: "unused".to_string(),
            password: "token".to_string(),
            keep_alive: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn mock_transport_connects_and_publishes() {
        let transport = MockTransport::new();
        transport.connect(opts()).await.unwrap();
        assert!(transport.is_connected());

        transport
            .publish("/devices/d/events", b"x".to_vec(), Qos::AtLeastOnce)
            .await
            .unwrap();
        assert_eq!(
            transport.published_messages(),
            vec![("/devices/d/events".to_string(), b"x".to_vec(), Qos::AtLeastOnce)]
        );
    }

    #[tokio::test]
    async fn mock_transport_replays_scripted_failure() {
        let transport = MockTransport::new();
        transport.push_connect_result(Err(TransportError::NotAuthorized));
        let result = transport.connect(opts()).await;
        assert!(matches!(result, Err(TransportError::NotAuthorized)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn mock_transport_delivers_inbound_messages() {
        let transport = MockTransport::new();
        let mut inbound = transport.take_inbound().unwrap();
        transport.deliver("/devices/d/config", b"cfg".to_vec());

        match inbound.recv().await.unwrap() {
            TransportEvent::Message(msg) => {
                assert_eq!(msg.topic, "/devices/d/config");
                assert_eq!(msg.payload, b"cfg");
            }
            TransportEvent::ConnectionLost(_) => panic!("expected a message"),
        }
    }
}
