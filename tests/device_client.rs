// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end scenarios for the connection supervisor and outbound
//! pipeline, driven through [`DeviceClient`] against a [`MockTransport`]
//! (no broker required).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use gcp_iot_core::error::TransportError;
use gcp_iot_core::identity::{DeviceIdentity, QueueConfig};
use gcp_iot_core::pipeline::{Qos, TopicEvent};
use gcp_iot_core::queue::DropPolicy;
use gcp_iot_core::supervisor::{ConnectionListener, DisconnectReason};
use gcp_iot_core::token::SigningKey;
use gcp_iot_core::transport::{MockTransport, MqttTransport};
use gcp_iot_core::{BackoffConfig, DeviceClient};
use parking_lot::Mutex;

fn test_identity() -> DeviceIdentity {
    DeviceIdentity::builder("proj", "reg", "d", "us-central1").build().unwrap()
}

fn test_key() -> SigningKey {
    SigningKey::Ec(include_bytes!("fixtures/ec_private_key.pem").to_vec())
}

/// Backoff tuned small enough that tests complete quickly while still
/// exercising the sleep-then-retry path.
fn fast_backoff() -> BackoffConfig {
    BackoffConfig::default().with_initial_ms(20).with_max_ms(100).with_jitter_ms(0)
}

#[derive(Default, Clone)]
struct RecordingConnectionListener {
    connected: Arc<AtomicUsize>,
    disconnected: Arc<Mutex<Vec<DisconnectReason>>>,
}

impl ConnectionListener for RecordingConnectionListener {
    fn on_connected(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        self.disconnected.lock().push(reason);
    }
}

async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within timeout");
}

#[tokio::test]
async fn happy_telemetry_publishes_once_and_fires_connected() {
    let mock = MockTransport::new();
    let listener = RecordingConnectionListener::default();

    let client = DeviceClient::builder(test_identity(), test_key())
        .transport(Arc::clone(&mock) as Arc<dyn MqttTransport>)
        .on_connection_event(listener.clone())
        .build()
        .unwrap();

    client.connect();
    wait_until(|| listener.connected.load(Ordering::SeqCst) == 1).await;

    let accepted =
        client.publish_telemetry(TopicEvent::telemetry("/a", b"x".to_vec(), Qos::AtLeastOnce));
    assert!(accepted);

    wait_until(|| !mock.published_messages().is_empty()).await;
    client.shutdown().await;

    assert_eq!(
        mock.published_messages(),
        vec![("/devices/d/events/a".to_string(), b"x".to_vec(), Qos::AtLeastOnce)]
    );
    assert_eq!(listener.connected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn state_coalesces_to_a_single_publish_of_the_latest_value() {
    let mock = MockTransport::new();

    let client = DeviceClient::builder(test_identity(), test_key())
        .transport(Arc::clone(&mock) as Arc<dyn MqttTransport>)
        .build()
        .unwrap();

    // Published before connect() is even called: both coalesce into the
    // state slot while there is no supervisor task draining it yet.
    client.publish_device_state(b"s1".to_vec());
    client.publish_device_state(b"s2".to_vec());

    client.connect();
    wait_until(|| !mock.published_messages().is_empty()).await;
    client.shutdown().await;

    assert_eq!(
        mock.published_messages(),
        vec![("/devices/d/state".to_string(), b"s2".to_vec(), Qos::AtLeastOnce)]
    );
}

#[tokio::test]
async fn head_drop_under_pressure_delivers_only_the_newest_events() {
    let mock = MockTransport::new();

    let client = DeviceClient::builder(test_identity(), test_key())
        .transport(Arc::clone(&mock) as Arc<dyn MqttTransport>)
        .telemetry_queue(QueueConfig::new(3, DropPolicy::HeadDrop))
        .build()
        .unwrap();

    for i in 1..=5u8 {
        client.publish_telemetry(TopicEvent::telemetry("/a", vec![i], Qos::AtMostOnce));
    }

    client.connect();
    wait_until(|| mock.published_messages().len() == 3).await;
    client.shutdown().await;

    let payloads: Vec<u8> = mock.published_messages().into_iter().map(|(_, p, _)| p[0]).collect();
    assert_eq!(payloads, vec![3, 4, 5]);
}

#[tokio::test]
async fn retry_then_success_publishes_exactly_once_after_reconnect() {
    let mock = MockTransport::new();
    // First publish attempt fails as if the client dropped mid-write; the
    // second (post-reconnect) succeeds.
    mock.push_publish_result(Err(TransportError::ClientNotConnected));

    let client = DeviceClient::builder(test_identity(), test_key())
        .transport(Arc::clone(&mock) as Arc<dyn MqttTransport>)
        .backoff(fast_backoff())
        .build()
        .unwrap();

    client.connect();
    client.publish_telemetry(TopicEvent::telemetry("/a", b"x".to_vec(), Qos::AtLeastOnce));

    wait_until(|| mock.published_messages().len() == 1).await;
    client.shutdown().await;

    assert_eq!(
        mock.published_messages(),
        vec![("/devices/d/events/a".to_string(), b"x".to_vec(), Qos::AtLeastOnce)]
    );
}

#[tokio::test]
async fn fatal_auth_failure_reports_not_authorized_and_stops() {
    let mock = MockTransport::new();
    mock.push_connect_result(Err(TransportError::NotAuthorized));
    let listener = RecordingConnectionListener::default();

    let client = DeviceClient::builder(test_identity(), test_key())
        .transport(Arc::clone(&mock) as Arc<dyn MqttTransport>)
        .on_connection_event(listener.clone())
        .build()
        .unwrap();

    client.connect();
    wait_until(|| !listener.disconnected.lock().is_empty()).await;
    client.shutdown().await;

    assert_eq!(*listener.disconnected.lock(), vec![DisconnectReason::NotAuthorized]);
    assert_eq!(listener.connected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn command_routing_strips_the_commands_prefix() {
    let mock = MockTransport::new();
    let received = Arc::new(Mutex::new(None));
    let received_clone = Arc::clone(&received);

    let client = DeviceClient::builder(test_identity(), test_key())
        .transport(Arc::clone(&mock) as Arc<dyn MqttTransport>)
        .on_command(move |sub_folder: String, payload: Vec<u8>| {
            *received_clone.lock() = Some((sub_folder, payload));
        })
        .build()
        .unwrap();

    client.connect();
    wait_until(|| mock.subscribed_topics().contains(&"/devices/d/commands/#".to_string())).await;

    mock.deliver("/devices/d/commands/lights", b"on".to_vec());
    wait_until(|| received.lock().is_some()).await;
    client.shutdown().await;

    assert_eq!(received.lock().clone(), Some(("lights".to_string(), b"on".to_vec())));
}

#[tokio::test]
async fn command_routing_on_bare_prefix_yields_empty_sub_folder() {
    let mock = MockTransport::new();
    let received = Arc::new(Mutex::new(None));
    let received_clone = Arc::clone(&received);

    let client = DeviceClient::builder(test_identity(), test_key())
        .transport(Arc::clone(&mock) as Arc<dyn MqttTransport>)
        .on_command(move |sub_folder: String, payload: Vec<u8>| {
            *received_clone.lock() = Some((sub_folder, payload));
        })
        .build()
        .unwrap();

    client.connect();
    wait_until(|| mock.subscribed_topics().contains(&"/devices/d/commands/#".to_string())).await;

    mock.deliver("/devices/d/commands", b"noop".to_vec());
    wait_until(|| received.lock().is_some()).await;
    client.shutdown().await;

    assert_eq!(received.lock().clone(), Some((String::new(), b"noop".to_vec())));
}
