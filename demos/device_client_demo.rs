// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Demo program: connect a device to Cloud IoT Core, publish telemetry,
//! device state, and a custom topic event, and print inbound config/command
//! messages as they arrive.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example device_client_demo -- \
//!     <project-id> <registry-id> <device-id> <region> <path-to-private-key.pem>
//! ```
//!
//! The private key PEM is assumed to be EC (P-256); pass an RSA key instead
//! by swapping `SigningKey::Ec` for `SigningKey::Rsa` below.

use std::env;
use std::time::Duration;

use gcp_iot_core::identity::DeviceIdentity;
use gcp_iot_core::pipeline::{Qos, TopicEvent};
use gcp_iot_core::supervisor::{ConnectionListener, DisconnectReason};
use gcp_iot_core::token::SigningKey;
use gcp_iot_core::DeviceClient;

struct LoggingConnectionListener;

impl ConnectionListener for LoggingConnectionListener {
    fn on_connected(&self) {
        println!("connected to Cloud IoT Core");
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        println!("disconnected: {reason:?}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 6 {
        eprintln!(
            "Usage: {} <project-id> <registry-id> <device-id> <region> <private-key.pem>",
            args[0]
        );
        std::process::exit(1);
    }

    let identity = DeviceIdentity::builder(&args[1], &args[2], &args[3], &args[4]).build()?;
    let key = SigningKey::Ec(std::fs::read(&args[5])?);

    let client = DeviceClient::builder(identity, key)
        .on_connection_event(LoggingConnectionListener)
        .on_config(|payload: Vec<u8>| {
            println!("config update: {} bytes", payload.len());
        })
        .on_command(|sub_folder: String, payload: Vec<u8>| {
            println!("command on {sub_folder:?}: {} bytes", payload.len());
        })
        .build()?;

    client.connect();

    client.publish_device_state(b"{\"status\":\"booting\"}".to_vec());
    client.publish_telemetry(TopicEvent::telemetry("/temperature", b"21.5".to_vec(), Qos::AtLeastOnce));
    client.publish_topic_event(TopicEvent::topic(
        "/devices/demo/logs",
        "/boot",
        b"device started".to_vec(),
        Qos::AtMostOnce,
    ));

    tokio::time::sleep(Duration::from_secs(60)).await;
    client.shutdown().await;
    Ok(())
}
