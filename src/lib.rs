// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `gcp_iot_core` - a Rust client for Google Cloud IoT Core's MQTT device bridge.
//!
//! This crate maintains a single persistent, TLS-secured MQTT connection to
//! `mqtt.googleapis.com`, authenticating with short-lived JWTs signed by the
//! device's own private key, and exposes a small non-blocking facade for
//! publishing telemetry, topic events, and device state, and for receiving
//! configuration and command messages.
//!
//! # Quick Start
//!
//! ```no_run
//! use gcp_iot_core::identity::DeviceIdentity;
//! use gcp_iot_core::pipeline::{Qos, TopicEvent};
//! use gcp_iot_core::token::SigningKey;
//! use gcp_iot_core::DeviceClient;
//!
//! # async fn example() -> gcp_iot_core::error::ClientResult<()> {
//! let identity = DeviceIdentity::builder("my-project", "my-registry", "my-device", "us-central1")
//!     .build()?;
//!
//! let key = SigningKey::Ec(std::fs::read("device_private_key.pem").unwrap());
//!
//! let client = DeviceClient::builder(identity, key)
//!     .on_command(|sub_folder: String, payload: Vec<u8>| {
//!         println!("command on {sub_folder:?}: {} bytes", payload.len());
//!     })
//!     .build()?;
//!
//! client.connect();
//! client.publish_telemetry(TopicEvent::telemetry("/temperature", b"21.5".to_vec(), Qos::AtLeastOnce));
//! client.disconnect();
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`backoff`] — bounded exponential backoff with jitter for reconnection delays.
//! - [`queue`] — a bounded FIFO queue with head-drop or tail-reject overflow policy.
//! - [`token`] — mints signed, time-bounded JWTs for MQTT authentication.
//! - [`identity`] — immutable device identity, derived topic paths, and configuration types.
//! - [`pipeline`] — the prioritized, disconnect-tolerant outbound publish pipeline.
//! - [`router`] — routes inbound messages to configuration/command listeners.
//! - [`transport`] — the MQTT transport contract and its `rumqttc` implementation.
//! - [`supervisor`] — the single background task that owns the connection.
//! - [`client`] — [`DeviceClient`], the public facade.
//!
//! # Non-goals
//!
//! No message persistence across restarts, no QoS 2, no multi-device
//! fan-out, no inbound buffering beyond what `rumqttc` provides, no explicit
//! token pre-refresh while connected.

pub mod backoff;
pub mod client;
pub mod error;
pub mod identity;
pub mod pipeline;
pub mod queue;
pub mod router;
pub mod supervisor;
pub mod token;
pub mod transport;

pub use client::{DeviceClient, DeviceClientBuilder};
pub use error::{ClientError, ClientResult, ConfigError, ConfigResult, TransportError, TransportResult};
pub use identity::{BackoffConfig, DeviceIdentity, DeviceIdentityBuilder, QueueConfig};
pub use pipeline::{Qos, TopicEvent};
pub use router::{CommandListener, ConfigListener, Executor, PooledExecutor};
pub use supervisor::{ConnectionListener, DisconnectReason};
pub use token::SigningKey;
